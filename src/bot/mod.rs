//! Telegram front end.
//!
//! - [`handlers`] — commands, callback buttons, and typed replies
//! - [`calendar`] — guided calendar invite editing
//! - [`format`]   — HTML rendering and inline keyboards
//! - [`poller`]   — background interrupt sweep

pub mod calendar;
pub mod format;
mod handlers;
pub mod poller;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::BotCommand;
use tracing::{info, warn};

use crate::client::AgentClient;
use crate::config::Settings;
use crate::state::StateStore;

/// Everything a handler needs, shared across dispatcher tasks.
pub struct Bridge {
    bot: Bot,
    store: Arc<StateStore>,
    client: AgentClient,
    admin_user_id: u64,
}

impl Bridge {
    pub fn new(settings: &Settings, store: Arc<StateStore>, client: AgentClient) -> Self {
        Self {
            bot: Bot::new(settings.telegram_token.clone()),
            store,
            client,
            admin_user_id: settings.admin_user_id,
        }
    }

    /// The admin's direct chat. For one-on-one chats the chat id equals the
    /// user id.
    pub(crate) fn admin_chat(&self) -> ChatId {
        ChatId(self.admin_user_id as i64)
    }

    /// Register the command menu and run the dispatcher until shutdown.
    pub async fn run(self: Arc<Self>) {
        if let Err(e) = self.bot.set_my_commands(command_menu()).await {
            warn!("Could not register command menu: {e}");
        }
        info!("Telegram dispatcher starting");

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint({
                let bridge = Arc::clone(&self);
                move |msg: Message, bot: Bot| {
                    let bridge = Arc::clone(&bridge);
                    async move {
                        bridge.handle_message(msg, bot).await;
                        respond(())
                    }
                }
            }))
            .branch(Update::filter_callback_query().endpoint({
                let bridge = Arc::clone(&self);
                move |q: CallbackQuery, bot: Bot| {
                    let bridge = Arc::clone(&bridge);
                    async move {
                        bridge.handle_callback(q, bot).await;
                        respond(())
                    }
                }
            }));

        Dispatcher::builder(self.bot.clone(), handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }
}

fn command_menu() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Start the bot"),
        BotCommand::new("check", "Check for new interrupts"),
        BotCommand::new("help", "Show help information"),
    ]
}
