//! Message, command, and callback handling.
//!
//! Every update is auth-gated against the configured admin before anything
//! else happens. Conversation context (which thread a typed reply belongs
//! to, where a calendar edit stands) lives in the state store, so a restart
//! mid-conversation picks up where it left off.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MaybeInaccessibleMessage, MessageId, ParseMode};
use tracing::{debug, error, warn};

use super::calendar::{self, CalendarEditState, StepOutcome};
use super::format::{self, CallbackAction};
use super::Bridge;
use crate::client::types::{ResponseKind, ThreadData};
use crate::error::Result;
use crate::state::InterruptStatus;

/// User-state key holding the [`AwaitingResponse`] marker.
const KEY_AWAITING: &str = "awaiting_response";

/// User-state key holding the [`CalendarEditState`].
const KEY_CALENDAR: &str = "calendar_edit";

const WELCOME_TEXT: &str = "👋 Welcome to the Executive AI Assistant!\n\n\
    I'll notify you when there are any tasks that require your input.\n\n\
    Commands:\n/check - Check for new interrupts\n/help - Show this help menu";

const HELP_TEXT: &str = "📋 Executive AI Assistant Commands:\n\n\
    /check - Check for new interrupts\n/help - Show this help menu";

const NOT_AUTHORIZED: &str = "Sorry, you are not authorized to use this bot.";

const INTERRUPT_GONE: &str = "This interrupt is no longer active or has expired.";

/// What kind of typed reply the next message should be treated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum AwaitKind {
    Response,
    Edit,
    CalendarEditFlow,
}

/// Marker stored while a typed reply is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct AwaitingResponse {
    thread_id: String,
    response_type: AwaitKind,
}

// ─── Conversation State Access ───────────────────────────────────────────────

impl Bridge {
    fn awaiting(&self, user_id: u64) -> Option<AwaitingResponse> {
        // Cleared markers are stored as JSON null, which fails the decode
        // and reads as absent.
        let value = self.store.get_user_state(user_id, KEY_AWAITING)?;
        serde_json::from_value(value).ok()
    }

    fn set_awaiting(&self, user_id: u64, marker: Option<&AwaitingResponse>) -> Result<()> {
        let value = match marker {
            Some(marker) => serde_json::to_value(marker)?,
            None => Value::Null,
        };
        self.store.set_user_state(user_id, KEY_AWAITING, value)
    }

    fn calendar_edit(&self, user_id: u64) -> Option<CalendarEditState> {
        let value = self.store.get_user_state(user_id, KEY_CALENDAR)?;
        serde_json::from_value(value).ok()
    }

    fn set_calendar_edit(&self, user_id: u64, state: Option<&CalendarEditState>) -> Result<()> {
        let value = match state {
            Some(state) => serde_json::to_value(state)?,
            None => Value::Null,
        };
        self.store.set_user_state(user_id, KEY_CALENDAR, value)
    }

    fn is_admin(&self, user_id: u64) -> bool {
        self.admin_user_id != 0 && user_id == self.admin_user_id
    }

    fn stored_thread(&self, thread_id: &str) -> Option<ThreadData> {
        let record = self.store.get_interrupt(thread_id)?;
        match ThreadData::from_value(&record.data) {
            Ok(data) => Some(data),
            Err(e) => {
                error!("Stored payload for thread {thread_id} is unreadable: {e}");
                None
            }
        }
    }
}

// ─── Messages and Commands ───────────────────────────────────────────────────

/// Slash-text routing. Menu commands stay live during a calendar edit
/// (`/check` mid-flow still sweeps); only the flow's own `/keep` and
/// `/cancel` keywords pass through as step input.
fn is_menu_command(text: &str, in_calendar_flow: bool) -> bool {
    if !text.starts_with('/') {
        return false;
    }
    let word = text.trim();
    !(in_calendar_flow
        && (word.eq_ignore_ascii_case("/keep") || word.eq_ignore_ascii_case("/cancel")))
}

impl Bridge {
    pub(super) async fn handle_message(&self, msg: Message, bot: Bot) {
        let Some(user_id) = msg.from.as_ref().map(|u| u.id.0) else {
            return;
        };
        if !self.is_admin(user_id) {
            warn!(user_id, "Unauthorized message");
            let _ = bot.send_message(msg.chat.id, NOT_AUTHORIZED).await;
            return;
        }
        let Some(text) = msg.text().map(str::to_string) else {
            let _ = bot
                .send_message(msg.chat.id, "I can only process text messages.")
                .await;
            return;
        };

        if is_menu_command(&text, self.calendar_edit(user_id).is_some()) {
            self.handle_command(&text, &msg, &bot).await;
            return;
        }
        self.handle_text(user_id, msg.chat.id, &text, &bot).await;
    }

    async fn handle_command(&self, text: &str, msg: &Message, bot: &Bot) {
        let command = text.split_whitespace().next().unwrap_or("");
        match command {
            "/start" => {
                let _ = bot.send_message(msg.chat.id, WELCOME_TEXT).await;
            }
            "/help" => {
                let _ = bot.send_message(msg.chat.id, HELP_TEXT).await;
            }
            "/check" => self.cmd_check(msg, bot).await,
            _ => {
                let _ = bot
                    .send_message(msg.chat.id, "Unknown command. Use /help to see what I understand.")
                    .await;
            }
        }
    }

    /// Manual sweep: fetch interrupts, deliver each one, report a summary
    /// by editing the status message in place.
    async fn cmd_check(&self, msg: &Message, bot: &Bot) {
        let chat_id = msg.chat.id;
        let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
        let status = match bot.send_message(chat_id, "Checking for interrupts...").await {
            Ok(status) => status,
            Err(e) => {
                error!("Could not send status message: {e}");
                return;
            }
        };

        let interrupts = match self.client.fetch_interrupts().await {
            Ok(interrupts) => interrupts,
            Err(e) => {
                error!("Interrupt check failed: {e}");
                let _ = bot
                    .edit_message_text(chat_id, status.id, format!("❌ Error checking interrupts: {e}"))
                    .await;
                return;
            }
        };
        if interrupts.is_empty() {
            let _ = bot
                .edit_message_text(
                    chat_id,
                    status.id,
                    "No interrupts found. All tasks are proceeding normally.",
                )
                .await;
            return;
        }
        let _ = bot
            .edit_message_text(
                chat_id,
                status.id,
                format!("Found {} interrupt(s). Processing...", interrupts.len()),
            )
            .await;

        let mut delivered = 0usize;
        for data in &interrupts {
            match self.deliver_interrupt(chat_id, data, bot).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("Could not deliver thread {}: {e}", data.thread_id),
            }
        }
        if let Err(e) = self.store.touch_last_checked() {
            error!("Could not persist last check time: {e}");
        }

        let summary = if delivered > 0 {
            format!("✅ Processed {delivered} interrupt(s). Please respond to each one.")
        } else {
            "No actionable interrupts found.".to_string()
        };
        let _ = bot.edit_message_text(chat_id, status.id, summary).await;
    }

    /// Record an interrupt, send it as a chat message, and mark it sent.
    /// When Telegram rejects the HTML rendering, a plain stub goes out
    /// instead so the buttons still reach the user.
    pub(super) async fn deliver_interrupt(
        &self,
        chat_id: ChatId,
        data: &ThreadData,
        bot: &Bot,
    ) -> Result<()> {
        self.store.add_interrupt(&data.thread_id, data.to_value()?)?;

        let text = format::interrupt_message(data);
        let keyboard = format::response_keyboard(&data.action_type, &data.thread_id);
        let sent = match bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard.clone())
            .await
        {
            Ok(sent) => sent,
            Err(e) => {
                warn!(
                    "HTML message rejected for thread {} ({e}), sending fallback",
                    data.thread_id
                );
                let stub = format!(
                    "Thread {}: {}\n\nI couldn't properly format this message. Please check logs for details.",
                    crate::utils::short_id(&data.thread_id),
                    data.action_type
                );
                bot.send_message(chat_id, stub).reply_markup(keyboard).await?
            }
        };
        self.store.update_interrupt_status(
            &data.thread_id,
            InterruptStatus::Sent,
            Some(sent.id.0),
            Some(chat_id.0),
        )?;
        Ok(())
    }
}

// ─── Callback Buttons ────────────────────────────────────────────────────────

impl Bridge {
    pub(super) async fn handle_callback(&self, q: CallbackQuery, bot: Bot) {
        let user_id = q.from.id.0;
        if !self.is_admin(user_id) {
            warn!(user_id, "Unauthorized callback");
            let _ = bot
                .answer_callback_query(q.id)
                .text("Sorry, you are not authorized to perform this action.")
                .await;
            return;
        }
        // Stop the button spinner straight away; the real work follows.
        let _ = bot.answer_callback_query(q.id).await;

        let Some(data) = q.data.as_deref() else { return };
        let (action, thread_id) = format::parse_callback_data(data);
        debug!(?action, %thread_id, "Button pressed");
        if action == CallbackAction::Unknown {
            return;
        }

        let Some(MaybeInaccessibleMessage::Regular(message)) = q.message else {
            return;
        };
        let chat_id = message.chat.id;
        let original = message.text().unwrap_or("").to_string();

        let Some(thread) = self.stored_thread(&thread_id) else {
            warn!(%thread_id, "Callback for untracked thread");
            let _ = bot.edit_message_text(chat_id, message.id, INTERRUPT_GONE).await;
            return;
        };

        match action {
            CallbackAction::Accept => {
                self.resolve_via_button(&bot, chat_id, message.id, &original, &thread, ResponseKind::Accept)
                    .await;
            }
            CallbackAction::Ignore => {
                self.resolve_via_button(&bot, chat_id, message.id, &original, &thread, ResponseKind::Ignore)
                    .await;
            }
            CallbackAction::Respond => {
                self.request_typed_reply(&bot, chat_id, message.id, &original, user_id, &thread_id, AwaitKind::Response)
                    .await;
            }
            CallbackAction::Edit => {
                self.request_typed_reply(&bot, chat_id, message.id, &original, user_id, &thread_id, AwaitKind::Edit)
                    .await;
            }
            CallbackAction::EditCalendar => {
                self.start_calendar_edit(&bot, chat_id, message.id, &original, user_id, &thread)
                    .await;
            }
            CallbackAction::Unknown => {}
        }
    }

    /// Accept or ignore: no user input needed, resolve in place.
    async fn resolve_via_button(
        &self,
        bot: &Bot,
        chat_id: ChatId,
        message_id: MessageId,
        original: &str,
        thread: &ThreadData,
        kind: ResponseKind,
    ) {
        let (done, failed) = match kind {
            ResponseKind::Accept => (
                "✅ Approved successfully",
                "❌ Failed to approve. Please try again.",
            ),
            _ => (
                "✅ Ignored successfully",
                "❌ Failed to ignore. Please try again.",
            ),
        };
        match self
            .client
            .send_response(
                &thread.thread_id,
                kind,
                "",
                &thread.action_type,
                thread.assistant_id.as_deref(),
            )
            .await
        {
            Ok(()) => {
                self.append_status(bot, chat_id, message_id, original, done).await;
                if let Err(e) = self.store.update_interrupt_status(
                    &thread.thread_id,
                    InterruptStatus::Completed,
                    None,
                    None,
                ) {
                    error!("Could not mark thread {} completed: {e}", thread.thread_id);
                }
            }
            Err(e) => {
                warn!("{kind} failed for thread {}: {e}", thread.thread_id);
                self.append_status(bot, chat_id, message_id, original, failed).await;
            }
        }
    }

    /// Respond or edit: remember what we are waiting for, then prompt.
    async fn request_typed_reply(
        &self,
        bot: &Bot,
        chat_id: ChatId,
        message_id: MessageId,
        original: &str,
        user_id: u64,
        thread_id: &str,
        kind: AwaitKind,
    ) {
        let marker = AwaitingResponse {
            thread_id: thread_id.to_string(),
            response_type: kind,
        };
        if let Err(e) = self.set_awaiting(user_id, Some(&marker)) {
            error!("Could not record reply marker: {e}");
            let _ = bot
                .send_message(chat_id, "❌ Internal error. Please press the button again.")
                .await;
            return;
        }
        let prompt = match kind {
            AwaitKind::Edit => "✏️ Please provide your edited version:",
            _ => "✏️ Please type your response:",
        };
        self.append_status(bot, chat_id, message_id, original, prompt).await;
    }

    /// Calendar edit button: set up the flow state and show step one.
    async fn start_calendar_edit(
        &self,
        bot: &Bot,
        chat_id: ChatId,
        message_id: MessageId,
        original: &str,
        user_id: u64,
        thread: &ThreadData,
    ) {
        if thread.calendar_invite.is_empty() {
            self.append_status(
                bot,
                chat_id,
                message_id,
                original,
                "❌ Error: Calendar data is missing or invalid.",
            )
            .await;
            return;
        }

        let (state, prompt) = calendar::begin(&thread.thread_id, &thread.calendar_invite);
        let marker = AwaitingResponse {
            thread_id: thread.thread_id.clone(),
            response_type: AwaitKind::CalendarEditFlow,
        };
        if self.set_calendar_edit(user_id, Some(&state)).is_err()
            || self.set_awaiting(user_id, Some(&marker)).is_err()
        {
            error!("Could not persist calendar flow state");
            let _ = bot
                .send_message(chat_id, "❌ Internal error. Please press the button again.")
                .await;
            return;
        }
        self.edit_with_fallback(bot, chat_id, message_id, format!("{original}\n\n{prompt}"))
            .await;
    }
}

// ─── Typed Replies ───────────────────────────────────────────────────────────

impl Bridge {
    async fn handle_text(&self, user_id: u64, chat_id: ChatId, text: &str, bot: &Bot) {
        if let Some(marker) = self.awaiting(user_id) {
            self.handle_awaited_reply(user_id, chat_id, text, bot, marker).await;
            return;
        }
        // A flow state without its marker can be left behind by a crash
        // between the two writes; resynthesize the marker and keep going.
        if let Some(state) = self.calendar_edit(user_id) {
            warn!(user_id, "Recovering orphaned calendar edit session");
            let marker = AwaitingResponse {
                thread_id: state.thread_id.clone(),
                response_type: AwaitKind::CalendarEditFlow,
            };
            if self.set_awaiting(user_id, Some(&marker)).is_ok() {
                self.handle_awaited_reply(user_id, chat_id, text, bot, marker).await;
            } else if let Err(e) = self.set_calendar_edit(user_id, None) {
                error!("Could not drop orphaned calendar session: {e}");
            }
            return;
        }
        let _ = bot
            .send_message(
                chat_id,
                "I'm waiting for interrupts from your AI Assistant. Use /check to check for new interrupts.",
            )
            .await;
    }

    async fn handle_awaited_reply(
        &self,
        user_id: u64,
        chat_id: ChatId,
        text: &str,
        bot: &Bot,
        marker: AwaitingResponse,
    ) {
        if marker.response_type == AwaitKind::CalendarEditFlow {
            match self.calendar_edit(user_id) {
                Some(state) if state.thread_id == marker.thread_id => {
                    self.handle_calendar_step(user_id, chat_id, text, bot, state).await;
                }
                _ => {
                    warn!(thread_id = %marker.thread_id, "Calendar marker without flow state");
                    self.clear_conversation(user_id);
                    let _ = bot
                        .send_message(
                            chat_id,
                            "Error: Calendar editing session expired. Please try again.",
                        )
                        .await;
                }
            }
            return;
        }

        if let Err(e) = self.set_awaiting(user_id, None) {
            error!("Could not clear reply marker: {e}");
        }
        let Some(thread) = self.stored_thread(&marker.thread_id) else {
            let _ = bot.send_message(chat_id, INTERRUPT_GONE).await;
            return;
        };

        let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
        let kind = match marker.response_type {
            AwaitKind::Edit => ResponseKind::Edit,
            _ => ResponseKind::Respond,
        };
        match self
            .client
            .send_response(
                &marker.thread_id,
                kind,
                text,
                &thread.action_type,
                thread.assistant_id.as_deref(),
            )
            .await
        {
            Ok(()) => {
                let headline = match kind {
                    ResponseKind::Edit => "✅ Edit submitted successfully",
                    _ => "✅ Response sent successfully",
                };
                self.send_with_fallback(
                    bot,
                    chat_id,
                    format!(
                        "<b>{headline}</b>\n\nYour response:\n{}",
                        format::html_escape(text)
                    ),
                )
                .await;
                if let Err(e) = self.store.update_interrupt_status(
                    &marker.thread_id,
                    InterruptStatus::Completed,
                    None,
                    None,
                ) {
                    error!("Could not mark thread {} completed: {e}", marker.thread_id);
                }
            }
            Err(e) => {
                error!("Reply delivery failed for thread {}: {e}", marker.thread_id);
                let _ = bot
                    .send_message(
                        chat_id,
                        "❌ Failed to send response to the assistant. Please try again.",
                    )
                    .await;
            }
        }
    }

    async fn handle_calendar_step(
        &self,
        user_id: u64,
        chat_id: ChatId,
        text: &str,
        bot: &Bot,
        state: CalendarEditState,
    ) {
        let Some(thread) = self.stored_thread(&state.thread_id) else {
            self.clear_conversation(user_id);
            let _ = bot.send_message(chat_id, INTERRUPT_GONE).await;
            return;
        };

        match calendar::advance(&state, text) {
            StepOutcome::Cancelled => {
                self.clear_conversation(user_id);
                let _ = bot.send_message(chat_id, "Calendar editing cancelled.").await;
            }
            StepOutcome::Retry { message } => {
                let _ = bot.send_message(chat_id, message).await;
            }
            StepOutcome::Continue { next, prompt } => {
                let marker = AwaitingResponse {
                    thread_id: next.thread_id.clone(),
                    response_type: AwaitKind::CalendarEditFlow,
                };
                if self.set_calendar_edit(user_id, Some(&next)).is_err()
                    || self.set_awaiting(user_id, Some(&marker)).is_err()
                {
                    error!("Could not persist calendar flow step");
                    let _ = bot
                        .send_message(chat_id, "❌ Internal error. Please try again.")
                        .await;
                    return;
                }
                self.send_with_fallback(bot, chat_id, prompt).await;
            }
            StepOutcome::Submit { invite, summary } => {
                self.clear_conversation(user_id);
                self.send_with_fallback(bot, chat_id, summary).await;

                let content = match serde_json::to_string(&invite) {
                    Ok(content) => content,
                    Err(e) => {
                        error!("Could not serialize edited invite: {e}");
                        let _ = bot
                            .send_message(chat_id, "❌ Failed to submit calendar changes. Please try again.")
                            .await;
                        return;
                    }
                };
                match self
                    .client
                    .send_response(
                        &state.thread_id,
                        ResponseKind::Edit,
                        &content,
                        &thread.action_type,
                        thread.assistant_id.as_deref(),
                    )
                    .await
                {
                    Ok(()) => {
                        let _ = bot
                            .send_message(chat_id, "✅ Calendar changes submitted successfully!")
                            .await;
                        if let Err(e) = self.store.update_interrupt_status(
                            &state.thread_id,
                            InterruptStatus::Completed,
                            None,
                            None,
                        ) {
                            error!("Could not mark thread {} completed: {e}", state.thread_id);
                        }
                    }
                    Err(e) => {
                        error!("Calendar edit delivery failed for thread {}: {e}", state.thread_id);
                        let _ = bot
                            .send_message(chat_id, "❌ Failed to submit calendar changes. Please try again.")
                            .await;
                    }
                }
            }
        }
    }

    /// Drop both conversation markers for a user. Persist failures are
    /// logged; the next message falls back to the idle reply either way.
    fn clear_conversation(&self, user_id: u64) {
        if let Err(e) = self.set_awaiting(user_id, None) {
            error!("Could not clear reply marker: {e}");
        }
        if let Err(e) = self.set_calendar_edit(user_id, None) {
            error!("Could not clear calendar session: {e}");
        }
    }
}

// ─── Rendering Fallbacks ─────────────────────────────────────────────────────

impl Bridge {
    /// Edit a delivered message to append a bold status line, retrying
    /// without markup when Telegram rejects the HTML.
    async fn append_status(
        &self,
        bot: &Bot,
        chat_id: ChatId,
        message_id: MessageId,
        original: &str,
        status: &str,
    ) {
        self.edit_with_fallback(
            bot,
            chat_id,
            message_id,
            format!("{original}\n\n<b>{status}</b>"),
        )
        .await;
    }

    async fn edit_with_fallback(&self, bot: &Bot, chat_id: ChatId, message_id: MessageId, html: String) {
        if bot
            .edit_message_text(chat_id, message_id, html.clone())
            .parse_mode(ParseMode::Html)
            .await
            .is_ok()
        {
            return;
        }
        if let Err(e) = bot
            .edit_message_text(chat_id, message_id, format::strip_html_tags(&html))
            .await
        {
            warn!("Could not edit message {}: {e}", message_id.0);
        }
    }

    async fn send_with_fallback(&self, bot: &Bot, chat_id: ChatId, html: String) {
        if bot
            .send_message(chat_id, html.clone())
            .parse_mode(ParseMode::Html)
            .await
            .is_ok()
        {
            return;
        }
        if let Err(e) = bot
            .send_message(chat_id, format::strip_html_tags(&html))
            .await
        {
            warn!("Could not send message: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_awaiting_marker_wire_format() {
        let marker = AwaitingResponse {
            thread_id: "t-1".to_string(),
            response_type: AwaitKind::CalendarEditFlow,
        };
        let value = serde_json::to_value(&marker).unwrap();
        assert_eq!(
            value,
            json!({"thread_id": "t-1", "response_type": "calendar_edit_flow"})
        );
    }

    #[test]
    fn test_awaiting_marker_null_reads_as_absent() {
        let decoded: std::result::Result<AwaitingResponse, _> = serde_json::from_value(Value::Null);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_await_kinds_round_trip() {
        for (kind, name) in [
            (AwaitKind::Response, "response"),
            (AwaitKind::Edit, "edit"),
            (AwaitKind::CalendarEditFlow, "calendar_edit_flow"),
        ] {
            let value = serde_json::to_value(kind).unwrap();
            assert_eq!(value, json!(name));
            let back: AwaitKind = serde_json::from_value(value).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_menu_commands_stay_live_during_calendar_edit() {
        assert!(is_menu_command("/check", true));
        assert!(is_menu_command("/help", true));
        assert!(is_menu_command("/start", true));
        assert!(is_menu_command("/check", false));
    }

    #[test]
    fn test_flow_keywords_reach_an_active_calendar_edit() {
        assert!(!is_menu_command("/keep", true));
        assert!(!is_menu_command("/cancel", true));
        assert!(!is_menu_command("/KEEP", true));
        // Outside a flow the same words are ordinary (unknown) commands.
        assert!(is_menu_command("/keep", false));
        assert!(is_menu_command("/cancel", false));
    }

    #[test]
    fn test_plain_text_is_never_a_menu_command() {
        assert!(!is_menu_command("hello", false));
        assert!(!is_menu_command("check please", true));
    }
}
