//! Background interrupt polling.
//!
//! Sweeps the agent API on a fixed cadence and pushes anything new to the
//! admin chat. A thread is delivered when it is unseen, or when a previous
//! delivery attempt never got past `Pending`; threads already sent or
//! resolved are left alone so the chat is not spammed with duplicates.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::Bridge;
use crate::state::{InterruptRecord, InterruptStatus};

pub async fn run(bridge: Arc<Bridge>, interval: Duration) {
    if interval.is_zero() {
        info!("Background polling disabled");
        return;
    }
    info!("Polling for interrupts every {}s", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep(&bridge).await {
            error!("Interrupt sweep failed: {e}");
        }
    }
}

async fn sweep(bridge: &Bridge) -> crate::error::Result<()> {
    let interrupts = bridge.client.fetch_interrupts().await?;
    let chat = bridge.admin_chat();

    let mut fresh = 0usize;
    for data in &interrupts {
        let existing = bridge.store.get_interrupt(&data.thread_id);
        if !should_deliver(existing.as_ref()) {
            continue;
        }
        match bridge.deliver_interrupt(chat, data, &bridge.bot).await {
            Ok(()) => fresh += 1,
            Err(e) => error!("Could not deliver thread {}: {e}", data.thread_id),
        }
    }
    bridge.store.touch_last_checked()?;
    if fresh > 0 {
        info!("Delivered {fresh} new interrupt(s)");
    }
    Ok(())
}

/// Whether a fetched thread goes out this sweep. Unseen threads and threads
/// stuck in `Pending` from a failed earlier delivery do; anything already
/// sent or resolved stays quiet.
fn should_deliver(existing: Option<&InterruptRecord>) -> bool {
    match existing {
        None => true,
        Some(record) => record.status == InterruptStatus::Pending,
    }
}
