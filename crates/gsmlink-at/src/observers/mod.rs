//! Built-in observers, attached to every session in this order: SMS, call,
//! info, USSD.

mod call;
mod info;
mod sms;
mod ussd;

pub use call::{CallConfig, CallObserver};
pub use info::InfoObserver;
pub use sms::SmsObserver;
pub use ussd::UssdObserver;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gsmlink_core::Error;

use crate::io::CommandSender;

/// Send `command` every `every` until `cancel` fires or the session stops.
///
/// The first command goes out one full period after the poller starts.
pub(crate) fn spawn_poller(
    commands: CommandSender,
    command: &'static str,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match commands.send(command).await {
                    Ok(()) => {}
                    Err(Error::NotConnected) => break,
                    Err(e) => tracing::warn!(command, error = %e, "poll command failed"),
                },
            }
        }
        tracing::debug!(command, "poller stopped");
    })
}
