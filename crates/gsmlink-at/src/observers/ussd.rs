//! Subscriber-number detection in USSD replies.
//!
//! The demultiplexer reassembles `+CUSD:` replies and hands the completed
//! text to observers as [`Frame::UssdReply`], whether or not a caller was
//! waiting for it.

use gsmlink_core::ModemEvent;

use crate::commands;
use crate::observer::{Observer, ObserverContext};
use crate::protocol::Frame;

#[derive(Debug, Default)]
pub struct UssdObserver;

impl UssdObserver {
    pub fn new() -> Self {
        UssdObserver
    }
}

impl Observer for UssdObserver {
    fn name(&self) -> &'static str {
        "ussd"
    }

    fn handle(&mut self, frame: &Frame<'_>, ctx: &mut ObserverContext<'_>) {
        let Frame::UssdReply(text) = frame else {
            return;
        };
        tracing::info!(reply = %text, "USSD reply");

        let Some(number) = commands::find_phone_number(text) else {
            return;
        };
        let number = number.to_string();
        let previous = ctx.update_info(|info| info.phone.replace(number.clone()));
        if previous.as_deref() != Some(number.as_str()) {
            tracing::info!(%number, "subscriber number detected");
            ctx.emit(ModemEvent::PhoneNumberDetected { number });
        }
    }
}
