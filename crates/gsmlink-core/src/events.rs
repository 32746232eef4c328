//! Asynchronous modem event types.
//!
//! Events are emitted by the session through a [`tokio::sync::broadcast`]
//! channel as the observers process unsolicited traffic. Applications
//! subscribe to these events instead of polling `Session::info()`.

use crate::types::{CallState, SmsMessage};

/// An event emitted by the session when something happens on the modem.
///
/// Subscribe via `Session::subscribe()`. Events are delivered on a
/// best-effort basis through a bounded broadcast channel; slow consumers
/// may miss events under heavy load.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    /// A new SMS was read from the message store.
    SmsReceived(SmsMessage),

    /// Signal strength changed.
    SignalChanged {
        /// Bucket 0-5.
        bars: u8,
    },

    /// The SIM ICCID was reported.
    IccidChanged {
        iccid: String,
    },

    /// A subscriber phone number was found in a USSD reply.
    PhoneNumberDetected {
        number: String,
    },

    /// A USSD reply arrived.
    UssdReceived {
        text: String,
    },

    /// The call observer changed state.
    CallStateChanged {
        state: CallState,
    },

    /// A binary download completed and was handed to the artifact sink.
    RecordingSaved {
        /// Artifact name the payload was written under.
        name: String,
        /// Size of the payload in bytes.
        bytes: usize,
    },

    /// The byte stream to the modem was lost or closed.
    Disconnected,
}
