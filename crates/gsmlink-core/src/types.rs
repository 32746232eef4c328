//! Shared data types for modem state and decoded notifications.

use std::fmt;

/// Snapshot of what the session has learned about the modem and its SIM.
///
/// Written by the observers running on the session's read task and read by
/// anyone through `Session::info()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemInfo {
    /// Signal strength bucket 0-5, rescaled from the raw `+CSQ` value.
    pub signal: Option<u8>,
    /// SIM ICCID reported by `+CCID`.
    pub iccid: Option<String>,
    /// Subscriber number detected in a USSD reply.
    pub phone: Option<String>,
    /// Operator name as reported by `+COPS?`.
    pub operator: Option<String>,
    /// Carrier derived from the operator name.
    pub carrier: Option<Carrier>,
}

/// A text-mode SMS read back from the modem message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    /// Message-store index the message was read from, when known.
    pub index: Option<u32>,
    /// Originating address.
    pub sender: String,
    /// Service-centre timestamp, verbatim from the modem.
    pub timestamp: String,
    /// Message body, UCS2-decoded when the payload was a UCS2 hex string.
    pub body: String,
}

/// Call-handling state of the call observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// No call in progress.
    #[default]
    Idle,
    /// A call was answered and device-side recording is running.
    Recording,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::Recording => write!(f, "recording"),
        }
    }
}

/// Mobile network operator, as far as the session can tell from `+COPS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Carrier {
    Vietnamobile,
    Viettel,
    Mobifone,
    Vinaphone,
    ITel,
    Unknown,
}

impl Carrier {
    /// Map an operator name to a carrier.
    ///
    /// Matching is a case-insensitive substring test, checked in a fixed
    /// order so that `vietnamobile` is not mistaken for `viettel`-like names.
    pub fn from_operator(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        if name.contains("vietnamobile") {
            Carrier::Vietnamobile
        } else if name.contains("viettel") {
            Carrier::Viettel
        } else if name.contains("mobifone") {
            Carrier::Mobifone
        } else if name.contains("vinaphone") || name.contains("vina") {
            Carrier::Vinaphone
        } else if name.contains("itel") {
            Carrier::ITel
        } else {
            Carrier::Unknown
        }
    }

    /// USSD code that reports the prepaid balance on this carrier.
    pub fn balance_ussd_code(&self) -> &'static str {
        match self {
            Carrier::Vinaphone => "*111#",
            _ => "*101#",
        }
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Carrier::Vietnamobile => "Vietnamobile",
            Carrier::Viettel => "Viettel",
            Carrier::Mobifone => "Mobifone",
            Carrier::Vinaphone => "Vinaphone",
            Carrier::ITel => "iTel",
            Carrier::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}
