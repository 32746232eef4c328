//! gsmlink-at: AT-command session engine for cellular modems.
//!
//! A [`Session`] owns the byte stream to one modem. Its IO task frames the
//! stream at CRLF, diverts embedded file downloads into a binary capture,
//! reassembles USSD replies, hands replies to waiting façade calls and fans
//! everything else out to [`Observer`]s that read SMS, answer calls and
//! track signal and SIM details.
//!
//! # Architecture
//!
//! - [`protocol`] -- CRLF framing and frame classification
//! - [`commands`] -- AT command builders and reply parsers
//! - [`registry`] -- pending-request table keyed by [`ResponseKey`]
//! - [`capture`] -- `RIFF` ... `+QFDWL` binary download capture
//! - [`ussd`] -- multi-line `+CUSD:` reassembly
//! - [`demux`] -- routes each frame to exactly one consumer
//! - [`observer`] / [`observers`] -- unsolicited-traffic handlers
//! - [`session`] / [`builder`] -- the command façade and its configuration

pub mod builder;
pub mod capture;
pub mod commands;
pub mod demux;
mod io;
pub mod observer;
pub mod observers;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod ucs2;
pub mod ussd;

pub use builder::{SessionBuilder, SessionConfig};
pub use io::CommandSender;
pub use observer::{BodyEnd, Observer, ObserverContext, SharedInfo};
pub use observers::CallConfig;
pub use protocol::{classify, Frame};
pub use registry::ResponseKey;
pub use session::Session;
