//! # gsmlink -- AT-command control of cellular modems
//!
//! `gsmlink` drives a cellular modem over a serial link: it correlates AT
//! commands with their delayed replies, reads incoming SMS, answers and
//! records calls, runs USSD queries and pulls recorded audio off the
//! device.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gsmlink::{FsArtifactSink, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let builder = SessionBuilder::new()
//!         .artifact_name("ttyUSB2")
//!         .artifact_sink(FsArtifactSink::new("."));
//!     let session = gsmlink::open_serial("/dev/ttyUSB2", 115_200, builder).await?;
//!
//!     println!("{:?}", session.info());
//!     let balance = session.send_ussd("*101#").await?;
//!     println!("{balance}");
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `gsmlink-core`         | `Transport` and `ArtifactSink` traits, types, errors |
//! | `gsmlink-transport`    | Serial transport and port enumeration            |
//! | `gsmlink-at`           | Session engine: framing, request correlation, observers |
//! | **`gsmlink`**          | This facade crate -- re-exports everything       |
//!
//! ## Events
//!
//! ```no_run
//! use gsmlink::{ModemEvent, Session};
//! # async fn example(session: &Session) {
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let ModemEvent::SmsReceived(sms) = event {
//!         println!("{}: {}", sms.sender, sms.body);
//!     }
//! }
//! # }
//! ```

pub use gsmlink_core::*;

pub use gsmlink_at::{
    commands, CallConfig, Observer, ObserverContext, ResponseKey, Session, SessionBuilder,
    SessionConfig,
};

/// The session engine.
pub mod at {
    pub use gsmlink_at::*;
}

/// Serial transport.
#[cfg(feature = "serial")]
pub mod serial {
    pub use gsmlink_transport::*;

    /// Last path component of a port name, so `/dev/ttyUSB2` becomes
    /// `ttyUSB2` and `\\.\COM12` becomes `COM12`.
    pub fn port_basename(port: &str) -> &str {
        port.rsplit(['/', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or(port)
    }
}

/// Open `port` at `baud_rate` and start a session on it.
///
/// Unless the builder already names its artifacts, downloads are saved
/// under the port's basename.
#[cfg(feature = "serial")]
pub async fn open_serial(port: &str, baud_rate: u32, builder: SessionBuilder) -> Result<Session> {
    let builder = if builder.config().artifact_name == SessionConfig::default().artifact_name {
        builder.artifact_name(serial::port_basename(port))
    } else {
        builder
    };
    let transport = gsmlink_transport::SerialTransport::open(port, baud_rate).await?;
    builder.build_with_transport(Box::new(transport)).await
}
