//! Error types for gsmlink.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Errors fall into three families:
//!
//! - **Transport** ([`Error::Transport`], [`Error::Io`], [`Error::ConnectionLost`],
//!   [`Error::NotConnected`]): the byte stream to the modem failed. Fatal to
//!   the session.
//! - **Timeout** ([`Error::Timeout`]): no matching response arrived before the
//!   deadline. Recoverable; the session keeps running.
//! - **Decode** ([`Error::Decode`]): a modem reply could not be parsed. Always
//!   recovered locally by the component that parsed it.

/// The error type for all gsmlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/write/read failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The modem answered with an error, or the wire carried something the
    /// session cannot make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A modem reply could not be decoded (bad UCS2 hex, non-numeric field).
    #[error("decode error: {0}")]
    Decode(String),

    /// Timed out waiting for a response from the modem.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the modem has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors that mean the byte stream is gone and the
    /// session cannot continue.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Io(_) | Error::ConnectionLost | Error::NotConnected
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
