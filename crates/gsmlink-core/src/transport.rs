//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the duplex byte stream to a modem.
//! The session engine in `gsmlink-at` operates on a `Transport` rather than
//! directly on a serial port, enabling both real hardware control and
//! deterministic unit testing with `MockTransport` from the
//! `gsmlink-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a modem.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Framing (CRLF lines, binary downloads) is handled by the session
/// that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying port.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline. Any other error means the
    /// stream is gone.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
