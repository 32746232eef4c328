//! Transport implementations for gsmlink.
//!
//! This crate provides [`SerialTransport`], the concrete implementation of
//! the [`Transport`](gsmlink_core::Transport) trait for USB modem ports and
//! RS-232 links, plus [`available_ports`] for port enumeration.
//!
//! # Example
//!
//! ```no_run
//! use gsmlink_transport::SerialTransport;
//! use gsmlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> gsmlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB2", 115_200).await?;
//!
//! transport.send(b"AT+CSQ\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{
    available_ports, DataBits, FlowControl, Parity, PortEntry, SerialConfig, SerialTransport,
    StopBits,
};
