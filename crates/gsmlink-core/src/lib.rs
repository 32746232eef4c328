//! gsmlink-core: Core traits, types, and error definitions for gsmlink.
//!
//! This crate defines the modem-agnostic abstractions the session engine
//! is built on. Applications depend on these types without pulling in a
//! specific transport.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`ArtifactSink`] -- destination for downloaded audio and decoded SMS
//! - [`ModemEvent`] -- asynchronous notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod artifact;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use gsmlink_core::*`.
pub use artifact::{ArtifactSink, FsArtifactSink, NullArtifactSink};
pub use error::{Error, Result};
pub use events::ModemEvent;
pub use transport::Transport;
pub use types::*;
