//! gsmlink-test-harness: Test utilities for gsmlink.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! session engine without a real modem, and [`MemoryArtifactSink`] for
//! asserting on downloaded audio and decoded SMS artifacts.

pub mod mock_serial;
pub mod recorder;

pub use mock_serial::{MockHandle, MockTransport};
pub use recorder::{Artifact, MemoryArtifactSink};
