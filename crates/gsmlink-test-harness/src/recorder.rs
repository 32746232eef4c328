//! In-memory artifact sink for assertions in tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gsmlink_core::artifact::ArtifactSink;
use gsmlink_core::error::Result;

/// One artifact captured by [`MemoryArtifactSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Blob { name: String, data: Vec<u8> },
    Text { name: String, text: String },
}

/// [`ArtifactSink`] that keeps every artifact in memory.
///
/// Clones share the same storage, so a test can keep one clone while the
/// session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactSink {
    artifacts: Arc<Mutex<Vec<Artifact>>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Artifact>> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything written so far, in write order.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.lock().clone()
    }

    /// Binary artifacts only.
    pub fn blobs(&self) -> Vec<(String, Vec<u8>)> {
        self.lock()
            .iter()
            .filter_map(|a| match a {
                Artifact::Blob { name, data } => Some((name.clone(), data.clone())),
                Artifact::Text { .. } => None,
            })
            .collect()
    }

    /// Text artifacts only.
    pub fn texts(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .filter_map(|a| match a {
                Artifact::Text { name, text } => Some((name.clone(), text.clone())),
                Artifact::Blob { .. } => None,
            })
            .collect()
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn write_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        self.lock().push(Artifact::Blob {
            name: name.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn write_text(&self, name: &str, text: &str) -> Result<()> {
        self.lock().push(Artifact::Text {
            name: name.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
