//! Artifact-write collaborator.
//!
//! The session hands completed binary downloads and decoded SMS text to an
//! [`ArtifactSink`]. How they are persisted is up to the sink; the library
//! ships [`FsArtifactSink`] (one file per artifact) and [`NullArtifactSink`].

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Destination for completed downloads and decoded messages.
///
/// Called synchronously from the session's read task, so implementations
/// should return quickly.
pub trait ArtifactSink: Send + Sync {
    /// Persist a completed binary download under `name`.
    fn write_blob(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Persist decoded text (an SMS body) under `name`.
    fn write_text(&self, name: &str, text: &str) -> Result<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullArtifactSink;

impl ArtifactSink for NullArtifactSink {
    fn write_blob(&self, _name: &str, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn write_text(&self, _name: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Sink that writes each artifact to a file inside a directory.
///
/// Blobs are written verbatim under `name`; text is written to
/// `name.txt`.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    /// Create a sink writing into `dir`. The directory must already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory artifacts are written into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for FsArtifactSink {
    fn write_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.dir.join(name);
        std::fs::write(&path, data)?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "artifact written");
        Ok(())
    }

    fn write_text(&self, name: &str, text: &str) -> Result<()> {
        let path = self.dir.join(format!("{name}.txt"));
        std::fs::write(&path, text)?;
        tracing::debug!(path = %path.display(), "text artifact written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_sink_writes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path());
        sink.write_blob("ttyUSB2.wav", b"RIFF\x00\x01+QFDWL").unwrap();
        let written = std::fs::read(dir.path().join("ttyUSB2.wav")).unwrap();
        assert_eq!(written, b"RIFF\x00\x01+QFDWL");
    }

    #[test]
    fn fs_sink_writes_text_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path());
        sink.write_text("sms-5", "hello").unwrap();
        let written = std::fs::read_to_string(dir.path().join("sms-5.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[test]
    fn fs_sink_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path().join("does-not-exist"));
        let err = sink.write_blob("x.wav", b"RIFF").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn null_sink_accepts_everything() {
        let sink = NullArtifactSink;
        assert!(sink.write_blob("a", b"b").is_ok());
        assert!(sink.write_text("a", "b").is_ok());
    }
}
