//! Binary capture of file downloads multiplexed into the line stream.
//!
//! `AT+QFDWL` makes the modem dump a file (a WAV recording) straight into
//! the AT stream and finish with a `+QFDWL: <size>,<checksum>` line. The
//! capture starts at a frame beginning with `RIFF` and ends at the first
//! later frame containing `+QFDWL`. `RIFF` elsewhere in a line (a USSD
//! reply quoting a "TARIFF", say) is ordinary text.
//!
//! Frames reach the capture already split at CRLF, so a CRLF pair inside
//! the audio payload is lost. That is a limitation of the wire format and
//! is kept as is.

use bytes::{Bytes, BytesMut};

use crate::protocol::find;

/// Marker that opens a capture (start of a WAV container).
pub const START_MARKER: &[u8] = b"RIFF";
/// Marker that closes a capture (the download status line).
pub const END_MARKER: &[u8] = b"+QFDWL";

/// What the capture did with an offered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Not capturing and the frame does not open a capture. The frame is
    /// left for normal routing.
    Ignored,
    /// The frame opened a capture.
    Started,
    /// The frame was appended to the capture in progress.
    Appended,
    /// The frame closed the capture; the payload is complete.
    Completed(Bytes),
}

/// Two-state machine: idle when `buffer` is `None`, capturing otherwise.
#[derive(Debug, Default)]
pub struct BinaryCapture {
    buffer: Option<BytesMut>,
}

impl BinaryCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bytes accumulated so far.
    pub fn captured_len(&self) -> usize {
        self.buffer.as_ref().map_or(0, BytesMut::len)
    }

    /// Offer one frame (without its terminator) to the capture.
    pub fn offer(&mut self, frame: &[u8]) -> CaptureOutcome {
        match self.buffer.as_mut() {
            None if frame.starts_with(START_MARKER) => {
                self.buffer = Some(BytesMut::from(frame));
                tracing::debug!("binary capture started");
                CaptureOutcome::Started
            }
            None => CaptureOutcome::Ignored,
            Some(buffer) => match find(frame, END_MARKER) {
                Some(end) => {
                    buffer.extend_from_slice(&frame[end..]);
                    let payload = self.buffer.take().unwrap_or_default().freeze();
                    tracing::debug!(bytes = payload.len(), "binary capture completed");
                    CaptureOutcome::Completed(payload)
                }
                None => {
                    buffer.extend_from_slice(frame);
                    CaptureOutcome::Appended
                }
            },
        }
    }

    /// Abandon a capture in progress, returning what was collected.
    pub fn reset(&mut self) -> Option<Bytes> {
        self.buffer.take().map(BytesMut::freeze)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_ignores_ordinary_frames() {
        let mut capture = BinaryCapture::new();
        assert_eq!(capture.offer(b"+CSQ: 20,99"), CaptureOutcome::Ignored);
        assert!(!capture.is_capturing());
    }

    #[test]
    fn three_frame_download() {
        let mut capture = BinaryCapture::new();
        assert_eq!(capture.offer(b"RIFFxxxx"), CaptureOutcome::Started);
        assert_eq!(capture.offer(b"\x00\x01\x02"), CaptureOutcome::Appended);
        let done = capture.offer(b"\xff\xfe+QFDWLtail");
        assert_eq!(
            done,
            CaptureOutcome::Completed(Bytes::from_static(b"RIFFxxxx\x00\x01\x02+QFDWLtail"))
        );
        assert!(!capture.is_capturing());
    }

    #[test]
    fn riff_inside_a_line_does_not_start_capture() {
        let mut capture = BinaryCapture::new();
        assert_eq!(
            capture.offer(br#"+CUSD: 0,"Goi cuoc TARIFF A: 1000d",15"#),
            CaptureOutcome::Ignored
        );
        assert_eq!(capture.offer(b"CONNECT RIFF\x10"), CaptureOutcome::Ignored);
        assert!(!capture.is_capturing());
    }

    #[test]
    fn riff_inside_capture_is_payload() {
        let mut capture = BinaryCapture::new();
        capture.offer(b"RIFF");
        assert_eq!(capture.offer(b"RIFF again"), CaptureOutcome::Appended);
        assert_eq!(capture.captured_len(), 14);
    }

    #[test]
    fn opening_frame_does_not_close_capture() {
        let mut capture = BinaryCapture::new();
        assert_eq!(capture.offer(b"RIFF+QFDWL"), CaptureOutcome::Started);
        assert!(capture.is_capturing());
    }

    #[test]
    fn embedded_crlf_is_dropped_from_payload() {
        // The payload "ab\r\ncd" reaches the capture as two frames; the CRLF
        // between them never comes back.
        let mut capture = BinaryCapture::new();
        capture.offer(b"RIFFab");
        capture.offer(b"cd");
        match capture.offer(b"+QFDWL: 8,0") {
            CaptureOutcome::Completed(payload) => {
                assert_eq!(&payload[..], b"RIFFabcd+QFDWL: 8,0");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn reset_abandons_capture() {
        let mut capture = BinaryCapture::new();
        capture.offer(b"RIFF1234");
        assert_eq!(capture.reset(), Some(Bytes::from_static(b"RIFF1234")));
        assert!(!capture.is_capturing());
        assert!(capture.reset().is_none());
    }
}
