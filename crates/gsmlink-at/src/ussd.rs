//! Reassembly of `+CUSD:` replies.
//!
//! A USSD reply arrives as `+CUSD: <m>,"<text>",<dcs>`. Menu replies carry
//! line breaks inside the quoted text, so the CRLF framing splits them over
//! several frames: the first frame holds only the opening quote and a
//! later frame holds the closing one.

/// Marker of a USSD reply frame.
pub const USSD_MARKER: &str = "+CUSD:";

/// Result of feeding a frame to the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UssdStep {
    /// The frame was absorbed; more frames are needed.
    Partial,
    /// The reply is complete. The text is trimmed and unquoted.
    Complete(String),
}

/// Accumulator state: `None` while idle, the text so far while a reply is
/// being reassembled.
#[derive(Debug, Default)]
pub struct UssdAccumulator {
    partial: Option<String>,
}

impl UssdAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accumulating(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one frame.
    ///
    /// Returns `None` when the frame is neither a `+CUSD:` reply nor a
    /// continuation of one, leaving it for normal routing.
    pub fn feed(&mut self, frame: &str) -> Option<UssdStep> {
        if frame.contains(USSD_MARKER) {
            Some(self.open(frame))
        } else if self.is_accumulating() {
            Some(self.continue_with(frame))
        } else {
            None
        }
    }

    fn open(&mut self, frame: &str) -> UssdStep {
        if let Some(stale) = self.partial.take() {
            tracing::warn!(partial = %stale.trim(), "new USSD reply before previous one closed");
        }

        let first = frame.find('"');
        let last = frame.rfind('"');
        match (first, last) {
            (Some(first), Some(last)) if first < last => {
                UssdStep::Complete(frame[first + 1..last].trim().to_string())
            }
            (Some(first), _) => {
                self.partial = Some(format!("{}\n", &frame[first + 1..]));
                UssdStep::Partial
            }
            (None, _) => {
                tracing::warn!(frame, "USSD reply without payload");
                UssdStep::Complete(String::new())
            }
        }
    }

    fn continue_with(&mut self, frame: &str) -> UssdStep {
        let Some(partial) = self.partial.as_mut() else {
            return UssdStep::Partial;
        };
        match frame.find('"') {
            Some(close) => {
                partial.push_str(&frame[..close]);
                let text = partial.trim().to_string();
                self.partial = None;
                UssdStep::Complete(text)
            }
            None => {
                partial.push_str(frame);
                partial.push('\n');
                UssdStep::Partial
            }
        }
    }

    /// Drop any partial reply. Returns whether one was open.
    pub fn reset(&mut self) -> bool {
        self.partial.take().is_some()
    }
}
