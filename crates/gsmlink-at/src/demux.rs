//! Frame demultiplexer.
//!
//! Every frame cut from the byte stream is consumed by exactly one of:
//!
//! 1. the binary capture,
//! 2. a message body an observer asked to collect,
//! 3. a pending `OK` waiter (final result codes only),
//! 4. the skip list,
//! 5. a pending waiter whose key prefixes the frame,
//! 6. the USSD accumulator,
//! 7. the observers.
//!
//! Frames are routed strictly in arrival order, and fan-out for one frame
//! completes before the next frame is looked at.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use gsmlink_core::{ArtifactSink, ModemEvent};

use crate::capture::{BinaryCapture, CaptureOutcome};
use crate::io::CommandSender;
use crate::observer::{BodyEnd, Observer, ObserverContext, SharedInfo};
use crate::protocol::{classify, next_frame, Frame};
use crate::registry::{Registry, ResponseKey};
use crate::ussd::{UssdAccumulator, UssdStep};

/// Prefixes of frames dropped as protocol noise (command echoes,
/// registration reports, data-mode banners).
pub const DEFAULT_SKIP_PREFIXES: [&str; 4] = ["AT", "OK", "+CREG", "CONNECT"];

/// Longest message body collected before the collection is cut short.
const MAX_BODY_LINES: usize = 64;

/// Where a frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Empty frame, discarded.
    Empty,
    /// Handed to the pending request under this key.
    Delivered(ResponseKey),
    /// Consumed by the binary capture.
    Captured,
    /// Matched the skip list.
    Skipped,
    /// Collected into a message body.
    Body,
    /// Consumed by the USSD accumulator.
    Ussd,
    /// Fanned out to the observers.
    Observed,
}

pub struct Demultiplexer {
    buffer: BytesMut,
    skip_prefixes: Vec<String>,
    artifact_name: String,
    registry: Registry,
    capture: BinaryCapture,
    ussd: UssdAccumulator,
    body: Option<BodyCollector>,
    observers: Vec<Box<dyn Observer>>,
    info: SharedInfo,
    events: broadcast::Sender<ModemEvent>,
    artifacts: Arc<dyn ArtifactSink>,
    commands: CommandSender,
    cancel: CancellationToken,
}

impl Demultiplexer {
    pub fn new(
        registry: Registry,
        info: SharedInfo,
        events: broadcast::Sender<ModemEvent>,
        artifacts: Arc<dyn ArtifactSink>,
        commands: CommandSender,
        cancel: CancellationToken,
    ) -> Self {
        Demultiplexer {
            buffer: BytesMut::with_capacity(1024),
            skip_prefixes: DEFAULT_SKIP_PREFIXES.iter().map(|p| p.to_string()).collect(),
            artifact_name: "modem".to_string(),
            registry,
            capture: BinaryCapture::new(),
            ussd: UssdAccumulator::new(),
            body: None,
            observers: Vec::new(),
            info,
            events,
            artifacts,
            commands,
            cancel,
        }
    }

    pub fn with_skip_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.skip_prefixes = prefixes;
        self
    }

    /// Basename for completed downloads; `.wav` is appended.
    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    /// Attach an observer after those already attached.
    pub fn attach(&mut self, observer: Box<dyn Observer>) {
        tracing::debug!(observer = observer.name(), "observer attached");
        self.observers.push(observer);
    }

    /// Bytes received but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered input together with any capture, USSD reply or
    /// message body still being reassembled.
    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
        if let Some(partial) = self.capture.reset() {
            tracing::warn!(bytes = partial.len(), "binary capture abandoned");
        }
        if self.ussd.reset() {
            tracing::warn!("partial USSD reply abandoned");
        }
        if let Some(body) = self.body.take() {
            tracing::warn!(lines = body.lines.len(), "message body abandoned");
        }
    }

    /// Append `data` and route every complete frame. Returns the commands
    /// observers queued, in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);
        let mut outbox = Vec::new();
        while let Some(frame) = next_frame(&mut self.buffer) {
            let route = self.route(&frame, &mut outbox);
            tracing::trace!(
                ?route,
                len = frame.len(),
                capturing = self.capture.is_capturing(),
                "frame routed"
            );
        }
        outbox
    }

    /// Route one frame (without its terminator).
    pub fn route(&mut self, frame: &[u8], outbox: &mut Vec<String>) -> Route {
        match self.capture.offer(frame) {
            CaptureOutcome::Ignored => {}
            CaptureOutcome::Completed(payload) => {
                self.save_capture(&payload);
                return Route::Captured;
            }
            CaptureOutcome::Started => return Route::Captured,
            CaptureOutcome::Appended => {
                tracing::trace!(bytes = self.capture.captured_len(), "capture appended");
                return Route::Captured;
            }
        }

        let text = String::from_utf8_lossy(frame);

        if self.body.is_some() && self.collect_body(&text, outbox) {
            return Route::Body;
        }

        if frame.is_empty() {
            return Route::Empty;
        }

        if is_final_result(&text) && self.registry.contains(ResponseKey::Ok) {
            self.registry.deliver(ResponseKey::Ok, text.into_owned());
            return Route::Delivered(ResponseKey::Ok);
        }

        tracing::debug!(frame = %text, "received");

        if self.skip_prefixes.iter().any(|p| text.starts_with(p.as_str())) {
            tracing::trace!(frame = %text, "skipped");
            return Route::Skipped;
        }

        if let Some(key) = self.registry.match_prefix(&text) {
            if !self.registry.deliver(key, text.into_owned()) {
                tracing::debug!(%key, "waiter gone before delivery");
            }
            return Route::Delivered(key);
        }

        match self.ussd.feed(&text) {
            Some(UssdStep::Partial) => Route::Ussd,
            Some(UssdStep::Complete(reply)) => {
                self.finish_ussd(reply, outbox);
                Route::Ussd
            }
            None => {
                self.fan_out(&classify(&text), outbox);
                Route::Observed
            }
        }
    }

    /// Feed one frame to the body being collected. Returns `false` if the
    /// frame is not part of the body and must be routed normally.
    fn collect_body(&mut self, text: &str, outbox: &mut Vec<String>) -> bool {
        let Some(mut body) = self.body.take() else {
            return false;
        };
        match body.end {
            BodyEnd::NextLine => {
                body.lines.push(text.to_string());
                self.finish_body(body, outbox);
                true
            }
            // The result code ends the body and belongs to the command that
            // produced it, so it is consumed here.
            BodyEnd::FinalResult if is_final_result(text) => {
                self.finish_body(body, outbox);
                true
            }
            BodyEnd::FinalResult if body.lines.len() >= MAX_BODY_LINES => {
                tracing::warn!(lines = body.lines.len(), "message body has no end, cutting it short");
                self.finish_body(body, outbox);
                false
            }
            BodyEnd::FinalResult => {
                body.lines.push(text.to_string());
                self.body = Some(body);
                true
            }
        }
    }

    fn finish_body(&mut self, body: BodyCollector, outbox: &mut Vec<String>) {
        let mut lines = body.lines;
        while lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        let text = lines.join("\n");
        self.fan_out(&Frame::SmsBody(&text), outbox);
    }

    fn save_capture(&self, payload: &[u8]) {
        let name = format!("{}.wav", self.artifact_name);
        match self.artifacts.write_blob(&name, payload) {
            Ok(()) => {
                tracing::info!(artifact = %name, bytes = payload.len(), "recording saved");
                let _ = self.events.send(ModemEvent::RecordingSaved {
                    name,
                    bytes: payload.len(),
                });
            }
            Err(e) => tracing::error!(artifact = %name, error = %e, "failed to save recording"),
        }
    }

    fn finish_ussd(&mut self, reply: String, outbox: &mut Vec<String>) {
        if !self.registry.deliver(ResponseKey::Ussd, reply.clone()) {
            tracing::debug!(reply = %reply, "USSD reply with no waiter");
        }
        let _ = self.events.send(ModemEvent::UssdReceived {
            text: reply.clone(),
        });
        self.fan_out(&Frame::UssdReply(&reply), outbox);
    }

    fn fan_out(&mut self, frame: &Frame<'_>, outbox: &mut Vec<String>) {
        let mut body_request = None;
        for observer in self.observers.iter_mut() {
            let mut ctx = ObserverContext::new(
                outbox,
                &mut body_request,
                &self.info,
                &self.events,
                self.artifacts.as_ref(),
                &self.commands,
                &self.cancel,
            );
            observer.handle(frame, &mut ctx);
        }
        if let Some(end) = body_request {
            self.body = Some(BodyCollector {
                end,
                lines: Vec::new(),
            });
        }
    }
}

/// Lines of a message body collected on an observer's behalf.
#[derive(Debug)]
struct BodyCollector {
    end: BodyEnd,
    lines: Vec<String>,
}

/// Final result codes a pending `OK` waiter accepts.
fn is_final_result(text: &str) -> bool {
    text == "OK"
        || text == "ERROR"
        || text.starts_with("+CME ERROR")
        || text.starts_with("+CMS ERROR")
}
