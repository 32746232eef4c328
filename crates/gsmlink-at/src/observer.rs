//! The observer seam.
//!
//! Frames not claimed by a pending request, the binary capture or the USSD
//! accumulator are fanned out to every attached [`Observer`] in attachment
//! order. An observer never sees the session itself. It gets an
//! [`ObserverContext`] through which it can queue follow-up commands,
//! update the shared [`ModemInfo`], publish events and hand off artifacts.

use std::sync::{Arc, PoisonError, RwLock};

use gsmlink_core::{ArtifactSink, ModemEvent, ModemInfo};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::io::CommandSender;
use crate::protocol::Frame;

/// A passive handler for unsolicited modem traffic.
///
/// `handle` runs on the session's read task and must not block. Anything
/// that waits (periodic polls, delayed follow-ups) is spawned onto its own
/// task using [`ObserverContext::commands`].
pub trait Observer: Send {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Process one frame. Frames the observer does not care about are
    /// ignored.
    fn handle(&mut self, frame: &Frame<'_>, ctx: &mut ObserverContext<'_>);
}

/// What the session knows about the modem, shared between the read task
/// (writer) and façade callers (readers).
#[derive(Debug, Clone, Default)]
pub struct SharedInfo(Arc<RwLock<ModemInfo>>);

impl SharedInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> ModemInfo {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ModemInfo) -> R) -> R {
        let mut info = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut info)
    }
}

/// How a message body requested with [`ObserverContext::collect_body`]
/// ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// At the final result code of the command (`+CMGR` replies).
    FinalResult,
    /// After exactly one more line (`+CMT` deliveries).
    NextLine,
}

/// Capabilities handed to an observer for the duration of one frame.
pub struct ObserverContext<'a> {
    outbox: &'a mut Vec<String>,
    body: &'a mut Option<BodyEnd>,
    info: &'a SharedInfo,
    events: &'a broadcast::Sender<ModemEvent>,
    artifacts: &'a dyn ArtifactSink,
    commands: &'a CommandSender,
    cancel: &'a CancellationToken,
}

impl<'a> ObserverContext<'a> {
    pub(crate) fn new(
        outbox: &'a mut Vec<String>,
        body: &'a mut Option<BodyEnd>,
        info: &'a SharedInfo,
        events: &'a broadcast::Sender<ModemEvent>,
        artifacts: &'a dyn ArtifactSink,
        commands: &'a CommandSender,
        cancel: &'a CancellationToken,
    ) -> Self {
        ObserverContext {
            outbox,
            body,
            info,
            events,
            artifacts,
            commands,
            cancel,
        }
    }

    /// Queue a command. Queued commands are written in order once the
    /// current chunk of input has been routed.
    pub fn send(&mut self, command: impl Into<String>) {
        self.outbox.push(command.into());
    }

    /// Claim the lines following the current frame as a message body.
    ///
    /// They bypass normal routing (a body reading "OK" or "RING" is still a
    /// body) and come back to every observer as one [`Frame::SmsBody`].
    pub fn collect_body(&mut self, end: BodyEnd) {
        *self.body = Some(end);
    }

    pub fn info(&self) -> ModemInfo {
        self.info.snapshot()
    }

    pub fn update_info<R>(&self, f: impl FnOnce(&mut ModemInfo) -> R) -> R {
        self.info.update(f)
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ModemEvent) {
        let _ = self.events.send(event);
    }

    pub fn artifacts(&self) -> &dyn ArtifactSink {
        self.artifacts
    }

    /// A sender for commands issued from spawned tasks.
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    /// A token cancelled when the session stops.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}
