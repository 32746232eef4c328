//! Incoming-call handling: answer, record on the device, hang up.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use gsmlink_core::{CallState, ModemEvent};

use crate::commands;
use crate::observer::{Observer, ObserverContext};
use crate::observers::spawn_poller;
use crate::protocol::Frame;

/// Settings for [`CallObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallConfig {
    /// Device-side file the call is recorded into.
    pub recording_path: String,
    /// Maximum recording length passed to `AT+QAUDRD`.
    pub recording_duration_secs: u32,
    /// Optional trailing `AT+QAUDRD` argument.
    pub recording_flag: Option<u8>,
    /// Period of the `AT+CLCC` poll while recording. `None` disables it.
    pub poll_interval: Option<Duration>,
    /// Download the recording with `AT+QFDWL` once the call ends.
    pub download_after_call: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            recording_path: "RAM:record.wav".to_string(),
            recording_duration_secs: 600,
            recording_flag: None,
            poll_interval: Some(Duration::from_secs(5)),
            download_after_call: false,
        }
    }
}

impl CallConfig {
    /// Name passed to `AT+QFDWL`, which appends `.wav` itself.
    pub fn download_name(&self) -> &str {
        self.recording_path
            .strip_suffix(".wav")
            .unwrap_or(&self.recording_path)
    }
}

#[derive(Debug)]
pub struct CallObserver {
    config: CallConfig,
    state: CallState,
    started: Option<Instant>,
    poller: Option<CancellationToken>,
}

impl CallObserver {
    pub fn new(config: CallConfig) -> Self {
        CallObserver {
            config,
            state: CallState::Idle,
            started: None,
            poller: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    fn set_state(&mut self, state: CallState, ctx: &ObserverContext<'_>) {
        self.state = state;
        ctx.emit(ModemEvent::CallStateChanged { state });
    }

    fn answer(&mut self, ctx: &mut ObserverContext<'_>) {
        tracing::info!("incoming call, answering and recording");
        ctx.send(commands::ANSWER);
        ctx.send(commands::start_recording(
            &self.config.recording_path,
            self.config.recording_duration_secs,
            self.config.recording_flag,
        ));
        self.started = Some(Instant::now());
        self.set_state(CallState::Recording, ctx);

        if let Some(every) = self.config.poll_interval {
            let token = ctx.child_token();
            spawn_poller(ctx.commands(), commands::LIST_CALLS, every, token.clone());
            self.poller = Some(token);
        }
    }

    fn hang_up(&mut self, reason: &str, ctx: &mut ObserverContext<'_>) {
        let duration = self.started.take().map(|t| t.elapsed());
        tracing::info!(reason, ?duration, "call ended, stopping recording");
        ctx.send(commands::STOP_RECORDING);
        ctx.send(commands::HANG_UP);
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        self.set_state(CallState::Idle, ctx);

        if self.config.download_after_call {
            ctx.send(commands::download_file(self.config.download_name()));
        }
    }
}

impl Observer for CallObserver {
    fn name(&self) -> &'static str {
        "call"
    }

    fn handle(&mut self, frame: &Frame<'_>, ctx: &mut ObserverContext<'_>) {
        match (frame, self.state) {
            (Frame::Ring, CallState::Idle) => self.answer(ctx),
            (Frame::Ring, CallState::Recording) => tracing::trace!("RING while recording"),
            (Frame::NoCarrier, CallState::Recording) => self.hang_up("NO CARRIER", ctx),
            (Frame::Error, CallState::Recording) => self.hang_up("ERROR", ctx),
            (Frame::CallList(line), CallState::Recording) => {
                tracing::debug!(status = %line, "call status");
            }
            (Frame::CallList(line), CallState::Idle) => {
                tracing::trace!(status = %line, "call status while idle");
            }
            _ => {}
        }
    }
}

impl Drop for CallObserver {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Request;
    use crate::observers::testing::Harness;

    fn no_poll() -> CallConfig {
        CallConfig {
            poll_interval: None,
            ..CallConfig::default()
        }
    }

    #[tokio::test]
    async fn ring_answers_and_starts_recording() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(no_poll());
        h.line(&mut call, "RING");
        assert_eq!(
            h.sent(),
            vec!["ATA", "AT+QAUDRD=1,\"RAM:record.wav\",600"]
        );
        assert_eq!(call.state(), CallState::Recording);
        assert!(matches!(
            h.drain_events().as_slice(),
            [ModemEvent::CallStateChanged {
                state: CallState::Recording
            }]
        ));
    }

    #[tokio::test]
    async fn repeated_ring_is_ignored() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(no_poll());
        h.line(&mut call, "RING");
        h.sent();
        h.line(&mut call, "RING");
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn no_carrier_stops_recording_and_hangs_up() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(no_poll());
        h.line(&mut call, "RING");
        h.sent();
        h.line(&mut call, "NO CARRIER");
        assert_eq!(h.sent(), vec!["AT+QAUDRD=0", "ATH"]);
        assert_eq!(call.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn error_while_recording_ends_call() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(no_poll());
        h.line(&mut call, "RING");
        h.sent();
        h.line(&mut call, "ERROR");
        assert_eq!(h.sent(), vec!["AT+QAUDRD=0", "ATH"]);
        assert_eq!(call.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn hangup_frames_while_idle_do_nothing() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(no_poll());
        h.line(&mut call, "NO CARRIER");
        h.line(&mut call, "ERROR");
        h.line(&mut call, "+CLCC: 1,1,0,0,0,\"0901234567\",129");
        assert!(h.sent().is_empty());
        assert_eq!(call.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn download_after_call() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(CallConfig {
            download_after_call: true,
            ..no_poll()
        });
        h.line(&mut call, "RING");
        h.sent();
        h.line(&mut call, "NO CARRIER");
        assert_eq!(
            h.sent(),
            vec!["AT+QAUDRD=0", "ATH", "AT+QFDWL=\"RAM:record.wav\";"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poller_runs_only_while_recording() {
        let mut h = Harness::new();
        let mut call = CallObserver::new(CallConfig {
            poll_interval: Some(Duration::from_secs(5)),
            ..CallConfig::default()
        });
        h.line(&mut call, "RING");

        match h.requests.recv().await {
            Some(Request::Write { bytes, reply }) => {
                assert_eq!(bytes, b"AT+CLCC\r\n");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            _ => panic!("expected a poll"),
        }

        h.line(&mut call, "NO CARRIER");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.requests.try_recv().is_err());
    }

    #[test]
    fn download_name_strips_extension() {
        assert_eq!(CallConfig::default().download_name(), "RAM:record");
        let config = CallConfig {
            recording_path: "UFS:call".into(),
            ..CallConfig::default()
        };
        assert_eq!(config.download_name(), "UFS:call");
    }
}
