//! SessionBuilder -- fluent builder for constructing [`Session`] instances.
//!
//! Separates configuration from construction so that callers can set
//! timeouts, call handling and artifact storage before the IO task starts.
//!
//! # Example
//!
//! ```no_run
//! use gsmlink_at::SessionBuilder;
//! use gsmlink_core::FsArtifactSink;
//! use std::time::Duration;
//!
//! # async fn example(transport: Box<dyn gsmlink_core::Transport>) -> gsmlink_core::Result<()> {
//! let session = SessionBuilder::new()
//!     .artifact_name("ttyUSB2")
//!     .artifact_sink(FsArtifactSink::new("/var/lib/gsmlink"))
//!     .ussd_timeout(Duration::from_secs(30))
//!     .build_with_transport(transport)
//!     .await?;
//! println!("{:?}", session.info());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use gsmlink_core::{ArtifactSink, Error, NullArtifactSink, Result, Transport};

use crate::demux::DEFAULT_SKIP_PREFIXES;
use crate::observer::Observer;
use crate::observers::CallConfig;
use crate::session::Session;

/// Session settings. [`SessionConfig::default`] gives the values used by
/// [`SessionBuilder::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Timeout of [`Session::send_and_wait_ok`].
    pub ok_timeout: Duration,
    /// Timeout of the data queries issued by the session itself.
    pub data_timeout: Duration,
    /// How long [`Session::send_ussd`] waits for the reply.
    pub ussd_timeout: Duration,
    /// Delay between writing a USSD request and starting the wait.
    pub ussd_settle: Duration,
    /// Prefixes of frames discarded as noise.
    pub skip_prefixes: Vec<String>,
    /// Basename of downloaded recordings; `.wav` is appended.
    pub artifact_name: String,
    /// Incoming-call handling.
    pub call: CallConfig,
    /// Period of the background `AT+CSQ` poll. `None` disables it.
    pub signal_poll_interval: Option<Duration>,
    /// Balance USSD code, overriding the carrier default.
    pub balance_ussd: Option<String>,
    /// Timeout of a single transport read.
    pub read_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Run the initialisation sequence when the session starts.
    pub initialize: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ok_timeout: Duration::from_secs(1),
            data_timeout: Duration::from_secs(5),
            ussd_timeout: Duration::from_secs(60),
            ussd_settle: Duration::from_secs(1),
            skip_prefixes: DEFAULT_SKIP_PREFIXES.iter().map(|p| p.to_string()).collect(),
            artifact_name: "modem".to_string(),
            call: CallConfig::default(),
            signal_poll_interval: None,
            balance_ussd: None,
            read_timeout: Duration::from_millis(100),
            event_capacity: 256,
            initialize: true,
        }
    }
}

/// Fluent builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    artifacts: Arc<dyn ArtifactSink>,
    observers: Vec<Box<dyn Observer>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a builder with default settings and an artifact sink that
    /// discards everything.
    pub fn new() -> Self {
        Self::from_config(SessionConfig::default())
    }

    pub fn from_config(config: SessionConfig) -> Self {
        SessionBuilder {
            config,
            artifacts: Arc::new(NullArtifactSink),
            observers: Vec::new(),
        }
    }

    /// Timeout for `OK` acknowledgements (default: 1s).
    pub fn ok_timeout(mut self, timeout: Duration) -> Self {
        self.config.ok_timeout = timeout;
        self
    }

    /// Timeout for the ICCID, operator and signal queries (default: 5s).
    pub fn data_timeout(mut self, timeout: Duration) -> Self {
        self.config.data_timeout = timeout;
        self
    }

    /// Timeout for USSD replies (default: 60s).
    pub fn ussd_timeout(mut self, timeout: Duration) -> Self {
        self.config.ussd_timeout = timeout;
        self
    }

    /// Delay before waiting for a USSD reply (default: 1s).
    pub fn ussd_settle(mut self, delay: Duration) -> Self {
        self.config.ussd_settle = delay;
        self
    }

    /// Replace the skip list.
    pub fn skip_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.skip_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Basename for downloaded recordings, typically the port name.
    pub fn artifact_name(mut self, name: &str) -> Self {
        self.config.artifact_name = name.to_string();
        self
    }

    /// Where downloads and SMS bodies are stored.
    pub fn artifact_sink(mut self, sink: impl ArtifactSink + 'static) -> Self {
        self.artifacts = Arc::new(sink);
        self
    }

    /// Device-side recording file (default: `RAM:record.wav`).
    pub fn recording_path(mut self, path: &str) -> Self {
        self.config.call.recording_path = path.to_string();
        self
    }

    /// Maximum recording length in seconds (default: 600).
    pub fn recording_duration_secs(mut self, secs: u32) -> Self {
        self.config.call.recording_duration_secs = secs;
        self
    }

    /// Trailing `AT+QAUDRD` argument (default: none).
    pub fn recording_flag(mut self, flag: Option<u8>) -> Self {
        self.config.call.recording_flag = flag;
        self
    }

    /// `AT+CLCC` poll period during calls (default: 5s, `None` disables).
    pub fn call_poll_interval(mut self, every: Option<Duration>) -> Self {
        self.config.call.poll_interval = every;
        self
    }

    /// Download the recording when a call ends (default: off).
    pub fn download_after_call(mut self, enabled: bool) -> Self {
        self.config.call.download_after_call = enabled;
        self
    }

    /// Background `AT+CSQ` poll period (default: off).
    pub fn signal_poll_interval(mut self, every: Option<Duration>) -> Self {
        self.config.signal_poll_interval = every;
        self
    }

    /// Balance USSD code to use instead of the carrier default.
    pub fn balance_ussd(mut self, code: &str) -> Self {
        self.config.balance_ussd = Some(code.to_string());
        self
    }

    /// Timeout of a single transport read (default: 100ms).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Event channel capacity (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Run the initialisation sequence on start (default: true).
    pub fn initialize(mut self, enabled: bool) -> Self {
        self.config.initialize = enabled;
        self
    }

    /// Attach an extra observer after the built-in ones.
    pub fn observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a [`Session`] on a caller-provided transport.
    ///
    /// This is the entry point for tests (pass a `MockTransport` from
    /// `gsmlink-test-harness`) and for callers that open the port
    /// themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Session> {
        if self.config.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.config.read_timeout.is_zero() {
            return Err(Error::InvalidParameter("read_timeout must be non-zero".into()));
        }
        if self.config.artifact_name.trim().is_empty() {
            return Err(Error::InvalidParameter("artifact_name is empty".into()));
        }
        if self.config.call.poll_interval.is_some_and(|d| d.is_zero())
            || self.config.signal_poll_interval.is_some_and(|d| d.is_zero())
        {
            return Err(Error::InvalidParameter("poll intervals must be non-zero".into()));
        }

        Session::start(transport, self.config, self.artifacts, self.observers).await
    }
}
