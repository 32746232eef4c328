//! The modem session and its command façade.
//!
//! A [`Session`] owns the IO task for one modem. Façade calls register a
//! waiter in the pending-request registry, hand their command to the IO
//! task and wait for the read task to deliver the matching reply.
//!
//! Callers must not run two waiting calls on the same [`ResponseKey`] at
//! once. The registry keeps one entry per key, so the later call wins and
//! the earlier one times out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gsmlink_core::{ArtifactSink, Carrier, Error, ModemEvent, ModemInfo, Result, Transport};

use crate::builder::SessionConfig;
use crate::commands;
use crate::demux::Demultiplexer;
use crate::io::{self, CommandSender, IoTask};
use crate::observer::{Observer, SharedInfo};
use crate::observers::{spawn_poller, CallObserver, InfoObserver, SmsObserver, UssdObserver};
use crate::registry::{Registry, ResponseKey};

/// An open AT-command session with one modem.
pub struct Session {
    config: SessionConfig,
    commands: CommandSender,
    registry: Registry,
    info: SharedInfo,
    event_tx: broadcast::Sender<ModemEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start a session on `transport`: spawn the IO task, attach the
    /// built-in observers followed by `extra`, start the optional signal
    /// poller, and run the initialisation sequence if enabled.
    pub(crate) async fn start(
        transport: Box<dyn Transport>,
        config: SessionConfig,
        artifacts: Arc<dyn ArtifactSink>,
        extra: Vec<Box<dyn Observer>>,
    ) -> Result<Session> {
        let registry = Registry::new();
        let info = SharedInfo::new();
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let cancel = CancellationToken::new();
        let (commands, requests) = io::channel();

        let mut demux = Demultiplexer::new(
            registry.clone(),
            info.clone(),
            event_tx.clone(),
            artifacts,
            commands.clone(),
            cancel.clone(),
        )
        .with_skip_prefixes(config.skip_prefixes.clone())
        .with_artifact_name(config.artifact_name.clone());
        demux.attach(Box::new(SmsObserver::new()));
        demux.attach(Box::new(CallObserver::new(config.call.clone())));
        demux.attach(Box::new(InfoObserver::new()));
        demux.attach(Box::new(UssdObserver::new()));
        for observer in extra {
            demux.attach(observer);
        }

        let task = io::spawn_io_task(
            IoTask {
                transport,
                demux,
                registry: registry.clone(),
                event_tx: event_tx.clone(),
                cancel: cancel.clone(),
                read_timeout: config.read_timeout,
            },
            requests,
        );

        if let Some(every) = config.signal_poll_interval {
            spawn_poller(
                commands.clone(),
                commands::SIGNAL_QUALITY,
                every,
                cancel.child_token(),
            );
        }

        let initialize = config.initialize;
        let session = Session {
            config,
            commands,
            registry,
            info,
            event_tx,
            cancel,
            task: Mutex::new(Some(task)),
        };
        if initialize {
            session.initialize().await;
        }
        Ok(session)
    }

    /// Configure the modem and learn what can be learned about the SIM.
    ///
    /// Every step is best-effort: failures are logged and the next step
    /// runs anyway.
    pub async fn initialize(&self) {
        for command in [
            commands::VERBOSE_ERRORS,
            commands::SMS_TEXT_MODE,
            commands::NEW_MESSAGE_INDICATIONS,
            commands::CALLER_ID,
        ] {
            if let Err(e) = self.send_and_wait_ok(command).await {
                tracing::warn!(command, error = %e, "init command failed");
            }
        }

        match self.query_iccid().await {
            Ok(iccid) => tracing::info!(%iccid, "ICCID"),
            Err(e) => tracing::error!(error = %e, "ICCID query failed"),
        }

        let carrier = match self.query_operator().await {
            Ok(carrier) => carrier,
            Err(e) => {
                tracing::error!(error = %e, "operator query failed");
                Carrier::Unknown
            }
        };

        let code = self
            .config
            .balance_ussd
            .clone()
            .unwrap_or_else(|| carrier.balance_ussd_code().to_string());
        match self.send_ussd(&code).await {
            Ok(reply) => tracing::info!(code = %code, reply = %reply, "balance"),
            Err(e) => tracing::error!(code = %code, error = %e, "balance query failed"),
        }
    }

    // -----------------------------------------------------------------
    // Command façade
    // -----------------------------------------------------------------

    /// Write `command` followed by CRLF.
    pub async fn send(&self, command: &str) -> Result<()> {
        self.commands.send(command).await
    }

    /// Send `command` and wait up to the OK timeout for the final result.
    ///
    /// Fails with [`Error::Protocol`] if the modem answers `ERROR`,
    /// `+CME ERROR` or `+CMS ERROR`, and with [`Error::Timeout`] if nothing
    /// arrives in time.
    pub async fn send_and_wait_ok(&self, command: &str) -> Result<()> {
        let pending = self
            .registry
            .register(ResponseKey::Ok, self.config.ok_timeout);
        self.send(command).await?;
        let reply = pending.wait().await?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(Error::Protocol(reply))
        }
    }

    /// Send `command` and return the first frame starting with `key`.
    pub async fn send_and_get_data(
        &self,
        key: ResponseKey,
        command: &str,
        timeout: Duration,
    ) -> Result<String> {
        if key == ResponseKey::Ussd {
            return Err(Error::InvalidParameter(
                "USSD replies are awaited with send_ussd".into(),
            ));
        }
        let pending = self.registry.register(key, timeout);
        self.send(command).await?;
        pending.wait().await
    }

    /// Send a USSD request and wait for the reassembled reply.
    ///
    /// After the command is written the call waits the settle delay and
    /// then up to the USSD timeout.
    pub async fn send_ussd(&self, code: &str) -> Result<String> {
        let pending = self.registry.register(
            ResponseKey::Ussd,
            self.config.ussd_settle + self.config.ussd_timeout,
        );
        self.send(&commands::ussd(code)).await?;
        tokio::time::sleep(self.config.ussd_settle).await;
        pending.wait().await
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Query and store the SIM ICCID.
    pub async fn query_iccid(&self) -> Result<String> {
        let line = self
            .send_and_get_data(
                ResponseKey::Iccid,
                commands::QUERY_ICCID,
                self.config.data_timeout,
            )
            .await?;
        let iccid = commands::parse_iccid(&line);
        self.info.update(|info| info.iccid = Some(iccid.clone()));
        let _ = self.event_tx.send(ModemEvent::IccidChanged {
            iccid: iccid.clone(),
        });
        Ok(iccid)
    }

    /// Query the operator and store it with the derived carrier.
    pub async fn query_operator(&self) -> Result<Carrier> {
        let line = self
            .send_and_get_data(
                ResponseKey::Operator,
                commands::QUERY_OPERATOR,
                self.config.data_timeout,
            )
            .await?;
        let operator = commands::parse_operator(&line);
        let carrier = operator
            .as_deref()
            .map_or(Carrier::Unknown, Carrier::from_operator);
        tracing::info!(cops = %line, %carrier, "operator");
        self.info.update(|info| {
            info.operator = operator;
            info.carrier = Some(carrier);
        });
        Ok(carrier)
    }

    /// Query signal quality. Returns the 0-5 bucket, or `None` when the
    /// modem reports the signal as unknown.
    pub async fn query_signal(&self) -> Result<Option<u8>> {
        let line = self
            .send_and_get_data(
                ResponseKey::SignalQuality,
                commands::SIGNAL_QUALITY,
                self.config.data_timeout,
            )
            .await?;
        let raw = commands::parse_signal_quality(&line)?;
        if raw > 31 {
            return Ok(None);
        }
        let bars = commands::rescale_signal(raw);
        let previous = self.info.update(|info| info.signal.replace(bars));
        if previous != Some(bars) {
            let _ = self.event_tx.send(ModemEvent::SignalChanged { bars });
        }
        Ok(Some(bars))
    }

    /// Ask the modem to dump `<name>.wav` into the stream. The capture is
    /// saved through the artifact sink when the transfer completes and a
    /// [`ModemEvent::RecordingSaved`] is published.
    pub async fn download_recording(&self, name: &str) -> Result<()> {
        self.send(&commands::download_file(name)).await
    }

    // -----------------------------------------------------------------
    // State
    // -----------------------------------------------------------------

    /// Snapshot of the signal, ICCID, phone number and carrier.
    pub fn info(&self) -> ModemInfo {
        self.info.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.event_tx.subscribe()
    }

    /// Keys with a registered waiter.
    pub fn pending_keys(&self) -> Vec<ResponseKey> {
        self.registry.keys()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the IO task is still running.
    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed() && !self.registry.is_closed()
    }

    /// Stop the IO task and pollers, close the transport and fail all
    /// pending waiters with [`Error::ConnectionLost`].
    pub async fn close(&self) -> Result<()> {
        let transport = self.commands.shutdown().await;
        self.cancel.cancel();

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "IO task panicked");
            }
        }

        match transport {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SessionBuilder;
    use gsmlink_test_harness::{MockHandle, MockTransport};

    async fn quiet_session() -> (Session, MockHandle) {
        let mock = MockTransport::lenient();
        let handle = mock.handle();
        let session = SessionBuilder::new()
            .initialize(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        (session, handle)
    }

    #[tokio::test]
    async fn wait_ok_returns_on_ok() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CMGF=1\r\n", b"AT+CMGF=1\r\r\nOK\r\n");
        let session = SessionBuilder::new()
            .initialize(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        session.send_and_wait_ok("AT+CMGF=1").await.unwrap();
        assert!(session.pending_keys().is_empty());
    }

    #[tokio::test]
    async fn wait_ok_surfaces_modem_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QXYZ\r\n", b"\r\nERROR\r\n");
        let session = SessionBuilder::new()
            .initialize(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        let err = session.send_and_wait_ok("AT+QXYZ").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref r) if r == "ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn withheld_ok_times_out_without_residue() {
        let (session, handle) = quiet_session().await;
        let err = session.send_and_wait_ok("AT+CLIP=1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(session.pending_keys().is_empty());
        assert_eq!(handle.sent_lines(), vec!["AT+CLIP=1"]);
    }

    #[tokio::test]
    async fn get_data_returns_matching_frame() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CCID\r\n", b"\r\n+CCID: 89840480000000000001\r\n\r\nOK\r\n");
        let session = SessionBuilder::new()
            .initialize(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        let line = session
            .send_and_get_data(ResponseKey::Iccid, "AT+CCID", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "+CCID: 89840480000000000001");
    }

    #[tokio::test]
    async fn get_data_rejects_ussd_key() {
        let (session, _handle) = quiet_session().await;
        let err = session
            .send_and_get_data(ResponseKey::Ussd, "AT+CUSD=1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ussd_waits_for_reply() {
        let (session, handle) = quiet_session().await;
        let reply = tokio::spawn({
            let handle = handle.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                handle.inject(b"\r\n+CUSD: 0,\"Balance: 1000\",15\r\n");
            }
        });
        let text = session.send_ussd("*101#").await.unwrap();
        reply.await.unwrap();
        assert_eq!(text, "Balance: 1000");
        assert_eq!(handle.sent_lines(), vec!["AT+CUSD=1,\"*101#\",15"]);
    }

    #[tokio::test]
    async fn command_with_line_break_is_rejected() {
        let (session, handle) = quiet_session().await;
        let err = session.send("AT\r\nATH").await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn query_signal_stores_bucket() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CSQ\r\n", b"\r\n+CSQ: 31,99\r\n\r\nOK\r\n");
        mock.expect(b"AT+CSQ\r\n", b"\r\n+CSQ: 99,99\r\n\r\nOK\r\n");
        let session = SessionBuilder::new()
            .initialize(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(session.query_signal().await.unwrap(), Some(5));
        assert_eq!(session.query_signal().await.unwrap(), None);
        assert_eq!(session.info().signal, Some(5));
    }

    #[tokio::test]
    async fn close_fails_later_calls() {
        let (session, handle) = quiet_session().await;
        session.close().await.unwrap();
        assert!(!session.is_connected());
        assert!(matches!(
            session.send("AT").await,
            Err(Error::NotConnected)
        ));
        assert!(handle.sent_data().is_empty());
        // Closing twice is harmless.
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_publishes_disconnected() {
        let (session, _handle) = quiet_session().await;
        let mut events = session.subscribe();
        session.close().await.unwrap();
        assert!(matches!(events.recv().await, Ok(ModemEvent::Disconnected)));
    }

    #[tokio::test]
    async fn lost_stream_stops_session() {
        let (session, handle) = quiet_session().await;
        let mut events = session.subscribe();
        handle.set_connected(false);
        assert!(matches!(events.recv().await, Ok(ModemEvent::Disconnected)));
        assert!(!session.is_connected());
    }
}
