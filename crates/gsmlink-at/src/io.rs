//! The session's IO task.
//!
//! One tokio task owns the transport exclusively. It writes commands handed
//! to it through a [`CommandSender`], reads the byte stream, and feeds what
//! it reads to the [`Demultiplexer`]. Commands queued by observers while a
//! chunk is processed are written before the next read.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gsmlink_core::{Error, ModemEvent, Result, Transport};

use crate::commands;
use crate::demux::Demultiplexer;
use crate::registry::Registry;

/// Read chunk size for one transport receive.
const READ_CHUNK: usize = 512;

/// Read buffer ceiling. A line this long without a CRLF is discarded.
const MAX_BUF: usize = 1 << 20;

/// A request sent to the IO task.
pub(crate) enum Request {
    /// Write one encoded command. `reply` receives the write result.
    Write {
        bytes: Vec<u8>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Stop the task and hand the transport back.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Cloneable handle for writing commands through the IO task.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl CommandSender {
    /// Write `command` followed by CRLF and wait until it is on the wire.
    pub async fn send(&self, command: &str) -> Result<()> {
        let bytes = commands::encode_command(command)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Write {
                bytes,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        debug!(command, "sent");
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Whether the IO task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) async fn shutdown(&self) -> Option<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Request::Shutdown { reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }
}

/// Create the IO request channel.
pub(crate) fn channel() -> (CommandSender, mpsc::Receiver<Request>) {
    let (tx, rx) = mpsc::channel(32);
    (CommandSender { tx }, rx)
}

/// Everything the IO task needs besides its request channel.
pub(crate) struct IoTask {
    pub transport: Box<dyn Transport>,
    pub demux: Demultiplexer,
    pub registry: Registry,
    pub event_tx: broadcast::Sender<ModemEvent>,
    pub cancel: CancellationToken,
    pub read_timeout: Duration,
}

/// Spawn the IO task.
pub(crate) fn spawn_io_task(task: IoTask, rx: mpsc::Receiver<Request>) -> JoinHandle<()> {
    tokio::spawn(io_loop(task, rx))
}

/// Why the loop stopped.
enum Exit {
    /// Shutdown was requested; the transport has been handed back.
    Shutdown,
    /// Cancelled, channel closed, or the stream failed.
    Stopped(Box<dyn Transport>),
}

async fn io_loop(task: IoTask, rx: mpsc::Receiver<Request>) {
    let IoTask {
        transport,
        demux,
        registry,
        event_tx,
        cancel,
        read_timeout,
    } = task;

    let exit = run(transport, demux, &registry, &cancel, read_timeout, rx).await;

    registry.close();
    cancel.cancel();
    let _ = event_tx.send(ModemEvent::Disconnected);

    if let Exit::Stopped(mut transport) = exit {
        if let Err(e) = transport.close().await {
            debug!(error = %e, "transport close failed");
        }
    }
    debug!("IO task exited");
}

/// The select loop. Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Queued writes and shutdown
/// 3. Reading the byte stream
async fn run(
    mut transport: Box<dyn Transport>,
    mut demux: Demultiplexer,
    registry: &Registry,
    cancel: &CancellationToken,
    read_timeout: Duration,
    mut rx: mpsc::Receiver<Request>,
) -> Exit {
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                return Exit::Stopped(transport);
            }

            req = rx.recv() => match req {
                Some(Request::Write { bytes, reply }) => {
                    let result = transport.send(&bytes).await;
                    let fatal = matches!(&result, Err(e) if e.is_transport());
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                tracing::warn!(error = %e, "background write failed");
                            }
                        }
                    }
                    if fatal {
                        tracing::error!("write failed, stopping session");
                        return Exit::Stopped(transport);
                    }
                }
                Some(Request::Shutdown { reply }) => {
                    debug!("IO task shutdown requested");
                    if let Err(transport) = reply.send(transport) {
                        return Exit::Stopped(transport);
                    }
                    return Exit::Shutdown;
                }
                None => {
                    debug!("request channel closed, exiting IO task");
                    return Exit::Stopped(transport);
                }
            },

            result = transport.receive(&mut buf, read_timeout) => match result {
                Ok(n) => {
                    if demux.buffered() + n > MAX_BUF {
                        tracing::warn!(len = demux.buffered(), "read buffer overflow, resetting");
                        demux.reset_buffer();
                    }
                    for line in demux.feed(&buf[..n]) {
                        let sent = match commands::encode_command(&line) {
                            Ok(bytes) => transport.send(&bytes).await,
                            Err(e) => Err(e),
                        };
                        match sent {
                            Ok(()) => debug!(command = %line, "sent"),
                            Err(e) if e.is_transport() => {
                                tracing::error!(command = %line, error = %e, "write failed, stopping session");
                                return Exit::Stopped(transport);
                            }
                            Err(e) => tracing::warn!(command = %line, error = %e, "observer command not sent"),
                        }
                    }
                }
                Err(Error::Timeout) => {
                    let expired = registry.sweep_expired(Instant::now());
                    if expired > 0 {
                        debug!(expired, "dropped expired pending requests");
                    }
                }
                Err(e) if e.is_transport() => {
                    tracing::error!(error = %e, "read failed, stopping session");
                    return Exit::Stopped(transport);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read error");
                }
            },
        }
    }
}
