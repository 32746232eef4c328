//! Mock transport for deterministic testing of the session engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs, plus a side channel for unsolicited modem
//! traffic (`RING`, `+CMTI:`, `+CUSD:` pushes) that arrives without any
//! command being sent.
//!
//! # Example
//!
//! ```
//! use gsmlink_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the session sends this command, the modem answers with this reply.
//! mock.expect(b"AT+CSQ\r\n", b"\r\n+CSQ: 24,99\r\n\r\nOK\r\n");
//!
//! // Unsolicited traffic can be injected at any time, even after the
//! // transport has been moved into a session.
//! let handle = mock.handle();
//! handle.inject(b"\r\nRING\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use gsmlink_core::error::{Error, Result};
use gsmlink_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes the modem "answers" with once the request is seen.
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes waiting to be returned by `receive()`.
    inbound: VecDeque<u8>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Accept sends that match no expectation instead of failing them.
    lenient: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    readable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A mock [`Transport`] for testing the session engine without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; on a match
/// the expectation's response is queued for `receive()`. In strict mode
/// (the default) a mismatch fails the send with [`Error::Protocol`]; in
/// lenient mode unmatched sends are only recorded.
///
/// When nothing is queued, `receive()` waits up to its timeout for
/// injected data before returning [`Error::Timeout`].
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Cloneable handle onto a [`MockTransport`] that stays usable after the
/// transport itself has been handed to a session.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new strict mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    expectations: VecDeque::new(),
                    inbound: VecDeque::new(),
                    connected: true,
                    lenient: false,
                    sent_log: Vec::new(),
                }),
                readable: Notify::new(),
            }),
        }
    }

    /// Create a mock that records unexpected sends instead of failing them.
    pub fn lenient() -> Self {
        let mock = Self::new();
        mock.shared.lock().lenient = true;
        mock
    }

    /// Add an expected request/response pair.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }

    /// Get a handle for scripting and inspecting this transport later.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return a copy of all data that has been sent through this transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent_data()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.handle().remaining_expectations()
    }

    /// Set the connected state of the mock transport.
    pub fn set_connected(&mut self, connected: bool) {
        self.handle().set_connected(connected);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue unsolicited bytes for the next `receive()` call.
    pub fn inject(&self, data: &[u8]) {
        self.shared.lock().inbound.extend(data.iter().copied());
        self.shared.readable.notify_one();
    }

    /// All data sent so far, one element per `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// All data sent so far, decoded lossily as text lines.
    pub fn sent_lines(&self) -> Vec<String> {
        self.shared
            .lock()
            .sent_log
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end().to_string())
            .collect()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Set the connected state. Disconnecting wakes a pending `receive()`.
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        self.shared.readable.notify_one();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.sent_log.push(data.to_vec());

        let matches_next = state
            .expectations
            .front()
            .is_some_and(|e| e.request.as_slice() == data);

        if matches_next {
            if let Some(expectation) = state.expectations.pop_front() {
                state.inbound.extend(expectation.response);
            }
            drop(state);
            self.shared.readable.notify_one();
            return Ok(());
        }

        if state.lenient {
            return Ok(());
        }

        match state.expectations.front() {
            Some(expectation) => Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            ))),
            None => Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.lock();
                if !state.connected {
                    return Err(Error::NotConnected);
                }
                if !state.inbound.is_empty() {
                    let n = state.inbound.len().min(buf.len());
                    for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }

            if tokio::time::timeout_at(deadline, self.shared.readable.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}
