//! Pending-request registry.
//!
//! A façade call that expects a reply registers a one-shot slot under a
//! [`ResponseKey`] before writing its command. The read task looks up
//! incoming frames against the registered keys and delivers the first
//! matching frame to the waiter. Each key holds at most one entry; a
//! second registration under the same key replaces the first, whose
//! waiter then runs out its own deadline.
//!
//! The table sits behind a `std::sync::Mutex`. Every critical section is a
//! handful of map operations and never spans an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gsmlink_core::{Error, Result};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// The logical kind of reply a pending request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResponseKey {
    /// Final `OK` result code, matched exactly.
    Ok,
    /// `+CCID` reply.
    Iccid,
    /// `+COPS` reply.
    Operator,
    /// `+CSQ` reply.
    SignalQuality,
    /// `+CLCC` reply.
    CallList,
    /// A reassembled `+CUSD` reply. Fed by the USSD accumulator, never by
    /// prefix matching.
    Ussd,
}

impl ResponseKey {
    /// Every key, in display order.
    pub const ALL: [ResponseKey; 6] = [
        ResponseKey::Ok,
        ResponseKey::Iccid,
        ResponseKey::Operator,
        ResponseKey::SignalQuality,
        ResponseKey::CallList,
        ResponseKey::Ussd,
    ];

    /// The literal the key is known by on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKey::Ok => "OK",
            ResponseKey::Iccid => "+CCID",
            ResponseKey::Operator => "+COPS",
            ResponseKey::SignalQuality => "+CSQ",
            ResponseKey::CallList => "+CLCC",
            ResponseKey::Ussd => "USSD",
        }
    }

    /// Frame prefix this key is delivered by, for keys routed by prefix.
    fn prefix(&self) -> Option<&'static str> {
        match self {
            ResponseKey::Ok | ResponseKey::Ussd => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_end_matches(':');
        ResponseKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidParameter(format!("unknown response key: {s}")))
    }
}

struct Entry {
    id: u64,
    slot: oneshot::Sender<String>,
    deadline: Instant,
}

#[derive(Default)]
struct PendingTable {
    next_id: u64,
    entries: HashMap<ResponseKey, Entry>,
    closed: bool,
}

/// Shared table of pending requests. Cloning yields another handle onto
/// the same table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<PendingTable>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("keys", &self.keys())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `key` that expires after `timeout`.
    ///
    /// Replaces any entry already registered under `key`. On a closed
    /// registry nothing is stored and the returned registration fails with
    /// [`Error::ConnectionLost`] as soon as it is awaited.
    pub fn register(&self, key: ResponseKey, timeout: Duration) -> Registration {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let mut table = self.lock();
        table.next_id = table.next_id.wrapping_add(1);
        let id = table.next_id;
        if !table.closed {
            let previous = table.entries.insert(
                key,
                Entry {
                    id,
                    slot: tx,
                    deadline,
                },
            );
            if previous.is_some() {
                tracing::warn!(%key, "pending request replaced by a newer registration");
            }
        }
        drop(table);

        Registration {
            key,
            id,
            deadline,
            rx,
            registry: self.clone(),
        }
    }

    /// Deliver `text` to the waiter registered under `key` and remove the
    /// entry. Returns `false` if nothing was registered or the waiter had
    /// already gone away.
    pub fn deliver(&self, key: ResponseKey, text: String) -> bool {
        let entry = self.lock().entries.remove(&key);
        match entry {
            Some(entry) => entry.slot.send(text).is_ok(),
            None => false,
        }
    }

    /// First registered prefix-routed key that `frame` starts with.
    pub fn match_prefix(&self, frame: &str) -> Option<ResponseKey> {
        let table = self.lock();
        table
            .entries
            .keys()
            .copied()
            .find(|key| key.prefix().is_some_and(|p| frame.starts_with(p)))
    }

    /// Whether a waiter is registered under `key`.
    pub fn contains(&self, key: ResponseKey) -> bool {
        self.lock().entries.contains_key(&key)
    }

    /// Keys currently registered, sorted.
    pub fn keys(&self) -> Vec<ResponseKey> {
        let mut keys: Vec<_> = self.lock().entries.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Remove the entry under `key` if it still belongs to registration `id`.
    fn cancel(&self, key: ResponseKey, id: u64) -> bool {
        let mut table = self.lock();
        match table.entries.get(&key) {
            Some(entry) if entry.id == id => {
                table.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Drop entries whose deadline is at or before `now`. Returns how many
    /// were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut table = self.lock();
        let before = table.entries.len();
        table.entries.retain(|_, entry| entry.deadline > now);
        before - table.entries.len()
    }

    /// Drop every entry and refuse new ones. Waiters fail with
    /// [`Error::ConnectionLost`].
    pub fn close(&self) {
        let mut table = self.lock();
        table.closed = true;
        table.entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A registered waiter. Dropping it removes its entry from the registry
/// unless a newer registration has taken the key.
pub struct Registration {
    key: ResponseKey,
    id: u64,
    deadline: Instant,
    rx: oneshot::Receiver<String>,
    registry: Registry,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Registration {
    pub fn key(&self) -> ResponseKey {
        self.key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply until the registration's deadline.
    ///
    /// If the slot is dropped while the registry is still open, the entry
    /// was replaced by a newer registration under the same key; the wait
    /// then runs out to its own deadline and reports a timeout.
    pub async fn wait(mut self) -> Result<String> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(_)) if self.registry.is_closed() => Err(Error::ConnectionLost),
            Ok(Err(_)) => {
                tokio::time::sleep_until(self.deadline).await;
                Err(Error::Timeout)
            }
            Err(_) => {
                tracing::debug!(key = %self.key, "pending request timed out");
                Err(Error::Timeout)
            }
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.cancel(self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn delivered_entry_is_removed() {
        let registry = Registry::new();
        let reg = registry.register(ResponseKey::Iccid, SECOND);
        assert!(registry.contains(ResponseKey::Iccid));

        assert!(registry.deliver(ResponseKey::Iccid, "+CCID: 89".into()));
        assert!(!registry.contains(ResponseKey::Iccid));
        assert_eq!(reg.wait().await.unwrap(), "+CCID: 89");
    }

    #[tokio::test]
    async fn second_delivery_is_a_no_op() {
        let registry = Registry::new();
        let _reg = registry.register(ResponseKey::Ok, SECOND);
        assert!(registry.deliver(ResponseKey::Ok, "OK".into()));
        assert!(!registry.deliver(ResponseKey::Ok, "OK".into()));
    }

    #[test]
    fn delivery_without_registration_returns_false() {
        let registry = Registry::new();
        assert!(!registry.deliver(ResponseKey::Ussd, "Balance".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_no_residual_entry() {
        let registry = Registry::new();
        let reg = registry.register(ResponseKey::Ok, SECOND);
        let err = reg.wait().await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(registry.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_waiter_times_out_at_its_own_deadline() {
        let registry = Registry::new();
        let first = registry.register(ResponseKey::Operator, SECOND);
        let second = registry.register(ResponseKey::Operator, 5 * SECOND);

        let started = Instant::now();
        assert!(matches!(first.wait().await, Err(Error::Timeout)));
        assert_eq!(started.elapsed(), SECOND);

        // The orphaned waiter must not have removed the newer entry.
        assert!(registry.contains(ResponseKey::Operator));
        assert!(registry.deliver(ResponseKey::Operator, "+COPS: 0".into()));
        assert_eq!(second.wait().await.unwrap(), "+COPS: 0");
    }

    #[tokio::test]
    async fn dropping_registration_removes_entry() {
        let registry = Registry::new();
        let reg = registry.register(ResponseKey::Ussd, SECOND);
        drop(reg);
        assert!(!registry.contains(ResponseKey::Ussd));
    }

    #[tokio::test]
    async fn close_fails_waiters_with_connection_lost() {
        let registry = Registry::new();
        let reg = registry.register(ResponseKey::Iccid, SECOND);
        registry.close();
        assert!(matches!(reg.wait().await, Err(Error::ConnectionLost)));

        let late = registry.register(ResponseKey::Ok, SECOND);
        assert!(registry.keys().is_empty());
        assert!(matches!(late.wait().await, Err(Error::ConnectionLost)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired_entries() {
        let registry = Registry::new();
        let _short = registry.register(ResponseKey::Ok, SECOND);
        let _long = registry.register(ResponseKey::Ussd, 60 * SECOND);

        tokio::time::advance(2 * SECOND).await;
        assert_eq!(registry.sweep_expired(Instant::now()), 1);
        assert_eq!(registry.keys(), vec![ResponseKey::Ussd]);
    }

    #[test]
    fn prefix_match_skips_ok_and_ussd() {
        let registry = Registry::new();
        let _ok = registry.register(ResponseKey::Ok, SECOND);
        let _ussd = registry.register(ResponseKey::Ussd, SECOND);
        assert_eq!(registry.match_prefix("OK"), None);
        assert_eq!(registry.match_prefix("USSD"), None);

        let _ccid = registry.register(ResponseKey::Iccid, SECOND);
        assert_eq!(
            registry.match_prefix("+CCID: 8984"),
            Some(ResponseKey::Iccid)
        );
        assert_eq!(registry.match_prefix("+COPS: 0"), None);
    }

    #[test]
    fn key_parsing() {
        assert_eq!("+CCID".parse::<ResponseKey>().unwrap(), ResponseKey::Iccid);
        assert_eq!("+csq:".parse::<ResponseKey>().unwrap(), ResponseKey::SignalQuality);
        assert_eq!("ussd".parse::<ResponseKey>().unwrap(), ResponseKey::Ussd);
        assert!(matches!(
            "+CMGR".parse::<ResponseKey>(),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(ResponseKey::Operator.to_string(), "+COPS");
    }
}
