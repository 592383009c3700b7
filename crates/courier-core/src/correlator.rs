//! Request/reply correlation.
//!
//! Every outstanding request is a [`PendingRequest`] keyed by a monotonic
//! tag. The table is owned by the proxy task, so removal is the single
//! atomic commit point: whichever terminal event (reply, deadline sweep,
//! connection close, shutdown) removes the entry first gets to fire the
//! callback, and the losers are no-ops. A callback therefore runs exactly
//! once per request.

use std::collections::HashMap;
use std::time::Instant;

use crate::connection::ConnectionId;

/// Callback receiving the outcome of a request: `(ok, frames)`.
///
/// Runs on a worker thread. `ok == false` carries a sentinel frame such as
/// [`crate::TIMEOUT_SENTINEL`] or [`crate::CLOSED_SENTINEL`].
pub type ReplyCallback = Box<dyn FnOnce(bool, Vec<Vec<u8>>) + Send + 'static>;

/// An outstanding request awaiting its terminal event.
pub(crate) struct PendingRequest {
    pub conn: ConnectionId,
    pub callback: ReplyCallback,
    pub deadline: Instant,
    #[allow(dead_code)]
    pub created_at: Instant,
}

/// The pending-request table and tag allocator.
pub(crate) struct Correlator {
    pending: HashMap<u64, PendingRequest>,
    next_tag: u64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_tag: 1,
        }
    }

    /// Record a new request and return its fresh tag.
    ///
    /// Tags are allocated from a monotonic counter and never reused.
    pub fn register(
        &mut self,
        conn: ConnectionId,
        callback: ReplyCallback,
        deadline: Instant,
    ) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.pending.insert(
            tag,
            PendingRequest {
                conn,
                callback,
                deadline,
                created_at: Instant::now(),
            },
        );
        tag
    }

    /// Take the request for an arriving reply. `None` means the tag is
    /// stale (already resolved or expired) and the reply must be dropped.
    pub fn resolve(&mut self, tag: u64) -> Option<PendingRequest> {
        self.pending.remove(&tag)
    }

    /// Take every request whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest> {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();
        expired
            .into_iter()
            .filter_map(|tag| self.pending.remove(&tag))
            .collect()
    }

    /// Take every request owned by a closing connection.
    pub fn fail_connection(&mut self, conn: ConnectionId) -> Vec<PendingRequest> {
        let owned: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.conn == conn)
            .map(|(tag, _)| *tag)
            .collect();
        owned
            .into_iter()
            .filter_map(|tag| self.pending.remove(&tag))
            .collect()
    }

    /// Take everything; used by the shutdown drain.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.pending.drain().map(|(_, p)| p).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_callback(count: &Arc<AtomicUsize>) -> ReplyCallback {
        let count = Arc::clone(count);
        Box::new(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_tags_are_unique_and_monotonic() {
        let mut correlator = Correlator::new();
        let conn = ConnectionId::new(1);
        let deadline = Instant::now() + Duration::from_secs(1);
        let a = correlator.register(conn, Box::new(|_, _| {}), deadline);
        let b = correlator.register(conn, Box::new(|_, _| {}), deadline);
        let c = correlator.register(conn, Box::new(|_, _| {}), deadline);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_resolve_is_exactly_once() {
        let mut correlator = Correlator::new();
        let conn = ConnectionId::new(1);
        let tag = correlator.register(
            conn,
            Box::new(|_, _| {}),
            Instant::now() + Duration::from_secs(1),
        );
        assert!(correlator.resolve(tag).is_some());
        // A duplicate or late reply finds nothing.
        assert!(correlator.resolve(tag).is_none());
    }

    #[test]
    fn test_expire_takes_only_past_deadlines() {
        let mut correlator = Correlator::new();
        let conn = ConnectionId::new(1);
        let now = Instant::now();
        let due = correlator.register(conn, Box::new(|_, _| {}), now);
        let _later = correlator.register(conn, Box::new(|_, _| {}), now + Duration::from_secs(5));

        let expired = correlator.expire(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(correlator.len(), 1);
        // The expired tag is gone for good.
        assert!(correlator.resolve(due).is_none());
    }

    #[test]
    fn test_reply_then_expiry_races_to_one_winner() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut correlator = Correlator::new();
        let conn = ConnectionId::new(1);
        let now = Instant::now();
        let tag = correlator.register(conn, counting_callback(&count), now);

        // Reply wins: the sweep that follows must find nothing.
        let pending = correlator.resolve(tag).unwrap();
        (pending.callback)(true, vec![]);
        assert!(correlator.expire(now).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fail_connection_takes_only_owned() {
        let mut correlator = Correlator::new();
        let doomed = ConnectionId::new(1);
        let healthy = ConnectionId::new(2);
        let deadline = Instant::now() + Duration::from_secs(5);
        correlator.register(doomed, Box::new(|_, _| {}), deadline);
        correlator.register(doomed, Box::new(|_, _| {}), deadline);
        correlator.register(healthy, Box::new(|_, _| {}), deadline);

        let failed = correlator.fail_connection(doomed);
        assert_eq!(failed.len(), 2);
        assert_eq!(correlator.len(), 1);
        assert!(correlator.fail_connection(doomed).is_empty());
    }

    #[test]
    fn test_drain_empties_table() {
        let mut correlator = Correlator::new();
        let conn = ConnectionId::new(1);
        let deadline = Instant::now() + Duration::from_secs(5);
        correlator.register(conn, Box::new(|_, _| {}), deadline);
        correlator.register(conn, Box::new(|_, _| {}), deadline);
        assert_eq!(correlator.drain().len(), 2);
        assert_eq!(correlator.len(), 0);
    }
}
