//! Connection identities, states, and the proxy-owned connection table.
//!
//! Externally a connection is only ever an opaque [`ConnectionId`];
//! process-unique ids are never reused, so a stale id fails lookup with
//! `UnknownConnection` instead of touching freed state. The authoritative
//! table lives inside the proxy task; a read-mostly mirror keyed by id
//! lets caller threads validate ids and fetch [`ConnectionInfo`] without
//! entering the proxy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use courier_crypto::PublicKey;

use crate::auth::AuthLevel;
use crate::error::Error;
use crate::wire::Envelope;

/// Opaque handle to a connection, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outbound dial and handshake in progress
    Connecting,
    /// Handshake complete, auth level resolved
    Established,
    /// Torn down; the id will never be valid again
    Closed,
}

/// Public view of an established connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    id: ConnectionId,
    remote_pubkey: PublicKey,
    auth_level: AuthLevel,
    remote_addr: SocketAddr,
}

impl ConnectionInfo {
    pub(crate) fn new(
        id: ConnectionId,
        remote_pubkey: PublicKey,
        auth_level: AuthLevel,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            id,
            remote_pubkey,
            auth_level,
            remote_addr,
        }
    }

    /// The connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The remote peer's public key.
    #[must_use]
    pub fn pubkey(&self) -> PublicKey {
        self.remote_pubkey
    }

    /// The auth level resolved at handshake time.
    #[must_use]
    pub fn auth_level(&self) -> AuthLevel {
        self.auth_level
    }

    /// The remote socket address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Callback invoked once when an outbound connection establishes.
pub type ConnectCallback = Box<dyn FnOnce(ConnectionInfo) + Send + 'static>;

/// Callback invoked once when an outbound connection fails.
pub type ConnectFailureCallback = Box<dyn FnOnce(ConnectionId, Error) + Send + 'static>;

/// Caller-visible snapshot mirrored out of the proxy task.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub info: Option<ConnectionInfo>,
}

/// Proxy-side connection record.
pub(crate) enum ConnectionEntry {
    /// Outbound attempt in flight.
    Connecting {
        deadline: Instant,
        on_success: ConnectCallback,
        on_failure: ConnectFailureCallback,
        /// Envelopes sent while connecting, flushed on establishment.
        queued: Vec<Envelope>,
    },
    /// Live link with its writer-task inbox and io task handles.
    Established {
        outbox: UnboundedSender<Envelope>,
        info: ConnectionInfo,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    },
}

/// The proxy-owned connection table plus its external mirror.
pub(crate) struct ConnectionTable {
    entries: HashMap<ConnectionId, ConnectionEntry>,
    mirror: Arc<DashMap<ConnectionId, ConnectionSnapshot>>,
}

impl ConnectionTable {
    pub fn new(mirror: Arc<DashMap<ConnectionId, ConnectionSnapshot>>) -> Self {
        Self {
            entries: HashMap::new(),
            mirror,
        }
    }

    pub fn insert_connecting(
        &mut self,
        id: ConnectionId,
        deadline: Instant,
        on_success: ConnectCallback,
        on_failure: ConnectFailureCallback,
    ) {
        self.entries.insert(
            id,
            ConnectionEntry::Connecting {
                deadline,
                on_success,
                on_failure,
                queued: Vec::new(),
            },
        );
        // connect_remote pre-populates the mirror from the caller thread;
        // this keeps the two in sync for proxy-originated inserts too.
        self.mirror.insert(
            id,
            ConnectionSnapshot {
                state: ConnectionState::Connecting,
                info: None,
            },
        );
    }

    pub fn insert_established(
        &mut self,
        info: ConnectionInfo,
        outbox: UnboundedSender<Envelope>,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    ) {
        let id = info.id();
        self.mirror.insert(
            id,
            ConnectionSnapshot {
                state: ConnectionState::Established,
                info: Some(info.clone()),
            },
        );
        self.entries.insert(
            id,
            ConnectionEntry::Established {
                outbox,
                info,
                reader,
                writer,
            },
        );
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(&id)
    }

    /// Remove an entry, invalidating the id for all future lookups.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        self.mirror.remove(&id);
        self.entries.remove(&id)
    }

    /// Ids of connecting entries whose deadline has passed.
    pub fn expired_connects(&self, now: Instant) -> Vec<ConnectionId> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                ConnectionEntry::Connecting { deadline, .. } if *deadline <= now => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
