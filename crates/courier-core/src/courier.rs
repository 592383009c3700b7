//! The public node handle.
//!
//! [`Courier`] is a cheaply cloneable handle over shared state. All
//! network-facing operations are non-blocking: they validate, enqueue an
//! instruction for the proxy task, and return; outcomes surface later via
//! callbacks on worker threads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::info;

use courier_crypto::{Keypair, PublicKey};
use courier_transport::Listener;

use crate::auth::{Access, AuthLevel, AuthResolver};
use crate::config::Config;
use crate::connection::{ConnectionId, ConnectionInfo, ConnectionSnapshot, ConnectionState};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::proxy::{Instruction, ProxyCore};
use crate::registry::Registry;
use crate::wire::{Envelope, split_target};
use crate::workers::WorkerPool;

/// Options accepted by [`Courier::request`].
///
/// A typed options struct instead of a string-keyed option bag: an
/// unrecognized option is a compile error, not a runtime surprise.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Overrides the node's default request deadline.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Defaults: node-level request timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the request deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

enum RegistryState {
    Building(Registry),
    Frozen(Arc<Registry>),
}

struct Inner {
    identity: Arc<Keypair>,
    config: Config,
    resolver: Option<AuthResolver>,
    registry: StdMutex<RegistryState>,
    pending_listens: StdMutex<Vec<String>>,
    instructions: StdMutex<Option<UnboundedSender<Instruction>>>,
    mirror: Arc<DashMap<ConnectionId, ConnectionSnapshot>>,
    bound_addrs: Arc<StdMutex<Vec<SocketAddr>>>,
    next_conn_id: Arc<AtomicU64>,
    running: AtomicBool,
    stopping: AtomicBool,
    proxy: TokioMutex<Option<JoinHandle<()>>>,
}

/// A COURIER node.
///
/// Clones share one node. Register categories and commands, then call
/// [`Courier::start`]; the registry is frozen from that point on.
#[derive(Clone)]
pub struct Courier {
    inner: Arc<Inner>,
}

/// Builder for [`Courier`].
pub struct CourierBuilder {
    keypair: Option<Keypair>,
    resolver: Option<AuthResolver>,
    config: Config,
}

impl CourierBuilder {
    /// Start building a node with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keypair: None,
            resolver: None,
            config: Config::default(),
        }
    }

    /// Use a specific identity keypair. Without this, an ephemeral
    /// keypair is generated at build time.
    #[must_use]
    pub fn keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Install the auth resolver invoked once per connection at handshake
    /// time. It runs on the proxy task and must not block.
    #[must_use]
    pub fn auth_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&PublicKey) -> AuthLevel + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Mark this node as a privileged service, raising the default auth
    /// level granted when no resolver is installed.
    #[must_use]
    pub fn privileged_service(mut self, privileged: bool) -> Self {
        self.config.privileged_service = privileged;
        self
    }

    /// Add a listen address bound at `start()`.
    #[must_use]
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addrs.push(addr.into());
        self
    }

    /// Override the proxy tick interval (timeout sweep granularity).
    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Override the default request deadline.
    #[must_use]
    pub fn default_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_request_timeout = timeout;
        self
    }

    /// Override the outbound connect deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Override the worker thread count (0 = CPU count).
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Build the node.
    #[must_use]
    pub fn build(self) -> Courier {
        let keypair = self
            .keypair
            .unwrap_or_else(|| Keypair::generate(&mut rand_core::OsRng));
        Courier {
            inner: Arc::new(Inner {
                identity: Arc::new(keypair),
                config: self.config,
                resolver: self.resolver,
                registry: StdMutex::new(RegistryState::Building(Registry::new())),
                pending_listens: StdMutex::new(Vec::new()),
                instructions: StdMutex::new(None),
                mirror: Arc::new(DashMap::new()),
                bound_addrs: Arc::new(StdMutex::new(Vec::new())),
                next_conn_id: Arc::new(AtomicU64::new(1)),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                proxy: TokioMutex::new(None),
            }),
        }
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Courier {
    /// Start building a node.
    #[must_use]
    pub fn builder() -> CourierBuilder {
        CourierBuilder::new()
    }

    /// The node's public key (its identity).
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        *self.inner.identity.public_key()
    }

    /// Whether the node is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ============ Registration (pre-start only) ============

    /// Register a category with its access policy.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `DuplicateCategory`, or `AlreadyRunning` once the
    /// node has started.
    pub fn add_category(&self, name: &str, access: Access) -> Result<()> {
        self.with_building_registry(|registry| registry.add_category(name, access))
    }

    /// Register a fire-and-forget command.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `UnknownCategory`, `DuplicateCommand`, or
    /// `AlreadyRunning` once the node has started.
    pub fn add_command<H>(
        &self,
        category: &str,
        name: &str,
        handler: H,
        min_level: Option<AuthLevel>,
    ) -> Result<()>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.with_building_registry(|registry| {
            registry.add_command(category, name, Arc::new(handler), min_level)
        })
    }

    /// Register a reply-capable command: its handler may answer through
    /// [`Message::send_reply`] or a detached reply ticket.
    ///
    /// # Errors
    ///
    /// Same as [`Courier::add_command`].
    pub fn add_request_command<H>(
        &self,
        category: &str,
        name: &str,
        handler: H,
        min_level: Option<AuthLevel>,
    ) -> Result<()>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        self.with_building_registry(|registry| {
            registry.add_request_command(category, name, Arc::new(handler), min_level)
        })
    }

    fn with_building_registry<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Registry) -> Result<()>,
    {
        let mut guard = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &mut *guard {
            RegistryState::Building(registry) => mutate(registry),
            RegistryState::Frozen(_) => Err(Error::AlreadyRunning),
        }
    }

    // ============ Lifecycle ============

    /// Bind listeners, freeze the registry, spawn the worker pool and the
    /// proxy task.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning`, or `Bind` if any listen address fails to bind.
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let registry = self.freeze_registry();

        let mut addrs = self.inner.config.listen_addrs.clone();
        addrs.append(
            &mut self
                .inner
                .pending_listens
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match Listener::bind(&addr).await {
                Ok(listener) => listeners.push(listener),
                Err(e) => {
                    self.inner.running.store(false, Ordering::SeqCst);
                    return Err(Error::Bind {
                        addr,
                        reason: e.to_string(),
                    });
                }
            }
        }
        {
            let mut bound = self
                .inner
                .bound_addrs
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            bound.clear();
            for listener in &listeners {
                if let Ok(addr) = listener.local_addr() {
                    bound.push(addr);
                }
            }
        }

        let (tx, rx) = unbounded_channel();
        *self
            .inner
            .instructions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx.clone());

        let workers = WorkerPool::new(
            self.inner.config.worker_threads,
            self.inner.config.worker_queue_capacity,
        );
        let core = ProxyCore::new(
            Arc::clone(&self.inner.identity),
            self.inner.config.clone(),
            registry,
            self.inner.resolver.clone(),
            tx,
            Arc::clone(&self.inner.mirror),
            Arc::clone(&self.inner.bound_addrs),
            Arc::clone(&self.inner.next_conn_id),
            workers,
        );
        *self.inner.proxy.lock().await = Some(tokio::spawn(core.run(rx, listeners)));

        info!("courier node started ({})", self.public_key());
        Ok(())
    }

    /// Stop the node: fail all pending requests, tear down connections,
    /// join workers and the proxy task.
    ///
    /// # Errors
    ///
    /// `NotRunning` if the node never started, `ShuttingDown` if a stop is
    /// already in progress.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if let Some(tx) = self
            .inner
            .instructions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(Instruction::Shutdown);
        }
        if let Some(handle) = self.inner.proxy.lock().await.take() {
            let _ = handle.await;
        }
        self.inner.mirror.clear();
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.stopping.store(false, Ordering::SeqCst);
        info!("courier node stopped");
        Ok(())
    }

    fn freeze_registry(&self) -> Arc<Registry> {
        let mut guard = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let frozen = match std::mem::replace(
            &mut *guard,
            RegistryState::Frozen(Arc::new(Registry::new())),
        ) {
            RegistryState::Building(registry) => Arc::new(registry),
            RegistryState::Frozen(registry) => registry,
        };
        *guard = RegistryState::Frozen(Arc::clone(&frozen));
        frozen
    }

    // ============ Connections ============

    /// Bind an additional listening socket.
    ///
    /// Before `start()` the address is queued and bound during startup
    /// (bind failures fail `start()`); after it, the bind happens on the
    /// proxy's next turn and failures are logged.
    pub fn listen(&self, addr: impl Into<String>) -> Result<()> {
        let addr = addr.into();
        if self.is_running() {
            self.instruction_sender()?
                .send(Instruction::Listen { addr })
                .map_err(|_| Error::ShuttingDown)?;
        } else {
            self.inner
                .pending_listens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(addr);
        }
        Ok(())
    }

    /// Open an outbound connection to a peer with a known public key.
    ///
    /// Returns the connection id immediately. Exactly one of the two
    /// callbacks later fires on a worker thread: `on_success` with the
    /// established connection's info, or `on_failure` with the reason
    /// (dial error, handshake failure, or `ConnectionTimeout` once
    /// `timeout`, defaulting to the node's connect timeout, elapses).
    ///
    /// # Errors
    ///
    /// `NotRunning` / `ShuttingDown`.
    pub fn connect_remote<S, F>(
        &self,
        addr: &str,
        on_success: S,
        on_failure: F,
        remote_pubkey: PublicKey,
        timeout: Option<Duration>,
    ) -> Result<ConnectionId>
    where
        S: FnOnce(ConnectionInfo) + Send + 'static,
        F: FnOnce(ConnectionId, Error) + Send + 'static,
    {
        let tx = self.instruction_sender()?;
        let id = ConnectionId::new(self.inner.next_conn_id.fetch_add(1, Ordering::SeqCst));
        // Pre-populate the mirror so a send/request issued right after
        // this call passes stale-id validation; the instructions behind
        // it are FIFO, so the proxy sees the connect first.
        self.inner.mirror.insert(
            id,
            ConnectionSnapshot {
                state: ConnectionState::Connecting,
                info: None,
            },
        );
        let _ = tx.send(Instruction::Connect {
            id,
            addr: addr.to_string(),
            remote_pubkey,
            timeout,
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        });
        Ok(id)
    }

    /// Close a connection. Every outstanding request it owns fails with
    /// the closure sentinel; the id is invalid afterwards.
    ///
    /// # Errors
    ///
    /// `UnknownConnection` for a stale id, `NotRunning` / `ShuttingDown`.
    pub fn disconnect(&self, conn: ConnectionId) -> Result<()> {
        let tx = self.instruction_sender()?;
        self.check_known(conn)?;
        let _ = tx.send(Instruction::Disconnect { conn });
        Ok(())
    }

    /// Info for an established connection, `None` while connecting or for
    /// unknown ids.
    #[must_use]
    pub fn connection_info(&self, conn: ConnectionId) -> Option<ConnectionInfo> {
        self.inner.mirror.get(&conn).and_then(|s| s.info.clone())
    }

    /// The actually bound listening addresses (useful with port 0).
    #[must_use]
    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .bound_addrs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ============ Messaging ============

    /// Send a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// `InvalidTarget`, `UnknownConnection`, `NotRunning` / `ShuttingDown`.
    pub fn send<I, F>(&self, conn: ConnectionId, target: &str, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        let tx = self.instruction_sender()?;
        validate_target(target)?;
        self.check_known(conn)?;
        let _ = tx.send(Instruction::Send {
            conn,
            envelope: Envelope::Send {
                target: target.to_string(),
                frames: frames.into_iter().map(Into::into).collect(),
            },
        });
        Ok(())
    }

    /// Issue a correlated request.
    ///
    /// The callback fires exactly once on a worker thread: `(true,
    /// frames)` when the reply arrives, or `(false, [sentinel])` on
    /// timeout (`TIMEOUT`), connection closure (`CLOSED`), or a routing
    /// refusal from the remote end.
    ///
    /// # Errors
    ///
    /// `InvalidTarget`, `UnknownConnection`, `NotRunning` / `ShuttingDown`.
    pub fn request<C, I, F>(
        &self,
        conn: ConnectionId,
        target: &str,
        callback: C,
        frames: I,
        options: RequestOptions,
    ) -> Result<()>
    where
        C: FnOnce(bool, Vec<Vec<u8>>) + Send + 'static,
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        let tx = self.instruction_sender()?;
        validate_target(target)?;
        self.check_known(conn)?;
        let _ = tx.send(Instruction::Request {
            conn,
            target: target.to_string(),
            frames: frames.into_iter().map(Into::into).collect(),
            callback: Box::new(callback),
            timeout: options.timeout,
        });
        Ok(())
    }

    fn instruction_sender(&self) -> Result<UnboundedSender<Instruction>> {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }
        self.inner
            .instructions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotRunning)
    }

    fn check_known(&self, conn: ConnectionId) -> Result<()> {
        if self.inner.mirror.contains_key(&conn) {
            Ok(())
        } else {
            Err(Error::UnknownConnection(conn))
        }
    }
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("public_key", &self.public_key())
            .field("running", &self.is_running())
            .finish()
    }
}

fn validate_target(target: &str) -> Result<()> {
    let (category, command) = split_target(target);
    if category.is_empty() || command.is_empty() {
        return Err(Error::InvalidTarget(target.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_before_start() {
        let node = Courier::builder().build();
        node.add_category("public", Access::open()).unwrap();
        node.add_request_command("public", "hello", |_m| {}, None)
            .unwrap();
        assert!(matches!(
            node.add_category("public", Access::open()),
            Err(Error::DuplicateCategory(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_frozen_after_start() {
        let node = Courier::builder().build();
        node.add_category("public", Access::open()).unwrap();
        node.start().await.unwrap();
        assert!(matches!(
            node.add_category("other", Access::open()),
            Err(Error::AlreadyRunning)
        ));
        assert!(matches!(
            node.add_command("public", "late", |_m| {}, None),
            Err(Error::AlreadyRunning)
        ));
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let node = Courier::builder().build();
        assert!(!node.is_running());
        assert!(matches!(node.stop().await, Err(Error::NotRunning)));
        node.start().await.unwrap();
        assert!(node.is_running());
        assert!(matches!(node.start().await, Err(Error::AlreadyRunning)));
        node.stop().await.unwrap();
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_bind_failure_fails_start() {
        let node = Courier::builder().listen("tcp://256.0.0.1:0").build();
        assert!(matches!(node.start().await, Err(Error::Bind { .. })));
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_ops_require_running() {
        let node = Courier::builder().build();
        let conn = ConnectionId::new(1);
        assert!(matches!(
            node.send(conn, "a.b", [b"x".to_vec()]),
            Err(Error::NotRunning)
        ));
        assert!(matches!(
            node.request(conn, "a.b", |_, _| {}, [b"x".to_vec()], RequestOptions::new()),
            Err(Error::NotRunning)
        ));
        assert!(matches!(node.disconnect(conn), Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn test_stale_connection_id_rejected() {
        let node = Courier::builder().build();
        node.start().await.unwrap();
        let conn = ConnectionId::new(999);
        assert!(matches!(
            node.send(conn, "a.b", [b"x".to_vec()]),
            Err(Error::UnknownConnection(_))
        ));
        assert!(matches!(node.disconnect(conn), Err(Error::UnknownConnection(_))));
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let node = Courier::builder().build();
        node.start().await.unwrap();
        let conn = ConnectionId::new(1);
        assert!(matches!(
            node.send(conn, "nodot", [b"x".to_vec()]),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            node.send(conn, ".cmd", [b"x".to_vec()]),
            Err(Error::InvalidTarget(_))
        ));
        node.stop().await.unwrap();
    }

    #[test]
    fn test_request_options() {
        let options = RequestOptions::new().timeout(Duration::from_millis(20));
        assert_eq!(options.timeout, Some(Duration::from_millis(20)));
        assert_eq!(RequestOptions::default().timeout, None);
    }

    #[test]
    fn test_builder_keypair() {
        let keypair = Keypair::generate(&mut rand_core::OsRng);
        let expected = *keypair.public_key();
        let node = Courier::builder().keypair(keypair).build();
        assert_eq!(node.public_key(), expected);
    }
}
