//! The proxy core: the single task owning all socket state.
//!
//! Caller threads never touch sockets. Every API call enqueues a typed
//! [`Instruction`] onto one channel whose sole consumer is the proxy task;
//! spawned accept, handshake, reader and writer tasks report back through
//! the same channel as internal events. The connection table and the
//! pending-request table are mutated only here, which makes removal the
//! atomic commit point for every exactly-once guarantee.
//!
//! The main loop multiplexes the instruction channel with a tick interval
//! that drives the connect-timeout check and the request-deadline sweep,
//! so both fire within one tick of their deadline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use courier_crypto::aead::CipherState;
use courier_crypto::handshake::{ClientHandshake, READY, ServerHandshake};
use courier_crypto::{Keypair, PublicKey, SessionKeys};
use courier_transport::{FramedReader, FramedStream, FramedWriter, Listener};

use crate::auth::{AuthLevel, AuthResolver};
use crate::config::Config;
use crate::connection::{
    ConnectCallback, ConnectFailureCallback, ConnectionEntry, ConnectionId, ConnectionInfo,
    ConnectionSnapshot, ConnectionTable,
};
use crate::correlator::{Correlator, ReplyCallback};
use crate::error::{Error, Result};
use crate::message::{Message, ReplyTicket};
use crate::registry::Registry;
use crate::wire::{Envelope, split_target};
use crate::workers::{Task, WorkerPool};
use crate::{CLOSED_SENTINEL, TIMEOUT_SENTINEL};

/// A typed instruction for the proxy task.
///
/// The first group is enqueued by caller threads through the public API;
/// the second group is internal events from spawned io tasks.
pub(crate) enum Instruction {
    Listen {
        addr: String,
    },
    Connect {
        id: ConnectionId,
        addr: String,
        remote_pubkey: PublicKey,
        timeout: Option<Duration>,
        on_success: ConnectCallback,
        on_failure: ConnectFailureCallback,
    },
    Send {
        conn: ConnectionId,
        envelope: Envelope,
    },
    Request {
        conn: ConnectionId,
        target: String,
        frames: Vec<Vec<u8>>,
        callback: ReplyCallback,
        timeout: Option<Duration>,
    },
    Reply {
        conn: ConnectionId,
        tag: u64,
        frames: Vec<Vec<u8>>,
    },
    Disconnect {
        conn: ConnectionId,
    },
    Shutdown,

    // ============ Internal Events ============
    ConnectFinished {
        id: ConnectionId,
        result: Result<EstablishedLink>,
    },
    InboundEstablished {
        link: EstablishedLink,
    },
    Inbound {
        conn: ConnectionId,
        envelope: Envelope,
    },
    PeerClosed {
        conn: ConnectionId,
    },
}

/// A freshly handshaken link, before it enters the connection table.
pub(crate) struct EstablishedLink {
    reader: FramedReader,
    writer: FramedWriter,
    keys: SessionKeys,
    remote_pubkey: PublicKey,
    remote_addr: SocketAddr,
}

/// The proxy core state. Owned by exactly one task; see module docs.
pub(crate) struct ProxyCore {
    identity: Arc<Keypair>,
    config: Config,
    registry: Arc<Registry>,
    resolver: Option<AuthResolver>,
    /// Clone handed to every spawned task and reply ticket.
    events: UnboundedSender<Instruction>,
    connections: ConnectionTable,
    correlator: Correlator,
    workers: WorkerPool,
    bound_addrs: Arc<StdMutex<Vec<SocketAddr>>>,
    next_conn_id: Arc<AtomicU64>,
    listener_tasks: Vec<JoinHandle<()>>,
}

impl ProxyCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<Keypair>,
        config: Config,
        registry: Arc<Registry>,
        resolver: Option<AuthResolver>,
        events: UnboundedSender<Instruction>,
        mirror: Arc<DashMap<ConnectionId, ConnectionSnapshot>>,
        bound_addrs: Arc<StdMutex<Vec<SocketAddr>>>,
        next_conn_id: Arc<AtomicU64>,
        workers: WorkerPool,
    ) -> Self {
        Self {
            identity,
            config,
            registry,
            resolver,
            events,
            connections: ConnectionTable::new(mirror),
            correlator: Correlator::new(),
            workers,
            bound_addrs,
            next_conn_id,
            listener_tasks: Vec::new(),
        }
    }

    /// The main loop. Runs until a `Shutdown` instruction arrives or every
    /// sender is gone, then drains.
    pub async fn run(
        mut self,
        mut instructions: UnboundedReceiver<Instruction>,
        listeners: Vec<Listener>,
    ) {
        for listener in listeners {
            self.spawn_listener(listener);
        }

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = instructions.recv() => match maybe {
                    Some(Instruction::Shutdown) | None => break,
                    Some(instruction) => self.handle(instruction).await,
                },
                _ = tick.tick() => self.sweep(),
            }
        }

        self.drain().await;
    }

    async fn handle(&mut self, instruction: Instruction) {
        match instruction {
            Instruction::Listen { addr } => match Listener::bind(&addr).await {
                Ok(listener) => {
                    info!("listening on {addr}");
                    if let Ok(local) = listener.local_addr() {
                        self.bound_addrs
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(local);
                    }
                    self.spawn_listener(listener);
                }
                // Post-start listens have no caller to return the error to.
                Err(e) => error!("listen on {addr} failed: {e}"),
            },
            Instruction::Connect {
                id,
                addr,
                remote_pubkey,
                timeout,
                on_success,
                on_failure,
            } => {
                let deadline = Instant::now() + timeout.unwrap_or(self.config.connect_timeout);
                self.connections
                    .insert_connecting(id, deadline, on_success, on_failure);
                let events = self.events.clone();
                let identity = Arc::clone(&self.identity);
                debug!("{id} dialing {addr}");
                tokio::spawn(async move {
                    let budget = deadline.saturating_duration_since(Instant::now());
                    let result = match tokio::time::timeout(
                        budget,
                        connect_handshake(&addr, &identity, remote_pubkey),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::ConnectionTimeout),
                    };
                    let _ = events.send(Instruction::ConnectFinished { id, result });
                });
            }
            Instruction::Send { conn, envelope } => self.enqueue(conn, envelope),
            Instruction::Request {
                conn,
                target,
                frames,
                callback,
                timeout,
            } => self.start_request(conn, target, frames, callback, timeout),
            Instruction::Reply { conn, tag, frames } => {
                if self.connections.get(conn).is_some() {
                    self.enqueue(conn, Envelope::Reply { tag, ok: true, frames });
                } else {
                    // The requester was already failed by the close cleanup.
                    debug!("{conn} closed before reply for tag {tag}; dropping");
                }
            }
            Instruction::Disconnect { conn } => self.close_connection(conn, "disconnect"),
            Instruction::Shutdown => unreachable!("shutdown handled by run loop"),
            Instruction::ConnectFinished { id, result } => match result {
                Ok(link) => self.finish_connect(id, link),
                Err(error) => self.fail_connect(id, error),
            },
            Instruction::InboundEstablished { link } => {
                let id = ConnectionId::new(self.next_conn_id.fetch_add(1, Ordering::SeqCst));
                self.establish(id, link, Vec::new(), None);
            }
            Instruction::Inbound { conn, envelope } => self.dispatch(conn, envelope),
            Instruction::PeerClosed { conn } => self.close_connection(conn, "peer closed"),
        }
    }

    /// Tick work: expire overdue connects and requests. Removal happens
    /// here, on the owning task, so an expiry can never race a reply for
    /// the same tag.
    fn sweep(&mut self) {
        let now = Instant::now();
        for id in self.connections.expired_connects(now) {
            self.fail_connect(id, Error::ConnectionTimeout);
        }
        for pending in self.correlator.expire(now) {
            self.workers.submit(Task::ReplyCallback {
                callback: pending.callback,
                ok: false,
                frames: vec![TIMEOUT_SENTINEL.to_vec()],
            });
        }
    }

    fn spawn_listener(&mut self, listener: Listener) {
        let events = self.events.clone();
        let identity = Arc::clone(&self.identity);
        let handshake_timeout = self.config.handshake_timeout;
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let events = events.clone();
                        let identity = Arc::clone(&identity);
                        tokio::spawn(async move {
                            match tokio::time::timeout(
                                handshake_timeout,
                                accept_handshake(stream, &identity, peer),
                            )
                            .await
                            {
                                Ok(Ok(link)) => {
                                    let _ = events.send(Instruction::InboundEstablished { link });
                                }
                                Ok(Err(e)) => debug!("inbound handshake from {peer} failed: {e}"),
                                Err(_) => debug!("inbound handshake from {peer} timed out"),
                            }
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        self.listener_tasks.push(handle);
    }

    fn start_request(
        &mut self,
        conn: ConnectionId,
        target: String,
        frames: Vec<Vec<u8>>,
        callback: ReplyCallback,
        timeout: Option<Duration>,
    ) {
        if self.connections.get(conn).is_none() {
            // Closed between the caller's validation and now.
            self.workers.submit(Task::ReplyCallback {
                callback,
                ok: false,
                frames: vec![CLOSED_SENTINEL.to_vec()],
            });
            return;
        }
        let deadline =
            Instant::now() + timeout.unwrap_or(self.config.default_request_timeout);
        let tag = self.correlator.register(conn, callback, deadline);
        self.enqueue(conn, Envelope::Request { tag, target, frames });
    }

    /// Route an outbound envelope to its connection: queued while
    /// connecting, into the writer task's inbox once established.
    fn enqueue(&mut self, conn: ConnectionId, envelope: Envelope) {
        match self.connections.get_mut(conn) {
            Some(ConnectionEntry::Connecting { queued, .. }) => queued.push(envelope),
            Some(ConnectionEntry::Established { outbox, .. }) => {
                // A send error means the writer died; the PeerClosed event
                // is already on its way.
                let _ = outbox.send(envelope);
            }
            None => warn!("{conn} unknown; dropping outbound {:?}", envelope.kind()),
        }
    }

    fn finish_connect(&mut self, id: ConnectionId, link: EstablishedLink) {
        let Some(entry) = self.connections.remove(id) else {
            // The connect timed out on an earlier tick; the loser of that
            // race drops the link.
            debug!("{id} handshake completed after removal; dropping link");
            return;
        };
        let ConnectionEntry::Connecting {
            on_success, queued, ..
        } = entry
        else {
            warn!("{id} finished connect in unexpected state");
            return;
        };
        self.establish(id, link, queued, Some(on_success));
    }

    fn fail_connect(&mut self, id: ConnectionId, error: Error) {
        let Some(entry) = self.connections.remove(id) else {
            return;
        };
        let ConnectionEntry::Connecting { on_failure, .. } = entry else {
            warn!("{id} reported a connect failure while established");
            return;
        };
        debug!("{id} connect failed: {error}");
        self.fail_owned_requests(id);
        self.workers.submit(Task::ConnectFailure {
            callback: on_failure,
            id,
            error,
        });
    }

    /// Install an established link: resolve the auth level, spawn the
    /// reader and writer tasks, flush anything queued while connecting.
    fn establish(
        &mut self,
        id: ConnectionId,
        link: EstablishedLink,
        queued: Vec<Envelope>,
        on_success: Option<ConnectCallback>,
    ) {
        let level = self.resolve_auth(&link.remote_pubkey);
        let info = ConnectionInfo::new(id, link.remote_pubkey, level, link.remote_addr);
        info!(
            "{id} established with {} at {} (auth {})",
            info.pubkey(),
            info.remote_addr(),
            info.auth_level()
        );

        let (outbox_tx, outbox_rx) = unbounded_channel();
        let reader = spawn_reader(id, link.reader, link.keys.rx, self.events.clone());
        let writer = spawn_writer(id, link.writer, link.keys.tx, outbox_rx, self.events.clone());
        for envelope in queued {
            let _ = outbox_tx.send(envelope);
        }
        self.connections
            .insert_established(info.clone(), outbox_tx, reader, writer);

        if let Some(callback) = on_success {
            self.workers.submit(Task::ConnectSuccess { callback, info });
        }
    }

    /// Resolve the auth level for a freshly established connection.
    /// Called exactly once per connection, on the proxy task.
    fn resolve_auth(&self, pubkey: &PublicKey) -> AuthLevel {
        match &self.resolver {
            Some(resolve) => resolve(pubkey),
            None if self.config.privileged_service => AuthLevel::Basic,
            None => AuthLevel::None,
        }
    }

    fn dispatch(&mut self, conn: ConnectionId, envelope: Envelope) {
        match envelope {
            Envelope::Reply { tag, ok, frames } => match self.correlator.resolve(tag) {
                Some(pending) => self.workers.submit(Task::ReplyCallback {
                    callback: pending.callback,
                    ok,
                    frames,
                }),
                // Already resolved or expired; a late reply must never
                // re-invoke a callback.
                None => debug!("stale reply tag {tag} on {conn}; dropping"),
            },
            Envelope::Send { target, frames } => {
                self.dispatch_command(conn, &target, frames, None);
            }
            Envelope::Request { tag, target, frames } => {
                self.dispatch_command(conn, &target, frames, Some(tag));
            }
        }
    }

    fn dispatch_command(
        &mut self,
        conn: ConnectionId,
        target: &str,
        frames: Vec<Vec<u8>>,
        request_tag: Option<u64>,
    ) {
        let info = match self.connections.get(conn) {
            Some(ConnectionEntry::Established { info, .. }) => info.clone(),
            _ => {
                debug!("{conn} vanished before dispatch of {target}");
                return;
            }
        };
        match self.registry.lookup(target, info.auth_level()) {
            Ok(entry) => {
                let (category, command) = split_target(target);
                // Only request-registered commands get a ticket; a stray
                // send_reply elsewhere is ignored by construction.
                let ticket = match request_tag {
                    Some(tag) if entry.is_request => {
                        Some(ReplyTicket::new(conn, tag, self.events.clone()))
                    }
                    _ => None,
                };
                let message = Message::new(
                    conn,
                    info.pubkey(),
                    info.auth_level(),
                    category.to_string(),
                    command.to_string(),
                    frames,
                    ticket,
                );
                self.workers.submit(Task::Dispatch {
                    handler: Arc::clone(&entry.handler),
                    message,
                });
            }
            Err(e) => {
                warn!("{conn} dispatch of {target} refused: {e}");
                // Requests get a synthetic failure reply so the sender
                // does not have to wait for its timeout.
                if let (Some(tag), Some(sentinel)) = (request_tag, e.routing_sentinel()) {
                    self.enqueue(
                        conn,
                        Envelope::Reply {
                            tag,
                            ok: false,
                            frames: vec![sentinel.to_vec()],
                        },
                    );
                }
            }
        }
    }

    /// Tear down a connection and fail everything it owns. Idempotent:
    /// both io tasks report `PeerClosed` and the second call is a no-op.
    fn close_connection(&mut self, conn: ConnectionId, reason: &str) {
        let Some(entry) = self.connections.remove(conn) else {
            return;
        };
        match entry {
            ConnectionEntry::Established { info, reader, writer, outbox } => {
                info!("{conn} closed ({reason}); peer was {}", info.pubkey());
                // Dropping the outbox lets the writer flush and exit;
                // the reader is torn down immediately.
                drop(outbox);
                reader.abort();
                drop(writer);
            }
            ConnectionEntry::Connecting { on_failure, .. } => {
                self.workers.submit(Task::ConnectFailure {
                    callback: on_failure,
                    id: conn,
                    error: Error::ConnectionClosed,
                });
            }
        }
        self.fail_owned_requests(conn);
    }

    fn fail_owned_requests(&mut self, conn: ConnectionId) {
        for pending in self.correlator.fail_connection(conn) {
            self.workers.submit(Task::ReplyCallback {
                callback: pending.callback,
                ok: false,
                frames: vec![CLOSED_SENTINEL.to_vec()],
            });
        }
    }

    /// Shutdown drain: stop listeners, fail every pending request, tear
    /// down every connection, then join the workers after their queue
    /// empties. No handler starts after this returns.
    async fn drain(mut self) {
        info!(
            "proxy draining: {} connections, {} pending requests",
            self.connections.len(),
            self.correlator.len()
        );
        for task in &self.listener_tasks {
            task.abort();
        }
        for pending in self.correlator.drain() {
            self.workers.submit(Task::ReplyCallback {
                callback: pending.callback,
                ok: false,
                frames: vec![CLOSED_SENTINEL.to_vec()],
            });
        }
        for id in self.connections.ids() {
            match self.connections.remove(id) {
                Some(ConnectionEntry::Established { reader, .. }) => reader.abort(),
                Some(ConnectionEntry::Connecting { on_failure, .. }) => {
                    self.workers.submit(Task::ConnectFailure {
                        callback: on_failure,
                        id,
                        error: Error::ShuttingDown,
                    });
                }
                None => {}
            }
        }
        // Joining worker threads blocks; do it off the runtime.
        let workers = self.workers;
        let _ = tokio::task::spawn_blocking(move || workers.shutdown()).await;
        info!("proxy stopped");
    }
}

/// Dial and handshake as the initiating side.
async fn connect_handshake(
    addr: &str,
    identity: &Keypair,
    remote_pubkey: PublicKey,
) -> Result<EstablishedLink> {
    let mut stream = FramedStream::connect(addr).await?;
    let remote_addr = stream.peer_addr()?;

    let hs = ClientHandshake::new(identity, remote_pubkey);
    stream.write_frame(&hs.hello()).await?;
    let response = stream
        .read_frame()
        .await?
        .ok_or_else(|| Error::handshake("closed during handshake"))?;
    let mut keys = hs.finish(&response)?;

    // Key confirmation: the server speaks first.
    let ready = stream
        .read_frame()
        .await?
        .ok_or_else(|| Error::handshake("closed before ready"))?;
    let ready = keys
        .rx
        .open(&ready)
        .map_err(|_| Error::handshake("server failed key confirmation"))?;
    if ready != READY {
        return Err(Error::handshake("bad ready payload"));
    }
    let confirm = keys.tx.seal(READY)?;
    stream.write_frame(&confirm).await?;

    let (reader, writer) = stream.into_split();
    Ok(EstablishedLink {
        reader,
        writer,
        keys,
        remote_pubkey,
        remote_addr,
    })
}

/// Handshake as the accepting side.
async fn accept_handshake(
    mut stream: FramedStream,
    identity: &Keypair,
    peer: SocketAddr,
) -> Result<EstablishedLink> {
    let hello = stream
        .read_frame()
        .await?
        .ok_or_else(|| Error::handshake("closed during handshake"))?;
    let (response, mut keys, client_static) = ServerHandshake::respond(identity, &hello)?;
    stream.write_frame(&response).await?;

    let ready = keys.tx.seal(READY)?;
    stream.write_frame(&ready).await?;
    let confirm = stream
        .read_frame()
        .await?
        .ok_or_else(|| Error::handshake("closed before ready"))?;
    let confirm = keys
        .rx
        .open(&confirm)
        .map_err(|_| Error::handshake("client failed key confirmation"))?;
    if confirm != READY {
        return Err(Error::handshake("bad ready payload"));
    }

    let (reader, writer) = stream.into_split();
    Ok(EstablishedLink {
        reader,
        writer,
        keys,
        remote_pubkey: client_static,
        remote_addr: peer,
    })
}

/// Reader task: decrypt and decode inbound frames, forward them as
/// events. Any transport, cipher or codec failure tears the link down.
fn spawn_reader(
    id: ConnectionId,
    mut reader: FramedReader,
    mut rx: CipherState,
    events: UnboundedSender<Instruction>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match reader.read_frame().await {
                Ok(Some(ciphertext)) => {
                    let plaintext = match rx.open(&ciphertext) {
                        Ok(plaintext) => plaintext,
                        Err(e) => {
                            warn!("{id} decrypt failed: {e}");
                            break;
                        }
                    };
                    match Envelope::decode(&plaintext) {
                        Ok(envelope) => {
                            if events.send(Instruction::Inbound { conn: id, envelope }).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("{id} malformed envelope: {e}");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!("{id} closed by peer");
                    break;
                }
                Err(e) => {
                    debug!("{id} read error: {e}");
                    break;
                }
            }
        }
        let _ = events.send(Instruction::PeerClosed { conn: id });
    })
}

/// Writer task: sole owner of the write half and the send cipher, so wire
/// order per connection follows inbox order.
fn spawn_writer(
    id: ConnectionId,
    mut writer: FramedWriter,
    mut tx: CipherState,
    mut outbox: UnboundedReceiver<Envelope>,
    events: UnboundedSender<Instruction>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = outbox.recv().await {
            let plaintext = match envelope.encode() {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("{id} dropping unencodable envelope: {e}");
                    continue;
                }
            };
            let ciphertext = match tx.seal(&plaintext) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    error!("{id} seal failed: {e}");
                    break;
                }
            };
            if let Err(e) = writer.write_frame(&ciphertext).await {
                debug!("{id} write failed: {e}");
                break;
            }
        }
        let _ = events.send(Instruction::PeerClosed { conn: id });
    })
}
