//! Shared helpers for COURIER integration tests.
//!
//! Callbacks fire on worker threads, so tests observe them through
//! `Arc`-shared probes and poll with [`wait_for`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use courier_core::connection::{ConnectionId, ConnectionInfo};
use courier_core::{Courier, Error};

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

/// Install a test subscriber once per process (best effort).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Build a node with the fast test tick, optionally listening.
pub fn test_node(listen: bool) -> Courier {
    let mut builder = Courier::builder().tick_interval(Duration::from_millis(10));
    if listen {
        builder = builder.listen("tcp://127.0.0.1:0");
    }
    builder.build()
}

/// The canonical `tcp://` address of a started listening node.
pub fn addr_of(node: &Courier) -> String {
    format!("tcp://{}", node.listen_addrs()[0])
}

/// Captures the outcome of a request callback, counting invocations.
#[derive(Clone, Default)]
pub struct ReplyProbe {
    outcome: Arc<Mutex<Option<(bool, Vec<Vec<u8>>)>>>,
    fired: Arc<AtomicUsize>,
}

impl ReplyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// The callback to hand to `Courier::request`.
    pub fn callback(&self) -> impl FnOnce(bool, Vec<Vec<u8>>) + Send + 'static {
        let outcome = Arc::clone(&self.outcome);
        let fired = Arc::clone(&self.fired);
        move |ok, frames| {
            *outcome.lock().unwrap() = Some((ok, frames));
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// How many times the callback has fired (must end up 0 or 1).
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn outcome(&self) -> Option<(bool, Vec<Vec<u8>>)> {
        self.outcome.lock().unwrap().clone()
    }

    /// Wait until the callback fires, returning its outcome.
    pub async fn wait(&self, timeout: Duration) -> Option<(bool, Vec<Vec<u8>>)> {
        wait_for(|| self.fired() > 0, timeout).await;
        self.outcome()
    }
}

/// Captures connect callbacks, counting both paths.
#[derive(Clone, Default)]
pub struct ConnectProbe {
    info: Arc<Mutex<Option<ConnectionInfo>>>,
    error: Arc<Mutex<Option<String>>>,
    successes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl ConnectProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(&self) -> impl FnOnce(ConnectionInfo) + Send + 'static {
        let info = Arc::clone(&self.info);
        let successes = Arc::clone(&self.successes);
        move |connection| {
            *info.lock().unwrap() = Some(connection);
            successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn on_failure(&self) -> impl FnOnce(ConnectionId, Error) + Send + 'static {
        let error = Arc::clone(&self.error);
        let failures = Arc::clone(&self.failures);
        move |_id, e| {
            *error.lock().unwrap() = Some(e.to_string());
            failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.info.lock().unwrap().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    /// Wait until either callback fires.
    pub async fn wait(&self, timeout: Duration) -> bool {
        wait_for(|| self.successes() + self.failures() > 0, timeout).await
    }
}

/// Connect `client` to `server` and wait for establishment, panicking on
/// failure. Returns the connection id and the pubkey seen in `on_success`.
pub async fn connect_ok(client: &Courier, server: &Courier) -> (ConnectionId, ConnectionInfo) {
    let probe = ConnectProbe::new();
    let conn = client
        .connect_remote(
            &addr_of(server),
            probe.on_success(),
            probe.on_failure(),
            server.public_key(),
            None,
        )
        .expect("connect_remote failed");
    assert!(probe.wait(Duration::from_secs(5)).await, "connect timed out");
    assert_eq!(probe.failures(), 0, "connect failed: {:?}", probe.error());
    assert_eq!(probe.successes(), 1);
    (conn, probe.info().expect("missing connection info"))
}
