//! Node configuration.

use std::time::Duration;

/// Configuration for a COURIER node.
///
/// Built through [`crate::CourierBuilder`]; every field has a production
/// default. Tests typically shrink `tick_interval` to make timeout sweeps
/// fast.
#[derive(Debug, Clone)]
pub struct Config {
    /// Addresses to bind at `start()`.
    pub listen_addrs: Vec<String>,

    /// Whether this node is a privileged service; raises the default auth
    /// level granted to authenticated peers when no resolver is set.
    pub privileged_service: bool,

    /// Proxy tick driving the connect-timeout check and the request sweep.
    pub tick_interval: Duration,

    /// Deadline applied to requests without an explicit timeout.
    pub default_request_timeout: Duration,

    /// Deadline for outbound dial plus handshake.
    pub connect_timeout: Duration,

    /// Deadline for an inbound connection to finish its handshake.
    pub handshake_timeout: Duration,

    /// Worker thread count (0 = auto-detect from CPU count).
    pub worker_threads: usize,

    /// Worker task queue capacity.
    pub worker_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            privileged_service: false,
            tick_interval: Duration::from_millis(250),
            default_request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            worker_threads: 0,
            worker_queue_capacity: 10_000,
        }
    }
}
