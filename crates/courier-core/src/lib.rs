//! # COURIER Core
//!
//! Core of the COURIER RPC layer: peers exchange authenticated, encrypted,
//! length-framed messages addressed as `category.command`, either
//! fire-and-forget or as correlated request/reply exchanges with timeouts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Courier (handle)                          │
//! │   non-blocking API calls enqueue typed instructions              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        Proxy Core (one task)                     │
//! │   sole owner of sockets, connection table, pending requests;     │
//! │   drives dispatch and the timeout sweep                          │
//! ├──────────────────────────────┬──────────────────────────────────┤
//! │     Worker Pool (threads)    │       Correlator                 │
//! │   handlers and callbacks     │   tag -> pending request         │
//! └──────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use courier_core::{Access, Courier, RequestOptions};
//!
//! # async fn example() -> courier_core::Result<()> {
//! let server = Courier::builder().listen("tcp://127.0.0.1:4567").build();
//! server.add_category("public", Access::open())?;
//! server.add_request_command("public", "hello", |mut m| m.send_reply(["123"]), None)?;
//! server.start().await?;
//!
//! let client = Courier::builder().build();
//! client.start().await?;
//! let conn = client.connect_remote(
//!     "tcp://127.0.0.1:4567",
//!     |info| println!("connected to {}", info.pubkey()),
//!     |id, err| eprintln!("{id} failed: {err}"),
//!     server.public_key(),
//!     None,
//! )?;
//! client.request(
//!     conn,
//!     "public.hello",
//!     |ok, frames| println!("ok={ok} frames={}", frames.len()),
//!     Vec::<Vec<u8>>::new(),
//!     RequestOptions::new(),
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod auth;
pub mod config;
pub mod connection;
mod correlator;
mod courier;
pub mod error;
pub mod message;
mod proxy;
pub mod registry;
pub mod wire;
mod workers;

pub use auth::{Access, AuthLevel, AuthResolver};
pub use config::Config;
pub use connection::{ConnectionId, ConnectionInfo, ConnectionState};
pub use courier::{Courier, CourierBuilder, RequestOptions};
pub use error::{Error, Result};
pub use message::{Message, ReplyTicket};
pub use registry::Handler;
pub use wire::{Envelope, EnvelopeKind, TARGET_SEPARATOR, WireError};

// Identity types are part of the public surface.
pub use courier_crypto::{Keypair, PublicKey, SecretKey};

/// Sentinel frame delivered with `ok == false` when a request times out.
pub const TIMEOUT_SENTINEL: &[u8] = b"TIMEOUT";

/// Sentinel frame delivered with `ok == false` when the owning connection
/// closes (or the node shuts down) with the request outstanding.
pub const CLOSED_SENTINEL: &[u8] = b"CLOSED";

/// Synthetic reply payload for a request naming an unknown category.
pub const UNKNOWN_CATEGORY_SENTINEL: &[u8] = b"UNKNOWN_CATEGORY";

/// Synthetic reply payload for a request naming an unknown command.
pub const UNKNOWN_COMMAND_SENTINEL: &[u8] = b"UNKNOWN_COMMAND";

/// Synthetic reply payload for a request refused by the access check.
pub const ACCESS_DENIED_SENTINEL: &[u8] = b"ACCESS_DENIED";
