//! # COURIER Transport
//!
//! Network transport layer for the COURIER RPC layer.
//!
//! This crate provides:
//! - Address string parsing (`tcp://host:port`)
//! - A TCP listener wrapper
//! - Length-framed streams: every wire unit is a `u32` big-endian length
//!   prefix followed by that many payload bytes, with a hard size cap

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod tcp;
pub mod transport;

pub use addr::parse_addr;
pub use tcp::{FramedReader, FramedStream, FramedWriter, Listener};
pub use transport::{TransportError, TransportResult};

/// Size of the length prefix on every wire frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum payload size of a single wire frame (16 MiB).
pub const MAX_WIRE_FRAME: usize = 16 * 1024 * 1024;
