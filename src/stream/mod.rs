//! Long-lived gRPC stream maintenance (spec §4.1 contract, §5 scheduling).
//!
//! [`client::StreamClient`] owns the connection and reconnect loop;
//! [`backoff::BackoffPolicy`] is the pure value it reconnects with, kept
//! stateless across reconnects besides the last-seen slot (spec §9 Design
//! Notes, "reconnect-by-timer idioms").

pub mod backoff;
pub mod client;

pub use client::{OverflowQueue, StreamClient, StreamClientConfig, StreamEvent};
