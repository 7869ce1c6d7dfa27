//! Typed error kinds for the ingestion core.
//!
//! Component-internal glue still returns `anyhow::Result` (see
//! [`AnyResult`]), matching the surrounding ecosystem's habit of `anyhow` at
//! the edges; anything crossing a module boundary listed in the design
//! (decoders, the price calculator, lifecycle transitions, storage writes)
//! returns [`CoreError`] so callers can match on a specific kind instead of
//! downcasting.

use thiserror::Error;

/// Alias kept for call sites that only need to propagate an opaque error,
/// mirroring the ecosystem convention of a single blanket `anyhow` alias.
pub type AnyResult<T> = anyhow::Result<T>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("gRPC authentication failed: {0}")]
    TransportAuth(String),

    #[error("transient transport error: {0}")]
    TransportTransient(String),

    #[error("payload too short to decode: need at least {needed} bytes, got {got}")]
    DecodeShort { needed: usize, got: usize },

    #[error("unknown discriminator {discriminator:?} for venue {venue}")]
    DecodeDiscriminatorUnknown { venue: &'static str, discriminator: [u8; 8] },

    #[error("arithmetic precision error: {0}")]
    ArithmeticPrecision(String),

    #[error("SOL/USD quote is stale (age {age_secs}s, ceiling {ceiling_secs}s)")]
    StaleSolQuote { age_secs: u64, ceiling_secs: u64 },

    #[error("transient storage error: {0}")]
    StorageTransient(String),

    #[error("permanent storage error: {0}")]
    StoragePermanent(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl CoreError {
    /// Whether this kind is expected to resolve itself on retry (per the
    /// propagation rules: transient transport/storage errors are retried at
    /// their component boundary and never surface to the caller).
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::TransportTransient(_) | CoreError::StorageTransient(_))
    }

    /// Whether this kind is fatal and should terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::TransportAuth(_) | CoreError::ConfigInvalid(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CoreError::TransportTransient("x".into()).is_transient());
        assert!(CoreError::StorageTransient("x".into()).is_transient());
        assert!(!CoreError::DecodeShort { needed: 8, got: 4 }.is_transient());
    }

    #[test]
    fn fatal_classification() {
        assert!(CoreError::TransportAuth("bad token".into()).is_fatal());
        assert!(CoreError::ConfigInvalid("bad threshold".into()).is_fatal());
        assert!(!CoreError::StaleSolQuote { age_secs: 400, ceiling_secs: 300 }.is_fatal());
    }
}
