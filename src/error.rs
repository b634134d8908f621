//! Typed errors at the executor, ingest, and discovery boundaries.
//!
//! Each variant is one failure class from the risk/retry policy: validation
//! errors abort the current order and are never retried, transient transport
//! errors are retried with backoff, terminal ingest errors shut down the
//! affected source only.

use thiserror::Error;

/// Executor failures. Validation variants abort the order with no
/// submission; `Execution` wraps venue/transport failures.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("position size {size:.2} USDC exceeds maximum {max:.2} USDC")]
    PositionSize { size: f64, max: f64 },

    #[error("order book unavailable: {0}")]
    OrderBook(String),

    #[error("price validation failed: {0}")]
    PriceValidation(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

/// Ingest source failures.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    /// Terminal: the reconnect budget is spent. The orchestrator treats
    /// this as a shutdown condition for the failing source only.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Discovery (catalog HTTP) failures, split by retry class.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("rate limited, retry after {retry_after:.1}s")]
    RateLimit { retry_after: f64 },

    #[error("server error {status}")]
    Server { status: u16 },

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_limit() {
        let e = ExecError::PositionSize {
            size: 1500.0,
            max: 1000.0,
        };
        let msg = e.to_string();
        assert!(msg.contains("1500.00"));
        assert!(msg.contains("1000.00"));
    }

    #[test]
    fn test_reconnect_exhausted_counts_attempts() {
        let e = IngestError::ReconnectExhausted { attempts: 5 };
        assert!(e.to_string().contains('5'));
    }
}
