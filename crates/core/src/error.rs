//! Unified error types for prayerline.
//!
//! `GatewayError` classifies what the remote service did; `Error` is what the
//! cache layer surfaces to callers once retries are exhausted or skipped.

/// Failures reported by a remote gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Credential rejected (expired session, revoked token).
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Too many requests.
    #[error("rate limited")]
    RateLimited,

    /// Server-side failure.
    #[error("HTTP error: {status}")]
    Http { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Transport failure before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// The service refused the request on business grounds.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The addressed record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::RateLimited | GatewayError::Timeout | GatewayError::Network(_) => true,
            GatewayError::Http { status } => *status >= 500,
            GatewayError::Auth(_) | GatewayError::Rejected(_) | GatewayError::NotFound(_) | GatewayError::Decode(_) => {
                false
            }
        }
    }
}

/// Unified error types for the cache coherence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Input rejected locally; the gateway was never called.
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),

    /// The gateway rejected the credential. Never retried.
    #[error("AUTH_ERROR: {0}")]
    Auth(String),

    /// A read failed after the retry budget was spent.
    #[error("REMOTE_READ_ERROR: {0}")]
    RemoteRead(GatewayError),

    /// A write failed after the retry budget was spent.
    #[error("REMOTE_WRITE_ERROR: {0}")]
    RemoteWrite(GatewayError),

    /// A cache write older than the entry it would replace.
    #[error("STALE_WRITE_IGNORED: {key}")]
    StaleWriteIgnored { key: String },
}

impl Error {
    /// Classify a failed read.
    pub fn read(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(msg) => Error::Auth(msg),
            other => Error::RemoteRead(other),
        }
    }

    /// Classify a failed write.
    pub fn write(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(msg) => Error::Auth(msg),
            other => Error::RemoteWrite(other),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}
