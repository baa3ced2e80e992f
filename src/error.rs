//! # Error Handling
//!
//! Error taxonomy for the sync engine. `RemoteError` is the raw error surface
//! of a [`crate::remote::RemoteApi`] implementation; the resilient client
//! classifies it into [`SyncError`], which is what the orchestrator and
//! scheduler reason about. Classification drives retry behavior: only
//! `Transient` and `RateLimited` consume retry budget, a `BreakerOpen`
//! rejection never does.

use thiserror::Error;

use crate::store::StoreError;

/// Error produced by a raw remote-platform client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Non-success HTTP status from the remote instance.
    #[error("HTTP {status} from remote: {body}")]
    Http { status: u16, body: String },

    /// Remote signalled throttling (429), with an optional Retry-After hint.
    #[error("rate limited by remote (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Connection-level failure (DNS, TLS, reset, client-side timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response missing required identifiers or otherwise malformed.
    #[error("remote contract violation: {details}")]
    Contract { details: String },

    /// Download target resolved to a forbidden network destination.
    #[error("download rejected for {url}: {reason}")]
    SsrfRejected { url: String, reason: String },

    /// Download exceeded the configured size ceiling.
    #[error("download exceeds size ceiling of {limit_bytes} bytes")]
    TooLarge { limit_bytes: u64 },
}

impl RemoteError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http { status, .. } => *status >= 500,
            RemoteError::RateLimited { .. } => true,
            RemoteError::Network(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            RemoteError::Contract { .. }
            | RemoteError::SsrfRejected { .. }
            | RemoteError::TooLarge { .. } => false,
        }
    }
}

/// Classified engine error.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Retryable remote failure (timeout, 5xx, connection reset).
    #[error("transient remote failure: {details}")]
    Transient { details: String },

    /// Remote throttling; retried honoring the Retry-After hint.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Circuit breaker rejected the call before it was attempted.
    #[error("instance unavailable: circuit open for {destination}")]
    BreakerOpen { destination: String },

    /// Remote rejected the operation (4xx other than 429). Not retried.
    #[error("remote rejected operation (HTTP {status}): {details}")]
    Rejected { status: u16, details: String },

    /// Malformed or incomplete remote response. Not retried.
    #[error("remote contract violation: {details}")]
    Contract { details: String },

    /// Attachment URL resolved to a forbidden destination. Never retried.
    #[error("attachment rejected for {url}: {reason}")]
    SsrfRejected { url: String, reason: String },

    /// Attachment exceeded the configured size ceiling.
    #[error("attachment exceeds size ceiling of {limit_bytes} bytes")]
    TooLarge { limit_bytes: u64 },

    /// Persistence failure. Run-level fatal: a sync run cannot continue
    /// without durable mapping and checkpoint state.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// Run-level fatal condition (config deleted mid-run, budget exhausted).
    #[error("fatal: {context}")]
    Fatal { context: String },
}

impl SyncError {
    pub fn fatal<S: Into<String>>(context: S) -> Self {
        SyncError::Fatal {
            context: context.into(),
        }
    }

    /// Whether the facade may retry this error within its attempt budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient { .. } | SyncError::RateLimited { .. }
        )
    }

    /// Whether this error must abort the whole run rather than one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Store(_) | SyncError::Fatal { .. })
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::RateLimited { retry_after_secs } => {
                SyncError::RateLimited { retry_after_secs }
            }
            RemoteError::Http { status: 429, .. } => SyncError::RateLimited {
                retry_after_secs: None,
            },
            RemoteError::Http { status, body } if status >= 500 => SyncError::Transient {
                details: format!("HTTP {status}: {body}"),
            },
            RemoteError::Http { status, body } => SyncError::Rejected {
                status,
                details: body,
            },
            RemoteError::Network(err) => {
                let details = err.to_string();
                if err.is_timeout() || err.is_connect() || err.is_request() {
                    SyncError::Transient { details }
                } else {
                    SyncError::Rejected { status: 0, details }
                }
            }
            RemoteError::Contract { details } => SyncError::Contract { details },
            RemoteError::SsrfRejected { url, reason } => SyncError::SsrfRejected { url, reason },
            RemoteError::TooLarge { limit_bytes } => SyncError::TooLarge { limit_bytes },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_5xx_classifies_transient() {
        let err = SyncError::from(RemoteError::Http {
            status: 503,
            body: "unavailable".to_string(),
        });
        assert!(matches!(err, SyncError::Transient { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn http_429_classifies_rate_limited() {
        let err = SyncError::from(RemoteError::Http {
            status: 429,
            body: String::new(),
        });
        assert!(matches!(err, SyncError::RateLimited { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn http_4xx_is_not_retryable() {
        let err = SyncError::from(RemoteError::Http {
            status: 404,
            body: "not found".to_string(),
        });
        assert!(matches!(err, SyncError::Rejected { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn contract_violation_is_not_retryable() {
        let err = SyncError::from(RemoteError::Contract {
            details: "issue missing id".to_string(),
        });
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn ssrf_rejection_carries_url_and_reason() {
        let err = SyncError::from(RemoteError::SsrfRejected {
            url: "http://169.254.169.254/latest".to_string(),
            reason: "link-local address".to_string(),
        });
        match err {
            SyncError::SsrfRejected { url, .. } => {
                assert!(url.contains("169.254.169.254"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}
