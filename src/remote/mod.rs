//! External record client abstraction.
//!
//! The orchestrator talks to the remote ERP through the [`RecordClient`]
//! trait so tests can substitute a scripted client. Failures arrive already
//! classified: the retry loop never inspects HTTP details.

pub mod netsuite;
pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapper::MappedRecord;

/// Failure classification shared by the remote client and the job store.
///
/// `UnmappedReference` and `Internal` never originate from the remote
/// endpoint; they are produced by the orchestrator before/around the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Transient,
    RateLimited,
    Validation,
    Duplicate,
    Auth,
    UnmappedReference,
    Internal,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Transient => "transient",
            SyncErrorKind::RateLimited => "rate_limited",
            SyncErrorKind::Validation => "validation",
            SyncErrorKind::Duplicate => "duplicate",
            SyncErrorKind::Auth => "auth",
            SyncErrorKind::UnmappedReference => "unmapped_reference",
            SyncErrorKind::Internal => "internal",
        }
    }
}

/// Classified failure from one record-mutation call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// Network timeout, connection refusal, or 5xx. Retryable.
    #[error("transient remote failure: {message}")]
    Transient { message: String },

    /// Throttle response. Retryable after an extra cooldown.
    #[error("remote rate limit hit: {message}")]
    RateLimited {
        message: String,
        /// Cooldown requested by the endpoint, seconds
        retry_after: Option<u64>,
    },

    /// Field-level rejection. Permanent; message kept verbatim.
    #[error("remote validation rejected record: {message}")]
    Validation { message: String },

    /// Record already exists under a different identity. Permanent, flagged
    /// distinctly for manual identity reconciliation.
    #[error("remote reports duplicate record: {message}")]
    Duplicate { message: String },

    /// Credential failure. Job-fatal: no subsequent call can succeed.
    #[error("remote authentication failure: {message}")]
    Auth { message: String },
}

impl RemoteError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            RemoteError::Transient { .. } => SyncErrorKind::Transient,
            RemoteError::RateLimited { .. } => SyncErrorKind::RateLimited,
            RemoteError::Validation { .. } => SyncErrorKind::Validation,
            RemoteError::Duplicate { .. } => SyncErrorKind::Duplicate,
            RemoteError::Auth { .. } => SyncErrorKind::Auth,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient { .. } | RemoteError::RateLimited { .. }
        )
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteError::Transient { message }
            | RemoteError::RateLimited { message, .. }
            | RemoteError::Validation { message }
            | RemoteError::Duplicate { message }
            | RemoteError::Auth { message } => message,
        }
    }
}

/// Result of a successful create-or-update call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// Identity of the record in the external system
    pub external_id: String,
    /// True when the call created the record rather than updating it
    pub created: bool,
}

/// One record-mutation call per invocation against the external endpoint.
#[async_trait]
pub trait RecordClient: Send + Sync {
    /// Create (`external_id` absent) or update (`external_id` present) a
    /// single record.
    async fn upsert_record(
        &self,
        record: &MappedRecord,
        external_id: Option<&str>,
    ) -> Result<UpsertOutcome, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_kind() {
        assert!(
            RemoteError::Transient {
                message: "timeout".into()
            }
            .is_retryable()
        );
        assert!(
            RemoteError::RateLimited {
                message: "429".into(),
                retry_after: Some(30)
            }
            .is_retryable()
        );
        assert!(
            !RemoteError::Validation {
                message: "bad field".into()
            }
            .is_retryable()
        );
        assert!(
            !RemoteError::Duplicate {
                message: "exists".into()
            }
            .is_retryable()
        );
        assert!(
            !RemoteError::Auth {
                message: "expired".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn kinds_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(SyncErrorKind::UnmappedReference).unwrap(),
            "unmapped_reference"
        );
        assert_eq!(SyncErrorKind::RateLimited.as_str(), "rate_limited");
    }
}
