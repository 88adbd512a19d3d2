use crate::conflict::ConflictReport;
use crate::policy::PolicyViolation;
use crate::provider::RequestReply;
use crate::rate_limit::OperationClass;
use crate::resolver::RangeCandidate;
use crate::transaction::{TransactionId, TransactionState};
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = OpsError> = std::result::Result<T, E>;

/// Every failure the orchestration core can surface.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("invalid intent{}: {message}", fmt_intent(.intent_index, .kind))]
    Validation {
        intent_index: Option<usize>,
        kind: Option<&'static str>,
        message: String,
    },

    #[error("range not found{}: {reference} ({reason})", fmt_intent(.intent_index, &None))]
    RangeNotFound {
        intent_index: Option<usize>,
        reference: String,
        reason: String,
    },

    #[error(
        "ambiguous range{}: {reference} (best confidence {confidence:.2}, {} candidates)",
        fmt_intent(.intent_index, &None),
        .candidates.len()
    )]
    AmbiguousRange {
        intent_index: Option<usize>,
        reference: String,
        confidence: f64,
        candidates: Vec<RangeCandidate>,
    },

    #[error("policy violation: {}", summarize_violations(.violations))]
    PolicyViolation { violations: Vec<PolicyViolation> },

    #[error("{class} quota exhausted; retry after {retry_after_ms}ms")]
    QuotaExceeded {
        class: OperationClass,
        retry_after_ms: u64,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(
        "conflict detected on {}: expected {}, observed {}",
        .report.range,
        .report.expected_checksum,
        .report.observed_checksum.as_deref().unwrap_or("<missing>")
    )]
    ConflictDetected { report: Box<ConflictReport> },

    #[error("transaction {transaction_id} is {state}; cannot {operation}")]
    InvalidTransactionState {
        transaction_id: TransactionId,
        state: TransactionState,
        operation: &'static str,
    },

    #[error("unknown transaction {transaction_id} (expired, purged, or never begun)")]
    UnknownTransaction { transaction_id: TransactionId },

    #[error("snapshot needs {required_bytes} bytes, over the {limit} byte ceiling")]
    SnapshotTooLarge { required_bytes: usize, limit: usize },

    #[error("{what} exceeds the {limit} byte serialization limit")]
    SerializationLimitExceeded { what: &'static str, limit: usize },

    #[error("{operation} timed out after {elapsed_ms}ms{}", timeout_note(.dispatched))]
    Timeout {
        operation: &'static str,
        elapsed_ms: u64,
        dispatched: bool,
    },

    #[error("{operation} cancelled {}", cancel_note(.dispatched))]
    Cancelled {
        operation: &'static str,
        dispatched: bool,
    },
}

fn fmt_intent(index: &Option<usize>, kind: &Option<&'static str>) -> String {
    match (*index, *kind) {
        (Some(i), Some(k)) => format!(" #{i} ({k})"),
        (Some(i), None) => format!(" #{i}"),
        (None, Some(k)) => format!(" ({k})"),
        (None, None) => String::new(),
    }
}

fn timeout_note(dispatched: &bool) -> &'static str {
    if *dispatched {
        " (remote operation may still complete)"
    } else {
        ""
    }
}

fn cancel_note(dispatched: &bool) -> &'static str {
    if *dispatched {
        "after dispatch (remote operation may still complete)"
    } else {
        "before dispatch"
    }
}

fn summarize_violations(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl OpsError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            intent_index: None,
            kind: None,
            message: message.into(),
        }
    }

    /// Attach the position of the offending intent, where the variant carries one.
    pub fn at_intent(mut self, index: usize) -> Self {
        match &mut self {
            Self::Validation { intent_index, .. }
            | Self::RangeNotFound { intent_index, .. }
            | Self::AmbiguousRange { intent_index, .. } => {
                if intent_index.is_none() {
                    *intent_index = Some(index);
                }
            }
            _ => {}
        }
        self
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. } | Self::Timeout { .. } => true,
            Self::Provider(err) => err.is_retryable(),
            Self::Validation { .. }
            | Self::RangeNotFound { .. }
            | Self::AmbiguousRange { .. }
            | Self::PolicyViolation { .. }
            | Self::ConflictDetected { .. }
            | Self::InvalidTransactionState { .. }
            | Self::UnknownTransaction { .. }
            | Self::SnapshotTooLarge { .. }
            | Self::SerializationLimitExceeded { .. }
            | Self::Cancelled { .. } => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::RangeNotFound { .. } => "RANGE_NOT_FOUND",
            Self::AmbiguousRange { .. } => "AMBIGUOUS_RANGE",
            Self::PolicyViolation { .. } => "POLICY_VIOLATION",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::ConflictDetected { .. } => "CONFLICT_DETECTED",
            Self::InvalidTransactionState { .. } => "INVALID_TRANSACTION_STATE",
            Self::UnknownTransaction { .. } => "UNKNOWN_TRANSACTION",
            Self::SnapshotTooLarge { .. } => "SNAPSHOT_TOO_LARGE",
            Self::SerializationLimitExceeded { .. } => "SERIALIZATION_LIMIT_EXCEEDED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The provider rejected the call for quota reasons.
    Throttled,
    /// Credential missing/expired. Forwarded, never retried here.
    Auth,
    NotFound,
    InvalidRequest,
    Unavailable,
    Other,
}

/// Opaque upstream failure as reported by the provider client.
#[derive(Debug, Clone, Error, Serialize)]
#[error("provider {kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// Set by the provider when a retry may succeed.
    pub transient: bool,
    /// How many leading requests of a batch were applied before the failure,
    /// when the provider knows.
    pub applied_requests: Option<usize>,
    /// Replies for the applied prefix, carrying ids of objects it created.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applied_replies: Vec<RequestReply>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let transient = matches!(
            kind,
            ProviderErrorKind::Throttled | ProviderErrorKind::Unavailable
        );
        Self {
            kind,
            message: message.into(),
            transient,
            applied_requests: None,
            applied_replies: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Throttled, message).with_applied(0)
    }

    pub fn with_applied(mut self, applied: usize) -> Self {
        self.applied_requests = Some(applied);
        self
    }

    pub fn with_replies(mut self, replies: Vec<RequestReply>) -> Self {
        self.applied_replies = replies;
        self
    }

    pub fn is_throttle(&self) -> bool {
        self.kind == ProviderErrorKind::Throttled
    }

    pub fn is_retryable(&self) -> bool {
        self.transient && self.kind != ProviderErrorKind::Auth
    }
}
