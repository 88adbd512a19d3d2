use crate::errors::OpsError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub try_this: Option<String>,
}

pub fn envelope_for(error: &anyhow::Error) -> ErrorEnvelope {
    if let Some(ops) = error.downcast_ref::<OpsError>() {
        return envelope_for_ops(ops);
    }

    let message = format!("{error:#}");

    if message.contains("does not exist") || message.contains("failed to read") {
        return ErrorEnvelope {
            code: "FILE_NOT_FOUND".to_string(),
            message,
            retryable: false,
            try_this: Some("check the file path and permissions".to_string()),
        };
    }

    if message.contains("failed to parse") {
        return ErrorEnvelope {
            code: "INVALID_INPUT".to_string(),
            message,
            retryable: false,
            try_this: Some("run `sheetops schema` to see the accepted intent shapes".to_string()),
        };
    }

    if message.contains("must be") || message.contains("must not") {
        return ErrorEnvelope {
            code: "INVALID_CONFIG".to_string(),
            message,
            retryable: false,
            try_this: Some("fix the flag, SHEETOPS_* variable or config file entry".to_string()),
        };
    }

    ErrorEnvelope {
        code: "COMMAND_FAILED".to_string(),
        message,
        retryable: false,
        try_this: None,
    }
}

pub fn envelope_for_ops(error: &OpsError) -> ErrorEnvelope {
    ErrorEnvelope {
        code: error.code().to_string(),
        message: error.to_string(),
        retryable: error.is_retryable(),
        try_this: try_this(error).map(str::to_string),
    }
}

fn try_this(error: &OpsError) -> Option<&'static str> {
    match error {
        OpsError::Validation { .. } => {
            Some("fix the intent at the reported index; `sheetops schema` lists every shape")
        }
        OpsError::RangeNotFound { .. } => {
            Some("check the section id and notation against the workbook")
        }
        OpsError::AmbiguousRange { .. } => {
            Some("use an explicit A1 range, or set best_effort on the header reference")
        }
        OpsError::PolicyViolation { .. } => {
            Some("split the batch into smaller ones, or re-run with --confirm")
        }
        OpsError::QuotaExceeded { .. } => Some("wait for retry_after_ms, then retry"),
        OpsError::Timeout { .. } => Some("retry, or raise --call-timeout-ms"),
        OpsError::SnapshotTooLarge { .. } => Some("raise --snapshot-max-bytes"),
        OpsError::SerializationLimitExceeded { .. } => {
            Some("split the intents, or raise --max-batch-bytes")
        }
        OpsError::ConflictDetected { .. } => {
            Some("re-read the range and decide whether to overwrite, merge or abort")
        }
        OpsError::InvalidTransactionState { .. } | OpsError::UnknownTransaction { .. } => {
            Some("begin a new transaction")
        }
        OpsError::Provider(_) | OpsError::Cancelled { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_errors_keep_their_code() {
        let error = anyhow::Error::new(OpsError::validation("bad"));
        let envelope = envelope_for(&error);
        assert_eq!(envelope.code, "VALIDATION_ERROR");
        assert!(!envelope.retryable);
        assert!(envelope.try_this.is_some());
    }

    #[test]
    fn context_does_not_hide_the_code() {
        let error = anyhow::Error::new(OpsError::Timeout {
            operation: "batch dispatch",
            elapsed_ms: 10,
            dispatched: false,
        })
        .context("simulate failed");
        let envelope = envelope_for(&error);
        assert_eq!(envelope.code, "TIMEOUT");
        assert!(envelope.retryable);
    }

    #[test]
    fn unknown_errors_fall_back() {
        let envelope = envelope_for(&anyhow::anyhow!("boom"));
        assert_eq!(envelope.code, "COMMAND_FAILED");
    }
}
