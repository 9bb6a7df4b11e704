use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;
use crate::tasks::TaskStatus;

/// Errors surfaced by the coordination layer
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("record {key} changed underneath us on all {attempts} attempts")]
    VersionConflict { key: String, attempts: u32 },

    #[error("registration failed after {attempts} attempts due to concurrent registry writes")]
    RegistrationFailed { attempts: u32 },

    #[error("update for agent {agent_id} failed after {attempts} attempts")]
    UpdateFailed { agent_id: String, attempts: u32 },

    #[error("resource {resource} is busy: lock not acquired within {waited_ms}ms")]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("record {key} is corrupt: {reason}")]
    RecordCorrupt { key: String, reason: String },

    #[error("agent {0} is not registered")]
    NotRegistered(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

impl CoordinationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoordinationError::VersionConflict { .. })
    }

    /// Stable machine-readable tag for structured results
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationError::VersionConflict { .. } => "version_conflict",
            CoordinationError::RegistrationFailed { .. } => "registration_failed",
            CoordinationError::UpdateFailed { .. } => "update_failed",
            CoordinationError::LockTimeout { .. } => "lock_timeout",
            CoordinationError::RecordCorrupt { .. } => "record_corrupt",
            CoordinationError::NotRegistered(_) => "not_registered",
            CoordinationError::TaskNotFound(_) => "task_not_found",
            CoordinationError::InvalidTransition { .. } => "invalid_transition",
            CoordinationError::Store(_) => "store",
            CoordinationError::Serialization(_) => "serialization",
            CoordinationError::Io(_) => "io",
        }
    }
}

/// Result shape handed to the host runtime: failures are data, not panics.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> OperationOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            reason: None,
            error_kind: None,
            data: Some(data),
        }
    }

    pub fn failed(error: &CoordinationError) -> Self {
        Self {
            success: false,
            reason: Some(error.to_string()),
            error_kind: Some(error.kind()),
            data: None,
        }
    }

    pub fn from_result(result: CoordinationResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failed(&e),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "reason": e.to_string() })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_error_is_structured() {
        let outcome: OperationOutcome<()> = OperationOutcome::from_result(Err(
            CoordinationError::LockTimeout {
                resource: "src/lib.rs".to_string(),
                waited_ms: 500,
            },
        ));

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some("lock_timeout"));
        let json = outcome.to_json();
        assert_eq!(json["success"], false);
        assert!(json["reason"].as_str().unwrap().contains("src/lib.rs"));
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_outcome_from_success_carries_data() {
        let outcome = OperationOutcome::from_result(Ok(3usize));
        assert!(outcome.success);
        assert_eq!(outcome.to_json()["data"], 3);
    }

    #[test]
    fn test_conflict_detection() {
        let conflict = CoordinationError::VersionConflict {
            key: "registry.json".to_string(),
            attempts: 1,
        };
        assert!(conflict.is_conflict());
        assert!(!CoordinationError::NotRegistered("a".to_string()).is_conflict());
    }
}
