//! # Error Utilities
//!
//! Error classification and recovery strategies used by the DDL worker to decide
//! whether a failed job step is retried, rolled back or parked for an operator.

use crate::errors::{
    AdminError, AutoIdError, DdlError, ErrorCategory, KvError,
};

/// Error classification for different types of failures
pub fn classify_error(error: &DdlError) -> ErrorCategory {
    match error {
        DdlError::Validation(_) => ErrorCategory::Validation,
        DdlError::Planner(_) => ErrorCategory::Validation,
        DdlError::Table(_) => ErrorCategory::Validation,
        DdlError::Configuration(_) => ErrorCategory::Validation,
        DdlError::AutoId(AutoIdError::InvalidAutoRandom(_)) => ErrorCategory::Validation,
        DdlError::AutoId(_) => ErrorCategory::ResourceExhausted,
        DdlError::Schema(_) => ErrorCategory::Conflict,
        DdlError::Placement(_) => ErrorCategory::Conflict,
        DdlError::Kv(KvError::KeyExists { .. }) => ErrorCategory::Conflict,
        DdlError::Kv(_) => ErrorCategory::Transient,
        DdlError::Admin(AdminError::WaitTimeout(_)) => ErrorCategory::Transient,
        DdlError::Admin(AdminError::InfoSchemaExpired(_)) => ErrorCategory::Transient,
        DdlError::Admin(_) => ErrorCategory::Conflict,
        DdlError::Io(_) => ErrorCategory::Transient,
        DdlError::Job(e) => e.category,
        DdlError::Meta(_) => ErrorCategory::Fatal,
        DdlError::Logging(_) => ErrorCategory::Fatal,
        DdlError::Serialization(_) => ErrorCategory::Fatal,
        DdlError::Internal(_) => ErrorCategory::Fatal,
    }
}

impl DdlError {
    pub fn category(&self) -> ErrorCategory {
        classify_error(self)
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Leave the job running and try the step again later.
    Retry,
    /// Revert the partial state and finish as rollback-done.
    Rollback,
    /// Stop advancing the job until an operator resumes it.
    Pause,
}

/// Error recovery strategies for a failed job step.
///
/// `reversible` is false once the job has crossed its point of no return.
/// `error_count` is the number of failures recorded so far, including this one.
pub fn get_recovery_strategy(
    error: &DdlError,
    reversible: bool,
    error_count: i64,
    error_count_limit: i64,
) -> RecoveryStrategy {
    match classify_error(error) {
        ErrorCategory::Transient if error_count <= error_count_limit => RecoveryStrategy::Retry,
        _ if !reversible => RecoveryStrategy::Pause,
        _ => RecoveryStrategy::Rollback,
    }
}
