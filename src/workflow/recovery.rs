use serde::{Deserialize, Serialize};

use crate::workflow::state::WorkflowState;
use crate::workflow::store::ErrorInfo;

/// Error codes carried in persisted records and run results.
pub mod codes {
    pub const TRANSIENT_ERROR: &str = "TRANSIENT_ERROR";
    pub const RETRYABLE_ERROR: &str = "RETRYABLE_ERROR";
    pub const FATAL_ERROR: &str = "FATAL_ERROR";
    pub const UNRECOVERABLE_ERROR: &str = "UNRECOVERABLE_ERROR";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Transient,
    Retryable,
    Fatal,
}

/// Result of classifying a stage failure.
#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub details: Option<String>,
    pub retry_target: Option<WorkflowState>,
}

impl ErrorClassification {
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.to_string(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

/// Errors that no amount of retrying will fix: bad credentials, bad
/// configuration, or a pipeline wired without the handler it needs.
const FATAL_PATTERNS: &[&str] = &[
    "authentication failed",
    "bad credentials",
    "unauthorized",
    "invalid api key",
    "missing required credential",
    "invalid configuration",
    "no handler registered",
];

/// Infrastructure noise. Handlers are expected to have retried these
/// internally; one surfacing here is not re-attempted at this level.
const TRANSIENT_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "connection reset",
    "econnreset",
    "socket hang up",
    "timed out",
    "timeout",
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "service unavailable",
    "overloaded",
];

fn matches_any(message: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| message.contains(p))
}

/// Stateless error classifier and retry policy.
pub struct RecoveryManager {
    max_attempts: u32,
}

impl RecoveryManager {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify a failure by message and the state it occurred in.
    ///
    /// A failure inside the fix cycle is treated as evidence the generated
    /// fix is wrong, so recovery rewinds to `GENERATING` rather than
    /// re-running the failing stage.
    pub fn classify(&self, message: &str, state: WorkflowState) -> ErrorClassification {
        let lowered = message.to_lowercase();

        if matches_any(&lowered, FATAL_PATTERNS) {
            return ErrorClassification {
                severity: Severity::Fatal,
                code: codes::FATAL_ERROR,
                message: message.to_string(),
                details: None,
                retry_target: None,
            };
        }

        if state.is_fix_cycle() {
            return ErrorClassification {
                severity: Severity::Retryable,
                code: codes::RETRYABLE_ERROR,
                message: message.to_string(),
                details: None,
                retry_target: Some(WorkflowState::Generating),
            };
        }

        if matches_any(&lowered, TRANSIENT_PATTERNS) {
            return ErrorClassification {
                severity: Severity::Transient,
                code: codes::TRANSIENT_ERROR,
                message: message.to_string(),
                details: None,
                retry_target: None,
            };
        }

        ErrorClassification {
            severity: Severity::Fatal,
            code: codes::UNRECOVERABLE_ERROR,
            message: message.to_string(),
            details: None,
            retry_target: None,
        }
    }

    /// Rebuild a classification from a persisted error payload so a resumed
    /// process can still answer the retry question.
    pub fn classification_from_record(&self, error: &ErrorInfo) -> ErrorClassification {
        let (severity, code, retry_target) = match error.code.as_str() {
            codes::RETRYABLE_ERROR => (
                Severity::Retryable,
                codes::RETRYABLE_ERROR,
                Some(WorkflowState::Generating),
            ),
            codes::TRANSIENT_ERROR => (Severity::Transient, codes::TRANSIENT_ERROR, None),
            codes::FATAL_ERROR => (Severity::Fatal, codes::FATAL_ERROR, None),
            _ => (Severity::Fatal, codes::UNRECOVERABLE_ERROR, None),
        };
        ErrorClassification {
            severity,
            code,
            message: error.message.clone(),
            details: error.details.clone(),
            retry_target,
        }
    }

    pub fn should_retry(&self, attempt: u32, classification: &ErrorClassification) -> bool {
        classification.severity == Severity::Retryable
            && classification.retry_target.is_some()
            && attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_patterns_win_over_fix_cycle() {
        let recovery = RecoveryManager::new(3);
        let c = recovery.classify("Authentication failed for token", WorkflowState::Generating);
        assert_eq!(c.severity, Severity::Fatal);
        assert_eq!(c.code, codes::FATAL_ERROR);
        assert!(c.retry_target.is_none());
    }

    #[test]
    fn fix_cycle_failures_are_retryable_and_rewind_to_generating() {
        let recovery = RecoveryManager::new(3);
        for state in [
            WorkflowState::Generating,
            WorkflowState::Applying,
            WorkflowState::Building,
            WorkflowState::Testing,
            WorkflowState::Reviewing,
        ] {
            let c = recovery.classify("assertion failed in widget_test", state);
            assert_eq!(c.severity, Severity::Retryable);
            assert_eq!(c.code, codes::RETRYABLE_ERROR);
            assert_eq!(c.retry_target, Some(WorkflowState::Generating));
        }
    }

    #[test]
    fn transient_patterns_outside_fix_cycle() {
        let recovery = RecoveryManager::new(3);
        let c = recovery.classify("API returned 503: Service Unavailable", WorkflowState::Analyzing);
        assert_eq!(c.severity, Severity::Transient);
        assert_eq!(c.code, codes::TRANSIENT_ERROR);
        assert!(c.retry_target.is_none());

        let c = recovery.classify("request timed out after 120s", WorkflowState::Searching);
        assert_eq!(c.code, codes::TRANSIENT_ERROR);
    }

    #[test]
    fn unknown_errors_are_unrecoverable() {
        let recovery = RecoveryManager::new(3);
        let c = recovery.classify("widget exploded", WorkflowState::Analyzing);
        assert_eq!(c.severity, Severity::Fatal);
        assert_eq!(c.code, codes::UNRECOVERABLE_ERROR);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let recovery = RecoveryManager::new(3);
        let c = recovery.classify("RATE LIMIT exceeded", WorkflowState::Analyzing);
        assert_eq!(c.code, codes::TRANSIENT_ERROR);
    }

    #[test]
    fn retry_decision_requires_retryable_target_and_budget() {
        let recovery = RecoveryManager::new(3);
        let retryable = recovery.classify("tests failed", WorkflowState::Testing);
        assert!(recovery.should_retry(1, &retryable));
        assert!(recovery.should_retry(2, &retryable));
        assert!(!recovery.should_retry(3, &retryable));

        let transient = recovery.classify("connection reset by peer", WorkflowState::Analyzing);
        assert!(!recovery.should_retry(1, &transient));
    }

    #[test]
    fn max_attempts_of_one_disables_retries() {
        let recovery = RecoveryManager::new(1);
        let retryable = recovery.classify("tests failed", WorkflowState::Testing);
        assert!(!recovery.should_retry(1, &retryable));
    }

    #[test]
    fn classification_survives_persistence() {
        let recovery = RecoveryManager::new(3);
        let original = recovery.classify("tests failed", WorkflowState::Testing);
        let restored = recovery.classification_from_record(&original.to_error_info());
        assert_eq!(restored.severity, Severity::Retryable);
        assert_eq!(restored.retry_target, Some(WorkflowState::Generating));
        assert_eq!(restored.message, "tests failed");
    }
}
