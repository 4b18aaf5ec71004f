use thiserror::Error;

use crate::workflow::state::{Trigger, WorkflowState};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid transition: no mapping for trigger {trigger} from state {state}")]
    InvalidTransition {
        state: WorkflowState,
        trigger: Trigger,
    },

    #[error("Guard rejected entry to {0}: required context missing")]
    GuardRejected(WorkflowState),

    #[error("No handler registered for state {0}")]
    HandlerMissing(WorkflowState),

    #[error("Stage failed: {0}")]
    Handler(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("Claude API rate limited: {0}")]
    ClaudeRateLimited(String),

    #[error("Claude API transient error: {0}")]
    ClaudeTransient(String),

    #[error("Patch error: {0}")]
    Patch(String),

    #[error("Command execution failed: {0}")]
    Exec(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable code for surfacing in run results and persisted error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "ConfigError",
            AppError::Storage(_) => "StorageError",
            AppError::InvalidTransition { .. } => "InvalidTransition",
            AppError::GuardRejected(_) => "GuardRejected",
            AppError::HandlerMissing(_) => "HandlerMissing",
            AppError::Handler(_) => "HandlerError",
            AppError::GitHubApi(_) => "GitHubApiError",
            AppError::Git(_) => "GitError",
            AppError::Workspace(_) => "WorkspaceError",
            AppError::ClaudeApi(_) => "ClaudeApiError",
            AppError::ClaudeRateLimited(_) => "ClaudeRateLimited",
            AppError::ClaudeTransient(_) => "ClaudeTransient",
            AppError::Patch(_) => "PatchError",
            AppError::Exec(_) => "ExecError",
            AppError::Serialization(_) => "SerializationError",
            AppError::Http(_) => "HttpError",
            AppError::Io(_) => "IoError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::GitHubApi(e.to_string())
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
