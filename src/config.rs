use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub github: GitHubConfig,
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub token: String,
}

// Manual Debug impl to avoid leaking the access token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_transient_max_retries")]
    pub transient_max_retries: u32,
    #[serde(default = "default_transient_backoff_secs")]
    pub transient_backoff_secs: u64,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("transient_max_retries", &self.transient_max_retries)
            .field("transient_backoff_secs", &self.transient_backoff_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_attempts: default_max_attempts(),
            build_command: None,
            test_command: None,
            command_timeout_secs: default_command_timeout_secs(),
            max_search_results: default_max_search_results(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_committer_name")]
    pub committer_name: String,
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            branch_prefix: default_branch_prefix(),
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_transient_max_retries() -> u32 {
    3
}

fn default_transient_backoff_secs() -> u64 {
    2
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/graft-workspaces")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp/graft-runs")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_max_search_results() -> usize {
    50
}

fn default_branch_prefix() -> String {
    "graft".to_string()
}

fn default_committer_name() -> String {
    "Graft Bot".to_string()
}

fn default_committer_email() -> String {
    "graft[bot]@users.noreply.github.com".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("graft").required(false));
        }

        // Environment variable overrides with GRAFT_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("GRAFT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn github_token(&self) -> &str {
        &self.github.token
    }

    pub fn claude_api_key(&self) -> &str {
        &self.claude.api_key
    }
}
