use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::workflow::state::WorkflowState;

/// Error payload recorded on a `FAIL` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// The single persisted record for a run.
///
/// Serialized as one self-describing JSON document. Fields this version does
/// not know about are kept in `extra` and written back on save so external
/// readers can attach metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub current_state: WorkflowState,
    pub updated_at: DateTime<Utc>,
    pub attempt: u32,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub history: Vec<WorkflowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunRecord {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            current_state: WorkflowState::Idle,
            updated_at: Utc::now(),
            attempt: 1,
            context: Map::new(),
            history: Vec::new(),
            error: None,
            extra: Map::new(),
        }
    }
}

/// Durable storage for one run record, backed by a single JSON file.
///
/// Saves write to a sibling temp file and rename it into place so readers
/// never observe partial state. Concurrent writers to the same handle are not
/// supported.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default layout: `<root>/<run_id>/state.json`.
    pub fn for_run(root: &Path, run_id: &str) -> Self {
        Self {
            path: root.join(run_id).join("state.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create state dir: {e}")))?;
        }

        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| AppError::Storage(format!("Failed to serialize run record: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write state file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to commit state file: {e}")))?;

        Ok(())
    }

    /// Load the record, or `None` when no prior record exists. A malformed
    /// file is treated as absent but logged.
    pub async fn load(&self) -> Result<Option<RunRecord>> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Storage(format!("Failed to read state file: {e}")));
            }
        };

        match serde_json::from_slice::<RunRecord>(&body) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed run record, treating as absent"
                );
                Ok(None)
            }
        }
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}
