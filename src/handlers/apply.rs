use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::patch;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{ApplyOutcome, WorkflowData, WorkflowPatch};
use crate::workspace::{Workspace, WorkspaceManager};

/// Applies the proposal's diffs to the workspace.
///
/// The tree is reset to the branch head first so a re-run after retry always
/// applies the current proposal to clean files.
pub struct ApplyHandler {
    workspaces: Arc<WorkspaceManager>,
    branch_prefix: String,
    token: String,
}

impl ApplyHandler {
    pub fn new(workspaces: Arc<WorkspaceManager>, branch_prefix: String, token: String) -> Self {
        Self {
            workspaces,
            branch_prefix,
            token,
        }
    }

    async fn apply_file(&self, workspace: &Workspace, file_patch: &patch::FilePatch) -> Result<String> {
        let target = file_patch
            .target_path()
            .ok_or_else(|| AppError::Patch("patch with no target path".to_string()))?
            .to_string();
        let resolved = WorkspaceManager::verify_path(&workspace.path, Path::new(&target))?;

        if file_patch.is_delete() {
            tokio::fs::remove_file(&resolved)
                .await
                .map_err(|e| AppError::Patch(format!("failed to delete {target}: {e}")))?;
            return Ok(target);
        }

        let existing = if file_patch.is_new_file() {
            String::new()
        } else {
            tokio::fs::read_to_string(&resolved)
                .await
                .map_err(|e| AppError::Patch(format!("failed to read {target}: {e}")))?
        };

        let updated = patch::apply(&existing, file_patch)?;
        tokio::fs::write(&resolved, updated)
            .await
            .map_err(|e| AppError::Patch(format!("failed to write {target}: {e}")))?;
        Ok(target)
    }
}

#[async_trait]
impl StageHandler for ApplyHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let proposal = data
            .proposal
            .as_ref()
            .ok_or_else(|| AppError::Handler("no proposal to apply".to_string()))?;

        let workspace =
            super::workspace_for(&self.workspaces, data, &self.branch_prefix, &self.token).await?;
        self.workspaces.reset(&workspace).await?;

        let mut applied_files = Vec::new();
        for diff in &proposal.patches {
            for file_patch in patch::parse(diff)? {
                let target = self.apply_file(&workspace, &file_patch).await?;
                tracing::info!(file = %target, "Patch applied");
                applied_files.push(target);
            }
        }

        Ok(WorkflowPatch {
            apply_result: Some(ApplyOutcome { applied_files }),
            ..Default::default()
        })
    }
}
