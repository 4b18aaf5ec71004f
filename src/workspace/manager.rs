use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::workspace::git;

/// Manages per-run checkout directories for the pipeline.
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

/// A checked-out workspace the pipeline stages operate in.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    pub base_branch: String,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
        }
    }

    /// Set up (or re-open) the workspace for an issue: clone the repo, record
    /// its default branch, and check out the fix branch.
    ///
    /// Idempotent by design: the apply stage may run several times per run,
    /// so an existing checkout is reused rather than re-cloned.
    pub async fn ensure_for_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        branch_prefix: &str,
        token: &str,
    ) -> Result<Workspace> {
        let branch = format!("{branch_prefix}/issue-{issue_number}");
        let workspace_path = self.workspace_path(owner, repo, &branch);

        if !workspace_path.join(".git").exists() {
            if workspace_path.exists() {
                // Leftover directory without a valid checkout
                tokio::fs::remove_dir_all(&workspace_path)
                    .await
                    .map_err(|e| AppError::Workspace(format!("Failed to clean workspace: {e}")))?;
            }
            if let Some(parent) = workspace_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Workspace(format!("Failed to create workspace dir: {e}"))
                })?;
            }
            let clone_url = format!("https://github.com/{owner}/{repo}.git");
            git::clone(&clone_url, &workspace_path, token).await?;
        }

        let base_branch = git::default_branch(&workspace_path)
            .await
            .unwrap_or_else(|_| "main".to_string());
        git::create_branch(&workspace_path, &branch).await?;

        Ok(Workspace {
            path: workspace_path,
            branch,
            base_branch,
        })
    }

    /// Drop uncommitted edits so a regenerated fix applies to a clean tree.
    pub async fn reset(&self, workspace: &Workspace) -> Result<()> {
        git::discard_changes(&workspace.path).await
    }

    /// Commit and push the workspace's changes. Returns false when there is
    /// nothing to commit.
    pub async fn finalize(
        &self,
        workspace: &Workspace,
        commit_message: &str,
        committer_name: &str,
        committer_email: &str,
        token: &str,
    ) -> Result<bool> {
        if !git::has_changes(&workspace.path).await? {
            tracing::info!("No changes to commit");
            return Ok(false);
        }

        git::add_all(&workspace.path).await?;
        git::commit(
            &workspace.path,
            commit_message,
            committer_name,
            committer_email,
        )
        .await?;
        git::push(&workspace.path, &workspace.branch, token).await?;

        Ok(true)
    }

    /// Clean up a workspace directory.
    pub async fn cleanup(&self, workspace: &Workspace) -> Result<()> {
        if workspace.path.exists() {
            tokio::fs::remove_dir_all(&workspace.path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to cleanup workspace: {e}")))?;
        }
        Ok(())
    }

    fn workspace_path(&self, owner: &str, repo: &str, branch: &str) -> PathBuf {
        let safe_branch = branch.replace('/', "__");
        self.base_dir
            .join(format!("{owner}__{repo}__{safe_branch}"))
    }

    /// Verify a path is within the workspace (path traversal protection).
    /// Patch targets come from model output and must not escape the checkout.
    pub fn verify_path(workspace_root: &Path, requested_path: &Path) -> Result<PathBuf> {
        let full_path = workspace_root.join(requested_path);

        // Canonicalize to resolve .. and symlinks
        // If the file doesn't exist yet (new-file patch), canonicalize the parent
        let canonical = if full_path.exists() {
            full_path.canonicalize()
        } else {
            let parent = full_path
                .parent()
                .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;

            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Workspace(format!("Failed to create directory: {e}")))?;
            }

            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

            let file_name = full_path
                .file_name()
                .ok_or_else(|| AppError::Workspace("Invalid file name".to_string()))?;

            Ok(canonical_parent.join(file_name))
        }
        .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;

        if !canonical.starts_with(&canonical_root) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside workspace",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_path_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = WorkspaceManager::verify_path(tmp.path(), Path::new("../outside.txt"));
        assert!(err.is_err());
    }

    #[test]
    fn verify_path_accepts_nested_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let resolved =
            WorkspaceManager::verify_path(tmp.path(), Path::new("src/new_module.rs")).unwrap();
        assert!(resolved.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn workspace_paths_are_namespaced_per_branch() {
        let manager = WorkspaceManager::new(&WorkspaceConfig {
            base_dir: PathBuf::from("/tmp/ws"),
        });
        let path = manager.workspace_path("acme", "widget", "graft/issue-7");
        assert_eq!(
            path,
            PathBuf::from("/tmp/ws/acme__widget__graft__issue-7")
        );
    }
}
