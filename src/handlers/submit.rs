use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SubmitConfig;
use crate::error::{AppError, Result};
use crate::platform::types::CreatePullRequest;
use crate::platform::Platform;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{Submission, WorkflowData, WorkflowPatch};
use crate::workspace::WorkspaceManager;

/// Whether the submit stage actually opens a change request.
///
/// The mode is fixed at construction; there is no runtime flag handlers can
/// flip mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Log what would be submitted, touch nothing remote.
    DryRun,
    /// Commit, push, and open the pull request.
    CreatePr,
}

/// Commits and pushes the applied fix and opens a pull request for it.
pub struct SubmitHandler {
    platform: Arc<dyn Platform>,
    workspaces: Arc<WorkspaceManager>,
    config: SubmitConfig,
    token: String,
    mode: SubmitMode,
}

impl SubmitHandler {
    pub fn new(
        platform: Arc<dyn Platform>,
        workspaces: Arc<WorkspaceManager>,
        config: SubmitConfig,
        token: String,
        mode: SubmitMode,
    ) -> Self {
        Self {
            platform,
            workspaces,
            config,
            token,
            mode,
        }
    }
}

#[async_trait]
impl StageHandler for SubmitHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let issue = data
            .issue
            .as_ref()
            .ok_or_else(|| AppError::Handler("no issue to submit a fix for".to_string()))?;
        let proposal = data
            .proposal
            .as_ref()
            .ok_or_else(|| AppError::Handler("no proposal to submit".to_string()))?;

        if self.mode == SubmitMode::DryRun {
            tracing::info!(
                issue = issue.number,
                files = data
                    .apply_result
                    .as_ref()
                    .map(|a| a.applied_files.len())
                    .unwrap_or(0),
                "Dry run: skipping commit, push, and pull request"
            );
            return Ok(WorkflowPatch::default());
        }

        let workspace = super::workspace_for(
            &self.workspaces,
            data,
            &self.config.branch_prefix,
            &self.token,
        )
        .await?;

        let commit_msg = format!(
            "fix: resolve #{} - {}\n\n{}",
            issue.number, issue.title, proposal.explanation
        );
        let has_changes = self
            .workspaces
            .finalize(
                &workspace,
                &commit_msg,
                &self.config.committer_name,
                &self.config.committer_email,
                &self.token,
            )
            .await?;
        if !has_changes {
            return Err(AppError::Handler(
                "nothing to submit: workspace has no changes".to_string(),
            ));
        }

        let pr = self
            .platform
            .create_pull_request(
                &data.owner,
                &data.repo,
                &CreatePullRequest {
                    title: format!("Fix #{}: {}", issue.number, issue.title),
                    body: format!(
                        "Resolves #{}\n\n## Summary\n\n{}\n\n---\n*Automated by Graft*",
                        issue.number, proposal.explanation
                    ),
                    head_branch: workspace.branch.clone(),
                    base_branch: workspace.base_branch.clone(),
                },
            )
            .await?;
        tracing::info!(pr = pr.number, url = %pr.url, "Pull request created");

        // Best effort; a failed comment must not fail the submission
        let _ = self
            .platform
            .post_comment(
                &data.owner,
                &data.repo,
                issue.number,
                &format!("Opened {} with a proposed fix.\n\n---\n*Graft*", pr.url),
            )
            .await;

        Ok(WorkflowPatch {
            submission: Some(Submission {
                pr_number: pr.number,
                pr_url: pr.url,
                branch: workspace.branch,
            }),
            ..Default::default()
        })
    }
}
