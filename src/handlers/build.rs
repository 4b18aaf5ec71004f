use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::exec::CommandRunner;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{CommandReport, WorkflowData, WorkflowPatch};
use crate::workspace::WorkspaceManager;

/// Runs the configured build command against the patched workspace.
pub struct BuildHandler {
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<CommandRunner>,
    command: Option<String>,
    branch_prefix: String,
    token: String,
}

impl BuildHandler {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        runner: Arc<CommandRunner>,
        command: Option<String>,
        branch_prefix: String,
        token: String,
    ) -> Self {
        Self {
            workspaces,
            runner,
            command,
            branch_prefix,
            token,
        }
    }
}

#[async_trait]
impl StageHandler for BuildHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let Some(command) = &self.command else {
            tracing::info!("No build command configured, skipping build");
            return Ok(WorkflowPatch {
                build_result: Some(CommandReport {
                    command: String::new(),
                    success: true,
                    exit_code: None,
                    output: "no build command configured".to_string(),
                }),
                ..Default::default()
            });
        };

        let workspace =
            super::workspace_for(&self.workspaces, data, &self.branch_prefix, &self.token).await?;
        let report = self.runner.run(&workspace.path, command).await?;

        if !report.success {
            return Err(AppError::Handler(format!(
                "build failed (exit {:?}): {}",
                report.exit_code,
                tail(&report.output)
            )));
        }

        Ok(WorkflowPatch {
            build_result: Some(report),
            ..Default::default()
        })
    }
}

/// Last part of the output, enough for the regenerate prompt and logs.
pub(crate) fn tail(output: &str) -> &str {
    const TAIL: usize = 2000;
    if output.len() <= TAIL {
        return output;
    }
    let cut = output.len() - TAIL;
    &output[output.char_indices().map(|(i, _)| i).find(|&i| i >= cut).unwrap_or(0)..]
}
