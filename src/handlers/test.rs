use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::exec::CommandRunner;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{CommandReport, WorkflowData, WorkflowPatch};
use crate::workspace::WorkspaceManager;

/// Runs the configured test command against the patched workspace.
pub struct TestHandler {
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<CommandRunner>,
    command: Option<String>,
    branch_prefix: String,
    token: String,
}

impl TestHandler {
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
impl StageHandler for TestHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let Some(command) = &self.command else {
            tracing::info!("No test command configured, skipping tests");
            return Ok(WorkflowPatch {
                test_result: Some(CommandReport {
                    command: String::new(),
                    success: true,
                    exit_code: None,
                    output: "no test command configured".to_string(),
                }),
                ..Default::default()
            });
        };

        let workspace =
            super::workspace_for(&self.workspaces, data, &self.branch_prefix, &self.token).await?;
        let report = self.runner.run(&workspace.path, command).await?;

        if !report.success {
            return Err(AppError::Handler(format!(
                "tests failed (exit {:?}): {}",
                report.exit_code,
                super::build::tail(&report.output)
            )));
        }

        Ok(WorkflowPatch {
            test_result: Some(report),
            ..Default::default()
        })
    }
}
