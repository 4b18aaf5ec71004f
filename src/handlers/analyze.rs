use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::prompt::{self, SYSTEM_PROMPT};
use crate::error::{AppError, Result};
use crate::platform::Platform;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{IssueAnalysis, WorkflowData, WorkflowPatch};

/// Fetches the issue from the code host and asks the model for a structured
/// analysis of it.
pub struct AnalyzeHandler {
    platform: Arc<dyn Platform>,
    claude: Arc<ClaudeClient>,
}

impl AnalyzeHandler {
    pub fn new(platform: Arc<dyn Platform>, claude: Arc<ClaudeClient>) -> Self {
        Self { platform, claude }
    }
}

#[async_trait]
impl StageHandler for AnalyzeHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let issue = self
            .platform
            .get_issue(&data.owner, &data.repo, data.issue_number)
            .await?;
        tracing::info!(
            issue = issue.number,
            title = %issue.title,
            "Fetched issue"
        );

        let completion = self
            .claude
            .generate(
                SYSTEM_PROMPT,
                &prompt::analysis_prompt(&data.repo_full_name(), &issue),
            )
            .await?;

        let value = prompt::extract_json(&completion.content)?;
        let analysis: IssueAnalysis = serde_json::from_value(value)
            .map_err(|e| AppError::Handler(format!("malformed analysis payload: {e}")))?;

        if analysis.keywords.is_empty() {
            tracing::warn!("Analysis produced no search keywords");
        }

        let mut cost = data.cost.clone().unwrap_or_default();
        cost.add(
            completion.usage.input_tokens as u64,
            completion.usage.output_tokens as u64,
        );

        Ok(WorkflowPatch {
            issue: Some(issue),
            analysis: Some(analysis),
            cost: Some(cost),
            ..Default::default()
        })
    }
}
