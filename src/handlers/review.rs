use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::prompt::{self, SYSTEM_PROMPT};
use crate::error::{AppError, Result};
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{ReviewResult, WorkflowData, WorkflowPatch};

/// Asks the model to review the proposal before submission.
///
/// A rejected review fails this stage, which rewinds the fix cycle to
/// regeneration with the verdict in the error message.
pub struct ReviewHandler {
    claude: Arc<ClaudeClient>,
}

impl ReviewHandler {
    pub fn new(claude: Arc<ClaudeClient>) -> Self {
        Self { claude }
    }
}

#[async_trait]
impl StageHandler for ReviewHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let proposal = data
            .proposal
            .as_ref()
            .ok_or_else(|| AppError::Handler("no proposal to review".to_string()))?;
        let test_output = data
            .test_result
            .as_ref()
            .map(|report| report.output.as_str());

        let completion = self
            .claude
            .generate(
                SYSTEM_PROMPT,
                &prompt::review_prompt(&proposal.explanation, &proposal.patches, test_output),
            )
            .await?;

        let value = prompt::extract_json(&completion.content)?;
        let review: ReviewResult = serde_json::from_value(value)
            .map_err(|e| AppError::Handler(format!("malformed review payload: {e}")))?;

        if !review.approved {
            return Err(AppError::Handler(format!(
                "review rejected the fix: {}",
                review.comments.join("; ")
            )));
        }

        tracing::info!(comments = review.comments.len(), "Review approved the fix");

        let mut cost = data.cost.clone().unwrap_or_default();
        cost.add(
            completion.usage.input_tokens as u64,
            completion.usage.output_tokens as u64,
        );

        Ok(WorkflowPatch {
            review: Some(review),
            cost: Some(cost),
            ..Default::default()
        })
    }
}
