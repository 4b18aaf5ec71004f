use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::prompt::{self, SYSTEM_PROMPT};
use crate::error::{AppError, Result};
use crate::patch;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{FixProposal, WorkflowData, WorkflowPatch};

/// Generates the fix as an explanation plus unified diffs.
///
/// Diffs are validated here so a malformed proposal fails this stage
/// (and retries regenerate) instead of failing downstream in apply.
pub struct GenerateHandler {
    claude: Arc<ClaudeClient>,
}

impl GenerateHandler {
    pub fn new(claude: Arc<ClaudeClient>) -> Self {
        Self { claude }
    }
}

#[async_trait]
impl StageHandler for GenerateHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let issue = data
            .issue
            .as_ref()
            .ok_or_else(|| AppError::Handler("no issue to generate a fix for".to_string()))?;
        let analysis = data
            .analysis
            .as_ref()
            .ok_or_else(|| AppError::Handler("no analysis to generate from".to_string()))?;
        let plan = data
            .plan
            .as_ref()
            .ok_or_else(|| AppError::Handler("no plan to generate from".to_string()))?;
        let hits = data.search_results.as_deref().unwrap_or_default();

        let completion = self
            .claude
            .generate(
                SYSTEM_PROMPT,
                &prompt::generation_prompt(issue, analysis, plan, hits),
            )
            .await?;

        let value = prompt::extract_json(&completion.content)?;
        let proposal: FixProposal = serde_json::from_value(value)
            .map_err(|e| AppError::Handler(format!("malformed proposal payload: {e}")))?;

        if proposal.patches.is_empty() {
            return Err(AppError::Handler(
                "proposal contains no patches".to_string(),
            ));
        }
        for diff in &proposal.patches {
            patch::parse(diff)
                .map_err(|e| AppError::Handler(format!("invalid unified diff in proposal: {e}")))?;
        }

        tracing::info!(patches = proposal.patches.len(), "Fix proposal generated");

        let mut cost = data.cost.clone().unwrap_or_default();
        cost.add(
            completion.usage.input_tokens as u64,
            completion.usage.output_tokens as u64,
        );

        Ok(WorkflowPatch {
            proposal: Some(proposal),
            cost: Some(cost),
            ..Default::default()
        })
    }
}
