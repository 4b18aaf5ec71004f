use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::prompt::{self, SYSTEM_PROMPT};
use crate::error::{AppError, Result};
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{FixPlan, WorkflowData, WorkflowPatch};

/// Turns the analysis and search hits into a concrete fix plan.
pub struct PlanHandler {
    claude: Arc<ClaudeClient>,
}

impl PlanHandler {
    pub fn new(claude: Arc<ClaudeClient>) -> Self {
        Self { claude }
    }
}

#[async_trait]
impl StageHandler for PlanHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let analysis = data
            .analysis
            .as_ref()
            .ok_or_else(|| AppError::Handler("no analysis to plan from".to_string()))?;
        let hits = data
            .search_results
            .as_deref()
            .ok_or_else(|| AppError::Handler("no search results to plan from".to_string()))?;

        let completion = self
            .claude
            .generate(SYSTEM_PROMPT, &prompt::plan_prompt(analysis, hits))
            .await?;

        let value = prompt::extract_json(&completion.content)?;
        let plan: FixPlan = serde_json::from_value(value)
            .map_err(|e| AppError::Handler(format!("malformed plan payload: {e}")))?;

        tracing::info!(
            steps = plan.steps.len(),
            target_files = plan.target_files.len(),
            "Fix plan ready"
        );

        let mut cost = data.cost.clone().unwrap_or_default();
        cost.add(
            completion.usage.input_tokens as u64,
            completion.usage.output_tokens as u64,
        );

        Ok(WorkflowPatch {
            plan: Some(plan),
            cost: Some(cost),
            ..Default::default()
        })
    }
}
