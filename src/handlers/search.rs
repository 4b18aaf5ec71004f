use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::search::CodeSearcher;
use crate::workflow::coordinator::StageHandler;
use crate::workflow::data::{SearchHit, WorkflowData, WorkflowPatch};
use crate::workspace::WorkspaceManager;

/// Clones the target repository and greps it for the analysis keywords.
pub struct SearchHandler {
    workspaces: Arc<WorkspaceManager>,
    searcher: Arc<CodeSearcher>,
    branch_prefix: String,
    token: String,
}

impl SearchHandler {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        searcher: Arc<CodeSearcher>,
        branch_prefix: String,
        token: String,
    ) -> Self {
        Self {
            workspaces,
            searcher,
            branch_prefix,
            token,
        }
    }
}

#[async_trait]
impl StageHandler for SearchHandler {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch> {
        let analysis = data
            .analysis
            .as_ref()
            .ok_or_else(|| AppError::Handler("no analysis to search from".to_string()))?;

        let workspace =
            super::workspace_for(&self.workspaces, data, &self.branch_prefix, &self.token).await?;

        // Keywords from the analysis, falling back to words from the issue
        // title when the model produced nothing searchable
        let mut patterns: Vec<&str> = analysis
            .keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
            .collect();
        if patterns.is_empty() {
            if let Some(issue) = &data.issue {
                patterns = issue
                    .title
                    .split_whitespace()
                    .filter(|w| w.len() > 3)
                    .collect();
            }
        }

        let mut hits: Vec<SearchHit> = Vec::new();
        for pattern in patterns {
            let found = self.searcher.search(&workspace.path, pattern).await?;
            tracing::debug!(pattern = %pattern, matches = found.len(), "Keyword search");
            for hit in found {
                if !hits.contains(&hit) {
                    hits.push(hit);
                }
            }
            if hits.len() >= self.searcher.max_results() {
                hits.truncate(self.searcher.max_results());
                break;
            }
        }

        if hits.is_empty() {
            return Err(AppError::Handler(
                "codebase search produced no results for any keyword".to_string(),
            ));
        }

        tracing::info!(hits = hits.len(), "Codebase search complete");
        Ok(WorkflowPatch {
            search_results: Some(hits),
            ..Default::default()
        })
    }
}
