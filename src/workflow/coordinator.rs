use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::workflow::data::{WorkflowData, WorkflowPatch};
use crate::workflow::state::WorkflowState;

/// One pipeline stage.
///
/// Handlers get a read-only snapshot of the workflow data and return a
/// partial update to merge. Re-execution after a retry from an earlier state
/// must be safe; handlers are free to overwrite their own prior outputs.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn execute(&self, data: &WorkflowData) -> Result<WorkflowPatch>;
}

/// Registry mapping each operational state to its handler.
///
/// Holds no mutable state beyond the registry; construct once at run start
/// and reuse.
#[derive(Default)]
pub struct AgentCoordinator {
    handlers: HashMap<WorkflowState, Arc<dyn StageHandler>>,
}

impl AgentCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, state: WorkflowState, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(state, handler);
    }

    pub fn has(&self, state: WorkflowState) -> bool {
        self.handlers.contains_key(&state)
    }

    pub fn registered_states(&self) -> Vec<WorkflowState> {
        self.handlers.keys().copied().collect()
    }

    pub async fn execute(&self, state: WorkflowState, data: &WorkflowData) -> Result<WorkflowPatch> {
        let handler = self
            .handlers
            .get(&state)
            .ok_or(AppError::HandlerMissing(state))?;
        handler.execute(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(WorkflowPatch);

    #[async_trait]
    impl StageHandler for Fixed {
        async fn execute(&self, _data: &WorkflowData) -> Result<WorkflowPatch> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn dispatches_by_state() {
        let mut coordinator = AgentCoordinator::new();
        coordinator.register(
            WorkflowState::Analyzing,
            Arc::new(Fixed(WorkflowPatch::default())),
        );

        assert!(coordinator.has(WorkflowState::Analyzing));
        assert!(!coordinator.has(WorkflowState::Searching));
        assert_eq!(
            coordinator.registered_states(),
            vec![WorkflowState::Analyzing]
        );

        let data = WorkflowData::default();
        coordinator
            .execute(WorkflowState::Analyzing, &data)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_handler_is_an_error() {
        let coordinator = AgentCoordinator::new();
        let data = WorkflowData::default();
        let err = coordinator
            .execute(WorkflowState::Building, &data)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::HandlerMissing(WorkflowState::Building)
        ));
        // The message feeds the classifier's fatal patterns
        assert!(err.to_string().to_lowercase().contains("no handler registered"));
    }
}
