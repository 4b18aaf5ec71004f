use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::workflow::events::{StateChange, Subscriber, SubscriberSet};
use crate::workflow::guards::{default_guards, Guard};
use crate::workflow::recovery::codes;
use crate::workflow::state::{Trigger, WorkflowState};
use crate::workflow::store::{ErrorInfo, RunRecord, StateStore};

/// State + trigger + guard + history + persistence.
///
/// Owns the authoritative current state for one run. Every successful
/// transition is persisted before it becomes observable: the in-memory state
/// is only updated once the store save returns, so a failed save leaves the
/// machine exactly where it was.
pub struct StateMachine {
    run_id: String,
    store: StateStore,
    guards: HashMap<WorkflowState, Guard>,
    subscribers: SubscriberSet,
    state: WorkflowState,
    context: Map<String, Value>,
    history: Vec<WorkflowState>,
    attempt: u32,
    error: Option<ErrorInfo>,
    extra: Map<String, Value>,
}

impl StateMachine {
    pub fn new(run_id: impl Into<String>, store: StateStore) -> Self {
        Self {
            run_id: run_id.into(),
            store,
            guards: default_guards(),
            subscribers: SubscriberSet::new(),
            state: WorkflowState::Idle,
            context: Map::new(),
            history: Vec::new(),
            attempt: 1,
            error: None,
            extra: Map::new(),
        }
    }

    /// Replace the guard set (registration-time concern).
    pub fn with_guards(mut self, guards: HashMap<WorkflowState, Guard>) -> Self {
        self.guards = guards;
        self
    }

    /// Register a state-change subscriber. Subscribers run synchronously at
    /// commit; register them before the run starts.
    pub fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.register(subscriber);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn history(&self) -> &[WorkflowState] {
        &self.history
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Load any prior record for this run from the store.
    pub async fn initialize(&mut self) -> Result<()> {
        if let Some(record) = self.store.load().await? {
            if record.run_id != self.run_id {
                tracing::warn!(
                    expected = %self.run_id,
                    found = %record.run_id,
                    "Run id mismatch in stored record, adopting stored id"
                );
                self.run_id = record.run_id.clone();
            }
            tracing::debug!(
                run_id = %self.run_id,
                state = %record.current_state,
                attempt = record.attempt,
                "Restored run record"
            );
            self.state = record.current_state;
            self.context = record.context;
            self.history = record.history;
            self.attempt = record.attempt;
            self.error = record.error;
            self.extra = record.extra;
        }
        Ok(())
    }

    /// Fire a trigger, optionally merging a context payload.
    pub async fn fire(
        &mut self,
        trigger: Trigger,
        payload: Option<Map<String, Value>>,
    ) -> Result<WorkflowState> {
        self.transition(trigger, payload, None).await
    }

    /// Fire `FAIL`, recording the classified error payload.
    pub async fn fail(
        &mut self,
        error: ErrorInfo,
        payload: Option<Map<String, Value>>,
    ) -> Result<WorkflowState> {
        self.transition(Trigger::Fail, payload, Some(error)).await
    }

    async fn transition(
        &mut self,
        trigger: Trigger,
        payload: Option<Map<String, Value>>,
        error: Option<ErrorInfo>,
    ) -> Result<WorkflowState> {
        let from = self.state;
        let (target, pop_history) = self.resolve_target(from, trigger)?;

        // Shallow merge, last writer wins
        let mut context = self.context.clone();
        if let Some(payload) = payload {
            context.extend(payload);
        }

        if let Some(guard) = self.guards.get(&target) {
            if !guard(&context) {
                return Err(AppError::GuardRejected(target));
            }
        }

        // History records operational states only; leaving a control state
        // never pushes, so a resumed run cannot re-enter ERROR or PAUSED.
        let mut history = self.history.clone();
        if pop_history {
            history.pop();
        }
        if from.is_operational() && from != target {
            history.push(from);
        }

        let attempt = if trigger == Trigger::Retry {
            self.attempt + 1
        } else {
            self.attempt
        };

        let error = match trigger {
            Trigger::Fail => error,
            Trigger::Retry => None,
            _ => self.error.clone(),
        };

        let record = RunRecord {
            run_id: self.run_id.clone(),
            current_state: target,
            updated_at: Utc::now(),
            attempt,
            context: context.clone(),
            history: history.clone(),
            error: error.clone(),
            extra: self.extra.clone(),
        };

        // Commit point: nothing in memory changes until the save succeeds.
        self.store.save(&record).await?;

        self.state = target;
        self.context = context;
        self.history = history;
        self.attempt = attempt;
        self.error = error;

        tracing::info!(
            run_id = %self.run_id,
            from = %from,
            to = %target,
            trigger = %trigger,
            attempt = self.attempt,
            "State transition"
        );

        self.subscribers.emit(&StateChange {
            run_id: self.run_id.clone(),
            from,
            to: target,
            trigger,
            timestamp: record.updated_at,
        });

        Ok(target)
    }

    /// Map (state, trigger) to a destination, or reject. The second element
    /// says whether the destination was taken from the history tail.
    fn resolve_target(
        &self,
        from: WorkflowState,
        trigger: Trigger,
    ) -> Result<(WorkflowState, bool)> {
        let invalid = || AppError::InvalidTransition {
            state: from,
            trigger,
        };

        if from.is_terminal() {
            return Err(invalid());
        }

        match trigger {
            Trigger::Pause => Ok((WorkflowState::Paused, false)),
            Trigger::Cancel => Ok((WorkflowState::Cancelled, false)),
            Trigger::Fail => Ok((WorkflowState::Error, false)),
            Trigger::Resume => {
                if from != WorkflowState::Paused {
                    return Err(invalid());
                }
                // Empty history falls through to IDLE
                Ok((
                    self.history.last().copied().unwrap_or(WorkflowState::Idle),
                    !self.history.is_empty(),
                ))
            }
            Trigger::Retry => {
                if from != WorkflowState::Error {
                    return Err(invalid());
                }
                // The fix cycle always rewinds to GENERATING; anything else
                // falls back to the last checkpoint.
                let canonical = self
                    .error
                    .as_ref()
                    .is_some_and(|e| e.code == codes::RETRYABLE_ERROR);
                if canonical {
                    Ok((WorkflowState::Generating, false))
                } else {
                    Ok((
                        self.history.last().copied().unwrap_or(WorkflowState::Idle),
                        !self.history.is_empty(),
                    ))
                }
            }
            _ => match trigger.forward_edge() {
                Some((expected_from, to)) if expected_from == from => Ok((to, false)),
                _ => Err(invalid()),
            },
        }
    }
}
