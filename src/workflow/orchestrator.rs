use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::workflow::coordinator::AgentCoordinator;
use crate::workflow::data::{IssueInput, WorkflowData};
use crate::workflow::machine::StateMachine;
use crate::workflow::recovery::{ErrorClassification, RecoveryManager};
use crate::workflow::state::{Trigger, WorkflowState};
use crate::workflow::store::{ErrorInfo, StateStore};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Cooperative pause/cancel flags shared with handlers and signal handlers.
///
/// The loop observes them between handler invocations, never mid-handler.
/// Repeated requests are idempotent.
#[derive(Default)]
pub struct RunSignals {
    pause: AtomicBool,
    cancel: AtomicBool,
}

impl RunSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Paused,
    Failed,
    /// Loop-exit sentinel; should not be observed by callers.
    Running,
}

impl RunStatus {
    fn from_state(state: WorkflowState) -> Self {
        match state {
            WorkflowState::Done => RunStatus::Completed,
            WorkflowState::Cancelled => RunStatus::Cancelled,
            WorkflowState::Paused => RunStatus::Paused,
            WorkflowState::Error => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

/// Summary returned by `run` and `resume`.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub final_state: WorkflowState,
    pub data: WorkflowData,
    pub attempt: u32,
    pub duration: Duration,
    pub error: Option<ErrorInfo>,
}

/// Point-in-time view for concurrent status queries. Always a copy, never a
/// reference to the live accumulator.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub state: WorkflowState,
    pub data: WorkflowData,
}

/// Top-level driver: owns the execution loop and composes the coordinator,
/// state machine, and recovery manager for a single run.
pub struct WorkflowOrchestrator {
    coordinator: AgentCoordinator,
    machine: StateMachine,
    recovery: RecoveryManager,
    signals: Arc<RunSignals>,
    data: WorkflowData,
    last_error: Option<ErrorClassification>,
}

impl WorkflowOrchestrator {
    pub fn new(coordinator: AgentCoordinator, machine: StateMachine) -> Self {
        Self {
            coordinator,
            machine,
            recovery: RecoveryManager::new(DEFAULT_MAX_ATTEMPTS),
            signals: Arc::new(RunSignals::new()),
            data: WorkflowData::default(),
            last_error: None,
        }
    }

    /// Build an orchestrator with the default store layout
    /// `<state_root>/<run_id>/state.json`, generating a run id if absent.
    pub fn for_run(
        coordinator: AgentCoordinator,
        state_root: &Path,
        run_id: Option<String>,
    ) -> Self {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let store = StateStore::for_run(state_root, &run_id);
        let machine = StateMachine::new(run_id, store);
        Self::new(coordinator, machine)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.recovery = RecoveryManager::new(max_attempts);
        self
    }

    /// Share pre-built signals (so handlers or a signal handler can pause and
    /// cancel the run from outside).
    pub fn with_signals(mut self, signals: Arc<RunSignals>) -> Self {
        self.signals = signals;
        self
    }

    pub fn run_id(&self) -> &str {
        self.machine.run_id()
    }

    pub fn signals(&self) -> Arc<RunSignals> {
        Arc::clone(&self.signals)
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Request a pause; honored at the next iteration boundary.
    pub fn pause(&self) {
        self.signals.request_pause();
    }

    /// Request cancellation; honored at the next iteration boundary.
    pub fn cancel(&self) {
        self.signals.request_cancel();
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.machine.run_id().to_string(),
            state: self.machine.state(),
            data: self.data.clone(),
        }
    }

    /// Start (or restart) a run for the given issue.
    pub async fn run(&mut self, input: IssueInput) -> Result<RunResult> {
        let started = Instant::now();
        self.signals.reset();
        self.last_error = None;
        self.data = WorkflowData::new(input);

        self.machine.initialize().await?;

        if self.machine.state() == WorkflowState::Idle {
            let context = self.data.to_context()?;
            self.machine.fire(Trigger::Start, Some(context)).await?;
        } else {
            // Restarting a half-finished run: pick up the persisted data
            self.data = WorkflowData::from_context(self.machine.context())?;
        }

        Ok(self.execute_loop(started).await)
    }

    /// Continue a suspended run from its persisted record.
    pub async fn resume(&mut self) -> Result<RunResult> {
        let started = Instant::now();
        self.signals.reset();
        self.last_error = None;

        self.machine.initialize().await?;
        self.data = WorkflowData::from_context(self.machine.context())?;

        if self.machine.state() == WorkflowState::Paused {
            self.machine.fire(Trigger::Resume, None).await?;
        }

        Ok(self.execute_loop(started).await)
    }

    async fn execute_loop(&mut self, started: Instant) -> RunResult {
        loop {
            let state = self.machine.state();

            if matches!(
                state,
                WorkflowState::Done | WorkflowState::Cancelled | WorkflowState::Paused
            ) {
                break;
            }

            if state == WorkflowState::Error {
                let recovered = self.try_recover().await;
                match recovered {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => return self.machine_failure(e, started),
                }
            }

            if self.signals.pause_requested() {
                tracing::info!(run_id = %self.machine.run_id(), "Pause requested, suspending run");
                let fired = self.fire_with_context(Trigger::Pause).await;
                if let Err(e) = fired {
                    return self.machine_failure(e, started);
                }
                break;
            }

            if self.signals.cancel_requested() {
                tracing::info!(run_id = %self.machine.run_id(), "Cancel requested, stopping run");
                let fired = self.fire_with_context(Trigger::Cancel).await;
                if let Err(e) = fired {
                    return self.machine_failure(e, started);
                }
                break;
            }

            let outcome = self.coordinator.execute(state, &self.data).await;
            match outcome {
                Ok(patch) => {
                    self.data.merge(patch);
                    let trigger = match state.success_trigger() {
                        Some(t) => t,
                        None => {
                            // IDLE and DONE never reach handler execution
                            return self.machine_failure(
                                AppError::Internal(format!(
                                    "no success trigger for state {state}"
                                )),
                                started,
                            );
                        }
                    };
                    let fired = self.fire_with_context(trigger).await;
                    if let Err(e) = fired {
                        return self.machine_failure(e, started);
                    }
                }
                Err(stage_error) => {
                    let classification = self
                        .recovery
                        .classify(&stage_error.to_string(), state);
                    tracing::warn!(
                        run_id = %self.machine.run_id(),
                        state = %state,
                        code = classification.code,
                        error = %stage_error,
                        "Stage failed"
                    );
                    let payload = match self.data.to_context() {
                        Ok(context) => Some(context),
                        Err(e) => return self.machine_failure(e.into(), started),
                    };
                    let failed = self
                        .machine
                        .fail(classification.to_error_info(), payload)
                        .await;
                    if let Err(e) = failed {
                        return self.machine_failure(e, started);
                    }
                    self.last_error = Some(classification);
                }
            }
        }

        self.build_result(started, None)
    }

    /// Answer the retry question for the recorded failure. Returns `true`
    /// when a `RETRY` was issued and the loop should continue.
    async fn try_recover(&mut self) -> Result<bool> {
        let classification = match &self.last_error {
            Some(c) => c.clone(),
            // Fresh process resuming an ERROR-terminated run: rebuild the
            // classification from the persisted error payload.
            None => match self.machine.error() {
                Some(info) => self.recovery.classification_from_record(info),
                None => return Ok(false),
            },
        };

        if !self
            .recovery
            .should_retry(self.machine.attempt(), &classification)
        {
            tracing::info!(
                run_id = %self.machine.run_id(),
                attempt = self.machine.attempt(),
                code = classification.code,
                "No retry possible, run stays in ERROR"
            );
            return Ok(false);
        }

        tracing::info!(
            run_id = %self.machine.run_id(),
            attempt = self.machine.attempt() + 1,
            target = %classification
                .retry_target
                .unwrap_or(WorkflowState::Generating),
            "Retrying after recoverable failure"
        );
        self.machine.fire(Trigger::Retry, None).await?;
        self.last_error = None;
        Ok(true)
    }

    async fn fire_with_context(&mut self, trigger: Trigger) -> Result<WorkflowState> {
        let context = self.data.to_context()?;
        self.machine.fire(trigger, Some(context)).await
    }

    /// State-machine failures terminate the loop and surface on the result.
    fn machine_failure(&self, error: AppError, started: Instant) -> RunResult {
        tracing::error!(
            run_id = %self.machine.run_id(),
            error = %error,
            "State machine error terminated the run"
        );
        let info = ErrorInfo {
            code: error.code().to_string(),
            message: error.to_string(),
            details: None,
        };
        let mut result = self.build_result(started, Some(info));
        result.status = RunStatus::Failed;
        result
    }

    fn build_result(&self, started: Instant, machine_error: Option<ErrorInfo>) -> RunResult {
        let final_state = self.machine.state();
        RunResult {
            run_id: self.machine.run_id().to_string(),
            status: RunStatus::from_state(final_state),
            final_state,
            data: self.data.clone(),
            attempt: self.machine.attempt(),
            duration: started.elapsed(),
            error: machine_error.or_else(|| self.machine.error().cloned()),
        }
    }
}
