//! End-to-end pipeline scenarios with scripted stage handlers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use graft::error::{AppError, Result};
use graft::platform::types::Issue;
use graft::workflow::coordinator::{AgentCoordinator, StageHandler};
use graft::workflow::data::{
    ApplyOutcome, CommandReport, FixPlan, FixProposal, IssueAnalysis, IssueInput, ReviewResult,
    SearchHit, Submission, WorkflowData, WorkflowPatch,
};
use graft::workflow::machine::StateMachine;
use graft::workflow::orchestrator::{RunSignals, RunStatus, WorkflowOrchestrator};
use graft::workflow::state::WorkflowState;
use graft::workflow::store::StateStore;

const ALL_STAGES: [WorkflowState; 9] = [
    WorkflowState::Analyzing,
    WorkflowState::Searching,
    WorkflowState::Planning,
    WorkflowState::Generating,
    WorkflowState::Applying,
    WorkflowState::Building,
    WorkflowState::Testing,
    WorkflowState::Reviewing,
    WorkflowState::Submitting,
];

fn input() -> IssueInput {
    IssueInput {
        owner: "acme".to_string(),
        repo: "widget".to_string(),
        issue_number: 7,
    }
}

/// Canonical success payload for each stage.
fn canonical_patch(state: WorkflowState) -> WorkflowPatch {
    let mut patch = WorkflowPatch::default();
    match state {
        WorkflowState::Analyzing => {
            patch.issue = Some(Issue {
                number: 7,
                title: "widget spins backwards".to_string(),
                body: "observed counter-clockwise spin".to_string(),
                labels: vec!["bug".to_string()],
                comments: vec![],
            });
            patch.analysis = Some(IssueAnalysis {
                summary: "spin direction inverted".to_string(),
                root_cause: Some("sign flip in rotation delta".to_string()),
                keywords: vec!["spin_widget".to_string()],
                affected_areas: vec!["src".to_string()],
            });
        }
        WorkflowState::Searching => {
            patch.search_results = Some(vec![SearchHit {
                file: "src/widget.rs".to_string(),
                line: 12,
                content: "fn spin_widget(delta: i32)".to_string(),
            }]);
        }
        WorkflowState::Planning => {
            patch.plan = Some(FixPlan {
                approach: "negate the delta before applying".to_string(),
                steps: vec!["flip the sign in spin_widget".to_string()],
                target_files: vec!["src/widget.rs".to_string()],
            });
        }
        WorkflowState::Generating => {
            patch.proposal = Some(FixProposal {
                explanation: "negates delta so the widget spins clockwise".to_string(),
                patches: vec![
                    "--- a/src/widget.rs\n+++ b/src/widget.rs\n@@ -12,1 +12,1 @@\n-    rotate(-delta);\n+    rotate(delta);\n"
                        .to_string(),
                ],
            });
        }
        WorkflowState::Applying => {
            patch.apply_result = Some(ApplyOutcome {
                applied_files: vec!["src/widget.rs".to_string()],
            });
        }
        WorkflowState::Building => {
            patch.build_result = Some(CommandReport {
                command: "cargo build".to_string(),
                success: true,
                exit_code: Some(0),
                output: String::new(),
            });
        }
        WorkflowState::Testing => {
            patch.test_result = Some(CommandReport {
                command: "cargo test".to_string(),
                success: true,
                exit_code: Some(0),
                output: "test result: ok".to_string(),
            });
        }
        WorkflowState::Reviewing => {
            patch.review = Some(ReviewResult {
                approved: true,
                comments: vec![],
            });
        }
        WorkflowState::Submitting => {
            patch.submission = Some(Submission {
                pr_number: 101,
                pr_url: "https://github.com/acme/widget/pull/101".to_string(),
                branch: "graft/issue-7".to_string(),
            });
        }
        _ => {}
    }
    patch
}

struct ScriptedHandler {
    calls: Arc<AtomicU32>,
    fail_times: u32,
    error_message: String,
    payload: WorkflowPatch,
    signals: Option<Arc<RunSignals>>,
}

#[async_trait]
impl StageHandler for ScriptedHandler {
    async fn execute(&self, _data: &WorkflowData) -> Result<WorkflowPatch> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(signals) = &self.signals {
            signals.request_pause();
        }
        if call < self.fail_times {
            return Err(AppError::Handler(self.error_message.clone()));
        }
        Ok(self.payload.clone())
    }
}

/// Per-stage invocation counters shared with the scripted handlers.
#[derive(Clone)]
struct Counters(HashMap<WorkflowState, Arc<AtomicU32>>);

impl Counters {
    fn calls(&self, state: WorkflowState) -> u32 {
        self.0[&state].load(Ordering::SeqCst)
    }
}

/// All nine stages scripted to succeed; individual stages can be overridden.
struct Pipeline {
    coordinator: AgentCoordinator,
    counters: Counters,
}

impl Pipeline {
    fn all_success() -> Self {
        let mut pipeline = Self {
            coordinator: AgentCoordinator::new(),
            counters: Counters(HashMap::new()),
        };
        for state in ALL_STAGES {
            pipeline.replace(state, 0, "", canonical_patch(state), None);
        }
        pipeline
    }

    fn replace(
        &mut self,
        state: WorkflowState,
        fail_times: u32,
        error_message: &str,
        payload: WorkflowPatch,
        signals: Option<Arc<RunSignals>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        self.counters.0.insert(state, Arc::clone(&calls));
        self.coordinator.register(
            state,
            Arc::new(ScriptedHandler {
                calls,
                fail_times,
                error_message: error_message.to_string(),
                payload,
                signals,
            }),
        );
    }

    fn failing(mut self, state: WorkflowState, times: u32, message: &str) -> Self {
        self.replace(state, times, message, canonical_patch(state), None);
        self
    }

    fn always_failing(self, state: WorkflowState, message: &str) -> Self {
        self.failing(state, u32::MAX, message)
    }

    fn pausing(mut self, state: WorkflowState, signals: Arc<RunSignals>) -> Self {
        self.replace(state, 0, "", canonical_patch(state), Some(signals));
        self
    }

    fn with_payload(mut self, state: WorkflowState, payload: WorkflowPatch) -> Self {
        self.replace(state, 0, "", payload, None);
        self
    }

    fn with_handler(mut self, state: WorkflowState, handler: Arc<dyn StageHandler>) -> Self {
        self.coordinator.register(state, handler);
        self
    }

    fn without(state: WorkflowState) -> Self {
        let mut pipeline = Self {
            coordinator: AgentCoordinator::new(),
            counters: Counters(HashMap::new()),
        };
        for stage in ALL_STAGES {
            if stage != state {
                pipeline.replace(stage, 0, "", canonical_patch(stage), None);
            }
        }
        pipeline
    }
}

fn build_orchestrator(
    pipeline: Pipeline,
    dir: &Path,
    run_id: &str,
    max_attempts: u32,
) -> (WorkflowOrchestrator, Counters) {
    let machine = StateMachine::new(run_id, StateStore::for_run(dir, run_id));
    let orchestrator = WorkflowOrchestrator::new(pipeline.coordinator, machine)
        .with_max_attempts(max_attempts);
    (orchestrator, pipeline.counters)
}

#[tokio::test]
async fn s1_happy_path_completes_with_submission() {
    let tmp = tempfile::tempdir().unwrap();
    let run_id = "s1";

    let machine = StateMachine::new(run_id, StateStore::for_run(tmp.path(), run_id));
    let observed: Arc<Mutex<Vec<WorkflowState>>> =
        Arc::new(Mutex::new(vec![WorkflowState::Idle]));
    {
        let observed = Arc::clone(&observed);
        machine.subscribe(Box::new(move |change| {
            observed.lock().unwrap().push(change.to);
        }));
    }

    let pipeline = Pipeline::all_success();
    let counters = pipeline.counters.clone();
    let mut orchestrator =
        WorkflowOrchestrator::new(pipeline.coordinator, machine).with_max_attempts(3);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_state, WorkflowState::Done);
    assert_eq!(result.attempt, 1);
    assert!(result.error.is_none());
    assert_eq!(result.data.submission.as_ref().unwrap().pr_number, 101);

    for state in ALL_STAGES {
        assert_eq!(counters.calls(state), 1, "{state}");
    }

    use WorkflowState::*;
    assert_eq!(
        observed.lock().unwrap().as_slice(),
        &[
            Idle, Analyzing, Searching, Planning, Generating, Applying, Building, Testing,
            Reviewing, Submitting, Done
        ]
    );
}

#[tokio::test]
async fn s2_retryable_generation_failure_recovers() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline =
        Pipeline::all_success().failing(WorkflowState::Generating, 1, "malformed JSON");
    let (mut orchestrator, counters) = build_orchestrator(pipeline, tmp.path(), "s2", 3);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_state, WorkflowState::Done);
    assert_eq!(result.attempt, 2);
    assert_eq!(counters.calls(WorkflowState::Generating), 2);
    for state in ALL_STAGES {
        if state != WorkflowState::Generating {
            assert_eq!(counters.calls(state), 1, "{state}");
        }
    }
}

#[tokio::test]
async fn s3_test_failure_regenerates_the_fix() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::all_success().failing(
        WorkflowState::Testing,
        1,
        "assertion failed: widget still spins backwards",
    );
    let (mut orchestrator, counters) = build_orchestrator(pipeline, tmp.path(), "s3", 5);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.attempt, 2);
    assert_eq!(counters.calls(WorkflowState::Generating), 2);
    assert_eq!(counters.calls(WorkflowState::Applying), 2);
    assert_eq!(counters.calls(WorkflowState::Building), 2);
    assert_eq!(counters.calls(WorkflowState::Testing), 2);
    assert_eq!(counters.calls(WorkflowState::Analyzing), 1);
    assert_eq!(counters.calls(WorkflowState::Searching), 1);
    assert_eq!(counters.calls(WorkflowState::Planning), 1);
    assert_eq!(counters.calls(WorkflowState::Reviewing), 1);
    assert_eq!(counters.calls(WorkflowState::Submitting), 1);
}

#[tokio::test]
async fn s4_exhausted_retries_terminate_in_error() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline =
        Pipeline::all_success().always_failing(WorkflowState::Testing, "assertion failed");
    let (mut orchestrator, counters) = build_orchestrator(pipeline, tmp.path(), "s4", 2);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.final_state, WorkflowState::Error);
    assert_eq!(result.attempt, 2);
    assert_eq!(result.error.unwrap().code, "RETRYABLE_ERROR");
    assert_eq!(counters.calls(WorkflowState::Testing), 2);
}

#[tokio::test]
async fn s5_fatal_authentication_failure_does_not_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline =
        Pipeline::all_success().always_failing(WorkflowState::Analyzing, "Authentication failed");
    let (mut orchestrator, counters) = build_orchestrator(pipeline, tmp.path(), "s5", 3);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.final_state, WorkflowState::Error);
    assert_eq!(result.attempt, 1);
    assert_eq!(result.error.unwrap().code, "FATAL_ERROR");
    assert_eq!(counters.calls(WorkflowState::Analyzing), 1);
    assert_eq!(counters.calls(WorkflowState::Searching), 0);
}

#[tokio::test]
async fn s6_pause_persists_progress_and_resume_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let run_id = "s6";
    let signals = Arc::new(RunSignals::new());

    let pipeline = Pipeline::all_success().pausing(WorkflowState::Planning, Arc::clone(&signals));
    let machine = StateMachine::new(run_id, StateStore::for_run(tmp.path(), run_id));
    let mut orchestrator = WorkflowOrchestrator::new(pipeline.coordinator, machine)
        .with_max_attempts(3)
        .with_signals(signals);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Paused);
    assert_eq!(result.final_state, WorkflowState::Paused);
    assert!(result.data.analysis.is_some());
    assert!(result.data.search_results.is_some());
    assert!(result.data.plan.is_some());
    assert!(result.data.submission.is_none());

    // Fresh orchestrator against the same store
    let (mut resumed, counters) =
        build_orchestrator(Pipeline::all_success(), tmp.path(), run_id, 3);

    let result = resumed.resume().await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_state, WorkflowState::Done);
    assert_eq!(result.data.submission.as_ref().unwrap().pr_number, 101);

    // Resume picks up at the stage after the pause point; earlier stages
    // are not re-run
    assert_eq!(counters.calls(WorkflowState::Analyzing), 0);
    assert_eq!(counters.calls(WorkflowState::Planning), 0);
    assert_eq!(counters.calls(WorkflowState::Generating), 1);
}

#[tokio::test]
async fn max_attempts_of_one_disables_all_retries() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline =
        Pipeline::all_success().failing(WorkflowState::Generating, 1, "malformed JSON");
    let (mut orchestrator, counters) = build_orchestrator(pipeline, tmp.path(), "one-shot", 1);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.final_state, WorkflowState::Error);
    assert_eq!(result.attempt, 1);
    assert_eq!(counters.calls(WorkflowState::Generating), 1);
}

#[tokio::test]
async fn double_cancel_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let run_id = "cancel";
    let signals = Arc::new(RunSignals::new());

    // The analyze handler requests cancellation twice in the same iteration
    struct DoubleCancel {
        signals: Arc<RunSignals>,
    }
    #[async_trait]
    impl StageHandler for DoubleCancel {
        async fn execute(&self, _data: &WorkflowData) -> Result<WorkflowPatch> {
            self.signals.request_cancel();
            self.signals.request_cancel();
            Ok(canonical_patch(WorkflowState::Analyzing))
        }
    }

    let pipeline = Pipeline::all_success().with_handler(
        WorkflowState::Analyzing,
        Arc::new(DoubleCancel {
            signals: Arc::clone(&signals),
        }),
    );
    let counters = pipeline.counters.clone();
    let machine = StateMachine::new(run_id, StateStore::for_run(tmp.path(), run_id));
    let mut orchestrator = WorkflowOrchestrator::new(pipeline.coordinator, machine)
        .with_max_attempts(3)
        .with_signals(signals);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.final_state, WorkflowState::Cancelled);
    // Observed at the iteration boundary: the next stage never ran
    assert_eq!(counters.calls(WorkflowState::Searching), 0);
    // Partial data up to the cancel point is on the result
    assert!(result.data.analysis.is_some());
}

#[tokio::test]
async fn missing_handler_fails_fatally() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::without(WorkflowState::Submitting);
    let (mut orchestrator, _counters) = build_orchestrator(pipeline, tmp.path(), "missing", 3);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.final_state, WorkflowState::Error);
    assert_eq!(result.error.unwrap().code, "FATAL_ERROR");
}

#[tokio::test]
async fn empty_analysis_payload_is_rejected_by_the_guard() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline =
        Pipeline::all_success().with_payload(WorkflowState::Analyzing, WorkflowPatch::default());
    let (mut orchestrator, _counters) = build_orchestrator(pipeline, tmp.path(), "guard", 3);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.unwrap().code, "GuardRejected");
}

#[tokio::test]
async fn empty_partials_from_optional_stages_are_legal() {
    let tmp = tempfile::tempdir().unwrap();
    // Build and test stages report nothing; downstream stages tolerate it
    let pipeline = Pipeline::all_success()
        .with_payload(WorkflowState::Building, WorkflowPatch::default())
        .with_payload(WorkflowState::Testing, WorkflowPatch::default());
    let (mut orchestrator, _counters) = build_orchestrator(pipeline, tmp.path(), "empty", 3);

    let result = orchestrator.run(input()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.data.build_result.is_none());
    assert!(result.data.test_result.is_none());
    assert!(result.data.submission.is_some());
}

#[tokio::test]
async fn resume_after_error_retries_against_the_persisted_classification() {
    let tmp = tempfile::tempdir().unwrap();
    let run_id = "resume-error";

    // First process: testing always fails, retries exhaust at 1 attempt
    let pipeline = Pipeline::all_success().always_failing(WorkflowState::Testing, "tests failed");
    let (mut orchestrator, _counters) = build_orchestrator(pipeline, tmp.path(), run_id, 1);
    let result = orchestrator.run(input()).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);

    // Second process with a healthier pipeline and more attempts resumes
    // from the persisted RETRYABLE_ERROR and finishes the run
    let (mut resumed, counters) =
        build_orchestrator(Pipeline::all_success(), tmp.path(), run_id, 3);

    let result = resumed.resume().await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.attempt, 2);
    // Recovery rewound to generation, not to the failing stage alone
    assert_eq!(counters.calls(WorkflowState::Generating), 1);
    assert_eq!(counters.calls(WorkflowState::Analyzing), 0);
}

#[tokio::test]
async fn status_returns_a_snapshot_copy() {
    let tmp = tempfile::tempdir().unwrap();
    let (orchestrator, _counters) =
        build_orchestrator(Pipeline::all_success(), tmp.path(), "status", 3);

    let snapshot = orchestrator.status();
    assert_eq!(snapshot.run_id, "status");
    assert_eq!(snapshot.state, WorkflowState::Idle);
    assert!(snapshot.data.issue.is_none());
}
