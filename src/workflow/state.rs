use std::fmt;

use serde::{Deserialize, Serialize};

/// Discrete phase of a run.
///
/// Operational states are the pipeline stages plus `Idle` and the terminal
/// `Done`; control states (`Paused`, `Error`, `Cancelled`) are entered via
/// global triggers and never appear in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Idle,
    Analyzing,
    Searching,
    Planning,
    Generating,
    Applying,
    Building,
    Testing,
    Reviewing,
    Submitting,
    Done,
    Paused,
    Error,
    Cancelled,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Idle => "IDLE",
            WorkflowState::Analyzing => "ANALYZING",
            WorkflowState::Searching => "SEARCHING",
            WorkflowState::Planning => "PLANNING",
            WorkflowState::Generating => "GENERATING",
            WorkflowState::Applying => "APPLYING",
            WorkflowState::Building => "BUILDING",
            WorkflowState::Testing => "TESTING",
            WorkflowState::Reviewing => "REVIEWING",
            WorkflowState::Submitting => "SUBMITTING",
            WorkflowState::Done => "DONE",
            WorkflowState::Paused => "PAUSED",
            WorkflowState::Error => "ERROR",
            WorkflowState::Cancelled => "CANCELLED",
        };
        write!(f, "{name}")
    }
}

impl WorkflowState {
    /// `Done` and `Cancelled` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Cancelled)
    }

    /// Control states are entered via global triggers; no handler runs in them.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            WorkflowState::Paused | WorkflowState::Error | WorkflowState::Cancelled
        )
    }

    pub fn is_operational(&self) -> bool {
        !self.is_control()
    }

    /// Suspended states can be continued via `resume()`.
    pub fn is_suspended(&self) -> bool {
        matches!(self, WorkflowState::Paused | WorkflowState::Error)
    }

    /// Stages whose failures rewind to `Generating` on retry.
    pub fn is_fix_cycle(&self) -> bool {
        matches!(
            self,
            WorkflowState::Generating
                | WorkflowState::Applying
                | WorkflowState::Building
                | WorkflowState::Testing
                | WorkflowState::Reviewing
        )
    }

    /// The trigger that advances past this stage on handler success.
    pub fn success_trigger(&self) -> Option<Trigger> {
        Some(match self {
            WorkflowState::Analyzing => Trigger::AnalysisOk,
            WorkflowState::Searching => Trigger::SearchOk,
            WorkflowState::Planning => Trigger::PlanOk,
            WorkflowState::Generating => Trigger::GenerationOk,
            WorkflowState::Applying => Trigger::ApplyOk,
            WorkflowState::Building => Trigger::BuildOk,
            WorkflowState::Testing => Trigger::TestOk,
            WorkflowState::Reviewing => Trigger::ReviewOk,
            WorkflowState::Submitting => Trigger::SubmitOk,
            _ => return None,
        })
    }
}

/// Symbolic event driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    Start,
    AnalysisOk,
    SearchOk,
    PlanOk,
    GenerationOk,
    ApplyOk,
    BuildOk,
    TestOk,
    ReviewOk,
    SubmitOk,
    Pause,
    Resume,
    Cancel,
    Fail,
    Retry,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Start => "START",
            Trigger::AnalysisOk => "ANALYSIS_OK",
            Trigger::SearchOk => "SEARCH_OK",
            Trigger::PlanOk => "PLAN_OK",
            Trigger::GenerationOk => "GENERATION_OK",
            Trigger::ApplyOk => "APPLY_OK",
            Trigger::BuildOk => "BUILD_OK",
            Trigger::TestOk => "TEST_OK",
            Trigger::ReviewOk => "REVIEW_OK",
            Trigger::SubmitOk => "SUBMIT_OK",
            Trigger::Pause => "PAUSE",
            Trigger::Resume => "RESUME",
            Trigger::Cancel => "CANCEL",
            Trigger::Fail => "FAIL",
            Trigger::Retry => "RETRY",
        };
        write!(f, "{name}")
    }
}

impl Trigger {
    /// The forward-path edge this trigger drives, if it is a forward trigger.
    pub fn forward_edge(&self) -> Option<(WorkflowState, WorkflowState)> {
        use WorkflowState::*;
        Some(match self {
            Trigger::Start => (Idle, Analyzing),
            Trigger::AnalysisOk => (Analyzing, Searching),
            Trigger::SearchOk => (Searching, Planning),
            Trigger::PlanOk => (Planning, Generating),
            Trigger::GenerationOk => (Generating, Applying),
            Trigger::ApplyOk => (Applying, Building),
            Trigger::BuildOk => (Building, Testing),
            Trigger::TestOk => (Testing, Reviewing),
            Trigger::ReviewOk => (Reviewing, Submitting),
            Trigger::SubmitOk => (Submitting, Done),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_name_round_trip() {
        let state = WorkflowState::Generating;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"GENERATING\"");
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn terminal_and_control_split() {
        assert!(WorkflowState::Done.is_terminal());
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(!WorkflowState::Paused.is_terminal());
        assert!(WorkflowState::Paused.is_suspended());
        assert!(WorkflowState::Error.is_suspended());
        assert!(WorkflowState::Error.is_control());
        assert!(!WorkflowState::Testing.is_control());
        assert!(WorkflowState::Testing.is_operational());
    }

    #[test]
    fn forward_path_is_a_chain() {
        use WorkflowState::*;
        let mut state = Idle;
        let mut visited = vec![state];
        loop {
            let trigger = if state == Idle {
                Trigger::Start
            } else {
                match state.success_trigger() {
                    Some(t) => t,
                    None => break,
                }
            };
            let (from, to) = trigger.forward_edge().unwrap();
            assert_eq!(from, state);
            state = to;
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                Idle, Analyzing, Searching, Planning, Generating, Applying, Building, Testing,
                Reviewing, Submitting, Done
            ]
        );
    }

    #[test]
    fn fix_cycle_membership() {
        assert!(WorkflowState::Generating.is_fix_cycle());
        assert!(WorkflowState::Reviewing.is_fix_cycle());
        assert!(!WorkflowState::Searching.is_fix_cycle());
        assert!(!WorkflowState::Submitting.is_fix_cycle());
    }
}
