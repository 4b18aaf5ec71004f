use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::platform::types::Issue;

/// Initial input identifying the issue a run works on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueInput {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
}

/// Structured analysis of the issue produced by the analyze stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueAnalysis {
    pub summary: String,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub affected_areas: Vec<String>,
}

/// One codebase search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file: String,
    pub line: u64,
    pub content: String,
}

/// Fix plan produced by the planning stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPlan {
    pub approach: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub target_files: Vec<String>,
}

/// Proposed fix: an explanation plus one or more unified diffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixProposal {
    pub explanation: String,
    pub patches: Vec<String>,
}

/// Files touched when the proposal was applied to the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied_files: Vec<String>,
}

/// Captured result of a build or test command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    pub command: String,
    pub success: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub output: String,
}

/// Verdict of the LLM review stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub comments: Vec<String>,
}

/// Submitted change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub pr_number: u64,
    pub pr_url: String,
    #[serde(default)]
    pub branch: String,
}

/// Accumulated LLM usage across stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
}

impl CostMetrics {
    pub fn add(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.requests += 1;
    }
}

/// Typed bundle accumulated across stages.
///
/// The input triple is always present; every other field is absent until its
/// producing stage completes. Fields are never removed during a forward pass.
/// Keys not modeled here survive the context round-trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowData {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<IssueAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchHit>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<FixPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<FixProposal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_result: Option<ApplyOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_result: Option<CommandReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_result: Option<CommandReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostMetrics>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial update returned by a stage handler; `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPatch {
    pub issue: Option<Issue>,
    pub analysis: Option<IssueAnalysis>,
    pub search_results: Option<Vec<SearchHit>>,
    pub plan: Option<FixPlan>,
    pub proposal: Option<FixProposal>,
    pub apply_result: Option<ApplyOutcome>,
    pub build_result: Option<CommandReport>,
    pub test_result: Option<CommandReport>,
    pub review: Option<ReviewResult>,
    pub submission: Option<Submission>,
    pub cost: Option<CostMetrics>,
}

impl WorkflowData {
    pub fn new(input: IssueInput) -> Self {
        Self {
            owner: input.owner,
            repo: input.repo,
            issue_number: input.issue_number,
            ..Default::default()
        }
    }

    /// Merge a handler's partial result. Last writer wins per field; a `None`
    /// never clears data set by an earlier stage.
    pub fn merge(&mut self, patch: WorkflowPatch) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = patch.$field {
                    self.$field = Some(v);
                }
            };
        }
        take!(issue);
        take!(analysis);
        take!(search_results);
        take!(plan);
        take!(proposal);
        take!(apply_result);
        take!(build_result);
        take!(test_result);
        take!(review);
        take!(submission);
        take!(cost);
    }

    pub fn repo_full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Serialize into the opaque context map carried by the run record.
    pub fn to_context(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => unreachable!("WorkflowData serializes to an object"),
        }
    }

    /// Rebuild typed data from a persisted context map.
    pub fn from_context(context: &Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(context.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> IssueInput {
        IssueInput {
            owner: "acme".to_string(),
            repo: "widget".to_string(),
            issue_number: 7,
        }
    }

    #[test]
    fn merge_sets_only_populated_fields() {
        let mut data = WorkflowData::new(input());
        data.merge(WorkflowPatch {
            analysis: Some(IssueAnalysis {
                summary: "off-by-one".to_string(),
                root_cause: None,
                keywords: vec!["index".to_string()],
                affected_areas: vec![],
            }),
            ..Default::default()
        });
        assert!(data.analysis.is_some());

        // An empty patch must not clear anything
        data.merge(WorkflowPatch::default());
        assert!(data.analysis.is_some());
        assert_eq!(data.issue_number, 7);
    }

    #[test]
    fn context_round_trip_preserves_unknown_keys() {
        let mut data = WorkflowData::new(input());
        data.extra
            .insert("annotated_by".to_string(), Value::String("ops".to_string()));

        let context = data.to_context().unwrap();
        let back = WorkflowData::from_context(&context).unwrap();
        assert_eq!(back.owner, "acme");
        assert_eq!(
            back.extra.get("annotated_by"),
            Some(&Value::String("ops".to_string()))
        );
    }

    #[test]
    fn absent_fields_stay_out_of_context() {
        let data = WorkflowData::new(input());
        let context = data.to_context().unwrap();
        assert!(!context.contains_key("analysis"));
        assert!(!context.contains_key("submission"));
        assert!(context.contains_key("owner"));
    }
}
