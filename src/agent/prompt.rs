use crate::error::{AppError, Result};
use crate::platform::types::Issue;
use crate::workflow::data::{FixPlan, IssueAnalysis, SearchHit};

pub const SYSTEM_PROMPT: &str = "You are Graft, an expert software engineer AI agent. \
You work in discrete pipeline stages and always answer with a single JSON object, \
no prose before or after it.";

fn comments_section(issue: &Issue) -> String {
    if issue.comments.is_empty() {
        return String::new();
    }
    let comments = issue
        .comments
        .iter()
        .map(|c| format!("**@{}:** {}", c.author, c.body))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("\n**Comments:**\n{comments}\n")
}

pub fn analysis_prompt(repo_full_name: &str, issue: &Issue) -> String {
    format!(
        r#"You are analyzing an issue on repository `{repo_full_name}`.

## Issue #{number}
**Title:** {title}

**Description:**
{body}
{comments}
## Task
Produce a structured analysis of this issue. Respond with JSON:
{{
  "summary": "one-paragraph summary of the problem",
  "root_cause": "your best hypothesis, or null if unknown",
  "keywords": ["identifiers", "function names", "error strings worth searching for"],
  "affected_areas": ["subsystems or directories likely involved"]
}}

Keep keywords concrete: prefer exact symbols and messages from the issue over
generic terms."#,
        number = issue.number,
        title = issue.title,
        body = issue.body,
        comments = comments_section(issue),
    )
}

pub fn plan_prompt(analysis: &IssueAnalysis, hits: &[SearchHit]) -> String {
    let hits_text = hits
        .iter()
        .map(|h| format!("{}:{}: {}", h.file, h.line, h.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"## Analysis
{summary}

Root cause hypothesis: {root_cause}

## Matching code locations
{hits_text}

## Task
Write a concrete fix plan. Respond with JSON:
{{
  "approach": "one-paragraph description of the fix",
  "steps": ["ordered, concrete steps"],
  "target_files": ["files the fix will touch"]
}}

Plan the minimal change that resolves the issue. Do not plan refactors."#,
        summary = analysis.summary,
        root_cause = analysis.root_cause.as_deref().unwrap_or("unknown"),
    )
}

pub fn generation_prompt(
    issue: &Issue,
    analysis: &IssueAnalysis,
    plan: &FixPlan,
    hits: &[SearchHit],
) -> String {
    let hits_text = hits
        .iter()
        .map(|h| format!("{}:{}: {}", h.file, h.line, h.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"## Issue #{number}: {title}

## Analysis
{summary}

## Plan
{approach}

Steps:
{steps}

## Matching code locations
{hits_text}

## Task
Produce the fix as unified diffs. Respond with JSON:
{{
  "explanation": "what the change does and why it resolves the issue",
  "patches": ["one unified diff per file, with ---/+++ headers and @@ hunks"]
}}

Rules:
- Paths in diff headers are relative to the repository root (a/ and b/ prefixes allowed).
- Hunk context lines must match the file content exactly.
- Only touch files named in the plan unless strictly necessary."#,
        number = issue.number,
        title = issue.title,
        summary = analysis.summary,
        approach = plan.approach,
        steps = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {s}", i + 1))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

pub fn review_prompt(explanation: &str, patches: &[String], test_output: Option<&str>) -> String {
    let tests_section = match test_output {
        Some(output) => format!("\n## Test run output\n```\n{output}\n```\n"),
        None => String::new(),
    };
    format!(
        r#"You are reviewing a proposed fix before it is submitted.

## Explanation
{explanation}

## Patches
```diff
{patches}
```
{tests_section}
## Task
Judge whether this change is correct, minimal, and safe to submit. Respond with JSON:
{{
  "approved": true or false,
  "comments": ["specific problems, empty if approved without remarks"]
}}

Reject the change if it does not address the issue, breaks behavior the diff
context shows, or includes unrelated edits."#,
        patches = patches.join("\n"),
    )
}

/// Extract the JSON object from a model response, tolerating markdown fences
/// and surrounding prose.
pub fn extract_json(content: &str) -> Result<serde_json::Value> {
    let trimmed = content.trim();

    // Prefer a fenced block when present
    let candidate = if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => after.trim(),
        }
    } else {
        trimmed
    };

    // Fall back to the outermost braces
    let candidate = match (candidate.find('{'), candidate.rfind('}')) {
        (Some(open), Some(close)) if close > open => &candidate[open..=close],
        _ => {
            return Err(AppError::Handler(format!(
                "malformed JSON in model response: no object found in {} chars",
                content.len()
            )))
        }
    };

    serde_json::from_str(candidate)
        .map_err(|e| AppError::Handler(format!("malformed JSON in model response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let value = extract_json(r#"{"approved": true, "comments": []}"#).unwrap();
        assert_eq!(value["approved"], serde_json::json!(true));
    }

    #[test]
    fn extracts_fenced_json() {
        let content = "Here is the result:\n```json\n{\"summary\": \"x\"}\n```\nDone.";
        let value = extract_json(content).unwrap();
        assert_eq!(value["summary"], serde_json::json!("x"));
    }

    #[test]
    fn extracts_json_with_surrounding_prose() {
        let content = "Sure! {\"approach\": \"patch it\", \"steps\": []} hope that helps";
        let value = extract_json(content).unwrap();
        assert_eq!(value["approach"], serde_json::json!("patch it"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(extract_json("I could not produce a fix.").is_err());
    }
}
