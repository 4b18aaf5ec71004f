use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::workflow::state::WorkflowState;

/// Predicate on the merged context gating entry into a destination state.
pub type Guard = fn(&Map<String, Value>) -> bool;

/// Guards required for the pipeline to make sense: searching needs an
/// analysis to search from, planning needs something to plan against.
pub fn default_guards() -> HashMap<WorkflowState, Guard> {
    let mut guards: HashMap<WorkflowState, Guard> = HashMap::new();
    guards.insert(WorkflowState::Searching, has_analysis);
    guards.insert(WorkflowState::Planning, has_search_results);
    guards
}

fn has_analysis(context: &Map<String, Value>) -> bool {
    context.get("analysis").is_some_and(|v| !v.is_null())
}

fn has_search_results(context: &Map<String, Value>) -> bool {
    context
        .get("search_results")
        .and_then(Value::as_array)
        .is_some_and(|hits| !hits.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn searching_requires_analysis() {
        assert!(!has_analysis(&Map::new()));
        assert!(!has_analysis(&ctx(json!({ "analysis": null }))));
        assert!(has_analysis(&ctx(
            json!({ "analysis": { "summary": "off-by-one" } })
        )));
    }

    #[test]
    fn planning_requires_non_empty_search_results() {
        assert!(!has_search_results(&Map::new()));
        assert!(!has_search_results(&ctx(json!({ "search_results": [] }))));
        assert!(has_search_results(&ctx(json!({
            "search_results": [{ "file": "src/lib.rs", "line": 3, "content": "fn x()" }]
        }))));
    }
}
