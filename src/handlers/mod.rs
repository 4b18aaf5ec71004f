//! The nine pipeline stages, wired to the platform, LLM, workspace, patch,
//! and exec collaborators.

mod analyze;
mod apply;
mod build;
mod generate;
mod plan;
mod review;
mod search;
mod submit;
mod test;

pub use analyze::AnalyzeHandler;
pub use apply::ApplyHandler;
pub use build::BuildHandler;
pub use generate::GenerateHandler;
pub use plan::PlanHandler;
pub use review::ReviewHandler;
pub use search::SearchHandler;
pub use submit::{SubmitHandler, SubmitMode};
pub use test::TestHandler;

use std::sync::Arc;
use std::time::Duration;

use crate::agent::claude::ClaudeClient;
use crate::config::AppConfig;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::platform::github::GitHubPlatform;
use crate::search::CodeSearcher;
use crate::workflow::coordinator::AgentCoordinator;
use crate::workflow::data::WorkflowData;
use crate::workflow::state::WorkflowState;
use crate::workspace::{Workspace, WorkspaceManager};

/// Check out (or re-open) the workspace for the run's issue.
pub(crate) async fn workspace_for(
    manager: &WorkspaceManager,
    data: &WorkflowData,
    branch_prefix: &str,
    token: &str,
) -> Result<Workspace> {
    manager
        .ensure_for_issue(
            &data.owner,
            &data.repo,
            data.issue_number,
            branch_prefix,
            token,
        )
        .await
}

/// Build the full pipeline registry from configuration.
pub fn default_coordinator(config: &AppConfig) -> Result<AgentCoordinator> {
    let platform = Arc::new(GitHubPlatform::new(&config.github)?);
    let claude = Arc::new(ClaudeClient::new(&config.claude));
    let workspaces = Arc::new(WorkspaceManager::new(&config.workspace));
    let searcher = Arc::new(CodeSearcher::new(config.runner.max_search_results));
    let runner = Arc::new(CommandRunner::new(Duration::from_secs(
        config.runner.command_timeout_secs,
    )));

    let token = config.github_token().to_string();
    let branch_prefix = config.submit.branch_prefix.clone();
    let mode = if config.submit.dry_run {
        SubmitMode::DryRun
    } else {
        SubmitMode::CreatePr
    };

    let mut coordinator = AgentCoordinator::new();
    coordinator.register(
        WorkflowState::Analyzing,
        Arc::new(AnalyzeHandler::new(platform.clone(), claude.clone())),
    );
    coordinator.register(
        WorkflowState::Searching,
        Arc::new(SearchHandler::new(
            workspaces.clone(),
            searcher,
            branch_prefix.clone(),
            token.clone(),
        )),
    );
    coordinator.register(
        WorkflowState::Planning,
        Arc::new(PlanHandler::new(claude.clone())),
    );
    coordinator.register(
        WorkflowState::Generating,
        Arc::new(GenerateHandler::new(claude.clone())),
    );
    coordinator.register(
        WorkflowState::Applying,
        Arc::new(ApplyHandler::new(
            workspaces.clone(),
            branch_prefix.clone(),
            token.clone(),
        )),
    );
    coordinator.register(
        WorkflowState::Building,
        Arc::new(BuildHandler::new(
            workspaces.clone(),
            runner.clone(),
            config.runner.build_command.clone(),
            branch_prefix.clone(),
            token.clone(),
        )),
    );
    coordinator.register(
        WorkflowState::Testing,
        Arc::new(TestHandler::new(
            workspaces.clone(),
            runner,
            config.runner.test_command.clone(),
            branch_prefix.clone(),
            token.clone(),
        )),
    );
    coordinator.register(WorkflowState::Reviewing, Arc::new(ReviewHandler::new(claude)));
    coordinator.register(
        WorkflowState::Submitting,
        Arc::new(SubmitHandler::new(
            platform,
            workspaces,
            config.submit.clone(),
            token,
            mode,
        )),
    );

    Ok(coordinator)
}
