pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch a full issue with comments.
    async fn get_issue(&self, owner: &str, repo: &str, issue_number: u64) -> Result<Issue>;

    /// Post a comment on an issue or PR.
    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()>;

    /// Create a pull request.
    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest>;
}
