use async_trait::async_trait;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;

pub struct GitHubPlatform {
    client: Octocrab,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(AppError::Config(
                "Missing required credential: github.token".to_string(),
            ));
        }
        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn get_issue(&self, owner: &str, repo: &str, issue_number: u64) -> Result<Issue> {
        let issue = self.client.issues(owner, repo).get(issue_number).await?;

        let comments_page = self
            .client
            .issues(owner, repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;

        let comments = comments_page
            .items
            .into_iter()
            .map(|c| Comment {
                author: c.user.login,
                body: c.body.unwrap_or_default(),
            })
            .collect();

        Ok(Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            comments,
        })
    }

    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        self.client
            .issues(owner, repo)
            .create_comment(issue_number, body)
            .await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        let created = self
            .client
            .pulls(owner, repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        Ok(PullRequest {
            number: created.number,
            url: created
                .html_url
                .map(|u| u.to_string())
                .unwrap_or_else(|| {
                    format!(
                        "https://github.com/{owner}/{repo}/pull/{}",
                        created.number
                    )
                }),
            head_branch: pr.head_branch.clone(),
            base_branch: pr.base_branch.clone(),
        })
    }
}
