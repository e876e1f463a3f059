//! GitHub REST implementation of [`Forge`].
//!
//! Status messages are issue comments on the pull request; revert tracking
//! happens through regular issues.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Forge, OpenChangeRequest};
use crate::domain::error::{GateError, Result};

const DEFAULT_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    sha: String,
}

impl From<PullResponse> for OpenChangeRequest {
    fn from(pull: PullResponse) -> Self {
        OpenChangeRequest::new(pull.number, pull.head.sha)
    }
}

/// Forge talking to the GitHub REST API.
pub struct GitHubForge {
    api_url: String,
    repo: String,
    token: String,
    http_client: reqwest::Client,
}

impl GitHubForge {
    /// `repo` is `owner/name`.
    pub fn new(repo: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("gatekeep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GateError::Forge(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_url: DEFAULT_API_URL.to_string(),
            repo: repo.into(),
            token: token.into(),
            http_client,
        })
    }

    /// Point at a GitHub Enterprise API root.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from `GITHUB_TOKEN`, `GITHUB_REPOSITORY` and optionally
    /// `GITHUB_API_URL`. Returns `None` when token or repository is unset.
    pub fn from_env() -> Result<Option<Self>> {
        let (Ok(token), Ok(repo)) = (
            std::env::var("GITHUB_TOKEN"),
            std::env::var("GITHUB_REPOSITORY"),
        ) else {
            return Ok(None);
        };
        let mut forge = Self::new(repo, token)?;
        if let Ok(api_url) = std::env::var("GITHUB_API_URL") {
            forge = forge.with_api_url(api_url);
        }
        Ok(Some(forge))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_url, self.repo, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%method, %url, "github request");
        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GateError::Forge(format!("{method} {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GateError::Forge(format!(
                "{method} {url} returned {status}: {}",
                truncate(&text, 300)
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GateError::Forge(format!("invalid response from {url}: {e}")))
    }

    /// Follow `page=` until a short page comes back.
    async fn paginate<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let mut all = Vec::new();
        for page in 1.. {
            let batch: Vec<T> = self
                .send(
                    Method::GET,
                    &format!("{path}{sep}per_page={PER_PAGE}&page={page}"),
                    None,
                )
                .await?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Forge for GitHubForge {
    async fn find_message(&self, change_request: u64, marker: &str) -> Result<Option<u64>> {
        let comments: Vec<CommentResponse> = self
            .paginate(&format!("/issues/{change_request}/comments"))
            .await?;
        Ok(comments
            .into_iter()
            .filter(|c| c.body.as_deref().is_some_and(|b| b.contains(marker)))
            .map(|c| c.id)
            .max())
    }

    async fn create_message(&self, change_request: u64, body: &str) -> Result<u64> {
        let created: CommentResponse = self
            .send(
                Method::POST,
                &format!("/issues/{change_request}/comments"),
                Some(json!({ "body": body })),
            )
            .await?;
        Ok(created.id)
    }

    async fn update_message(&self, _change_request: u64, message_id: u64, body: &str) -> Result<()> {
        let _: CommentResponse = self
            .send(
                Method::PATCH,
                &format!("/issues/comments/{message_id}"),
                Some(json!({ "body": body })),
            )
            .await?;
        Ok(())
    }

    async fn open_issue(&self, title: &str, body: &str) -> Result<u64> {
        let issue: IssueResponse = self
            .send(
                Method::POST,
                "/issues",
                Some(json!({ "title": title, "body": body })),
            )
            .await?;
        Ok(issue.number)
    }

    async fn open_change_requests(&self) -> Result<Vec<OpenChangeRequest>> {
        let pulls: Vec<PullResponse> = self.paginate("/pulls?state=open").await?;
        Ok(pulls.into_iter().map(OpenChangeRequest::from).collect())
    }
}
