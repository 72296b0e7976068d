#![doc = "GitHub REST client implementing the core `RemoteStore` contract."]
//
//! # GitHub integration (CLI <-> Core)
//!
//! [`GitHubClient`] is the only networked component. It talks to the GitHub REST
//! API over `reqwest` with bearer authentication and maps every response onto
//! the core's [`RemoteStore`] types.
//!
//! - `404` on a lookup is `Ok(None)`, never an error.
//! - `401`/`403` become [`RemoteError::Unauthorized`].
//! - File contents are sent base64-encoded, as the contents API requires.
//! - The rate-limit headers of every response are logged at debug level; an
//!   exhausted budget is logged as a warning.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use font_archiver_core::contract::{
    AccountInfo, NewRepository, RateLimit, RemoteError, RemoteFile, RemoteRepo, RemoteStore,
    RepoHandle,
};

pub const API_BASE: &str = "https://api.github.com";
pub const WEB_BASE: &str = "https://github.com";
const USER_AGENT: &str = concat!("font-archiver/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    #[serde(default)]
    plan: Option<PlanResponse>,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateResources,
}

#[derive(Debug, Deserialize)]
struct RateResources {
    core: CoreRate,
}

#[derive(Debug, Deserialize)]
struct CoreRate {
    limit: u64,
    remaining: u64,
    #[serde(default)]
    reset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    owner: OwnerResponse,
    html_url: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    private: bool,
}

impl From<RepoResponse> for RemoteRepo {
    fn from(r: RepoResponse) -> Self {
        RemoteRepo {
            handle: RepoHandle::new(r.owner.login, r.name),
            html_url: r.html_url,
            default_branch: r.default_branch,
            private: r.private,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
}

impl From<ContentResponse> for RemoteFile {
    fn from(c: ContentResponse) -> Self {
        RemoteFile {
            path: c.path,
            sha: c.sha,
            size: c.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PutContentResponse {
    content: ContentResponse,
}

/// The contents endpoint answers with an object for a file and an array for a directory.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentResponse>),
    File(ContentResponse),
}

/// Browser URL of a repository.
pub fn repo_web_url(handle: &RepoHandle) -> String {
    format!("{WEB_BASE}/{}/{}", handle.owner, handle.name)
}

fn contents_route(handle: &RepoHandle, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("/repos/{}/{}/contents", handle.owner, handle.name)
    } else {
        format!("/repos/{}/{}/contents/{path}", handle.owner, handle.name)
    }
}

fn status_error(status: StatusCode, body: String, what: &str) -> RemoteError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("token_set", &!self.token.is_empty())
            .finish()
    }
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        info!(token_set = !token.is_empty(), "Initialised GitHub client");
        Self {
            http: reqwest::Client::new(),
            token,
            base_url: API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Credential-free HTTPS clone URL, safe to store in a repository config.
    pub fn remote_url(&self, handle: &RepoHandle) -> String {
        format!("{}.git", repo_web_url(handle))
    }

    /// `Authorization` header for git over HTTPS. Never log this value.
    pub fn git_auth_header(&self) -> String {
        let credentials = format!("x-access-token:{}", self.token);
        format!(
            "Authorization: Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    fn request(&self, method: Method, route: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{route}", self.base_url))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.token)
    }

    fn log_rate_limit(response: &Response) {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        if let (Some(limit), Some(remaining)) =
            (header("x-ratelimit-limit"), header("x-ratelimit-remaining"))
        {
            if remaining == 0 {
                warn!(limit, reset = ?header("x-ratelimit-reset"), "GitHub API rate limit exhausted");
            } else {
                debug!(limit, remaining, "GitHub API rate limit");
            }
        }
    }

    /// Send and return the response when the status is a success or `404`.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::log_rate_limit(&response);

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(status = status.as_u16(), what, "GitHub response");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), what, "GitHub request failed");
        Err(status_error(status, body, what))
    }

    async fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, RemoteError> {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(format!("{what}: {e}")))
    }

    /// Like `send`, but a `404` is an error.
    async fn expect_found(&self, request: RequestBuilder, what: &str) -> Result<Response, RemoteError> {
        let response = self.send(request, what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(what.to_string()));
        }
        Ok(response)
    }

    async fn put_contents(
        &self,
        handle: &RepoHandle,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<RemoteFile, RemoteError> {
        let mut body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }
        let what = format!("{handle}:{path}");
        let response = self
            .expect_found(
                self.request(Method::PUT, &contents_route(handle, path)).json(&body),
                &what,
            )
            .await?;
        let put: PutContentResponse = Self::json(response, &what).await?;
        Ok(put.content.into())
    }
}

#[async_trait]
impl RemoteStore for GitHubClient {
    async fn current_user(&self) -> Result<AccountInfo, RemoteError> {
        let response = self
            .expect_found(self.request(Method::GET, "/user"), "user")
            .await?;
        let user: UserResponse = Self::json(response, "user").await?;
        Ok(AccountInfo {
            login: user.login,
            plan: user.plan.map(|p| p.name),
        })
    }

    async fn rate_limit(&self) -> Result<RateLimit, RemoteError> {
        let response = self
            .expect_found(self.request(Method::GET, "/rate_limit"), "rate_limit")
            .await?;
        let rate: RateLimitResponse = Self::json(response, "rate_limit").await?;
        Ok(RateLimit {
            limit: rate.resources.core.limit,
            remaining: rate.resources.core.remaining,
            reset: rate.resources.core.reset,
        })
    }

    async fn get_repo(&self, handle: &RepoHandle) -> Result<Option<RemoteRepo>, RemoteError> {
        let what = handle.to_string();
        let route = format!("/repos/{}/{}", handle.owner, handle.name);
        let response = self.send(self.request(Method::GET, &route), &what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let repo: RepoResponse = Self::json(response, &what).await?;
        Ok(Some(repo.into()))
    }

    async fn create_repo(&self, req: &NewRepository) -> Result<RemoteRepo, RemoteError> {
        let response = self
            .expect_found(self.request(Method::POST, "/user/repos").json(req), &req.name)
            .await?;
        let repo: RepoResponse = Self::json(response, &req.name).await?;
        Ok(repo.into())
    }

    async fn delete_repo(&self, handle: &RepoHandle) -> Result<(), RemoteError> {
        let route = format!("/repos/{}/{}", handle.owner, handle.name);
        self.expect_found(self.request(Method::DELETE, &route), &handle.to_string())
            .await?;
        Ok(())
    }

    async fn get_file(
        &self,
        handle: &RepoHandle,
        path: &str,
    ) -> Result<Option<RemoteFile>, RemoteError> {
        let what = format!("{handle}:{path}");
        let response = self
            .send(self.request(Method::GET, &contents_route(handle, path)), &what)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        match Self::json::<ContentsResponse>(response, &what).await? {
            ContentsResponse::File(file) => Ok(Some(file.into())),
            ContentsResponse::Dir(_) => Err(RemoteError::Decode(format!("{what} is a directory"))),
        }
    }

    async fn create_file(
        &self,
        handle: &RepoHandle,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<RemoteFile, RemoteError> {
        self.put_contents(handle, path, content, message, None).await
    }

    async fn update_file(
        &self,
        handle: &RepoHandle,
        path: &str,
        content: &[u8],
        message: &str,
        sha: &str,
    ) -> Result<RemoteFile, RemoteError> {
        self.put_contents(handle, path, content, message, Some(sha))
            .await
    }

    async fn list_dir(
        &self,
        handle: &RepoHandle,
        path: &str,
    ) -> Result<Vec<RemoteFile>, RemoteError> {
        let what = format!("{handle}:{path}");
        let response = self
            .send(self.request(Method::GET, &contents_route(handle, path)), &what)
            .await?;
        // An empty repository has no contents at all.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(match Self::json::<ContentsResponse>(response, &what).await? {
            ContentsResponse::Dir(entries) => entries.into_iter().map(Into::into).collect(),
            ContentsResponse::File(file) => vec![file.into()],
        })
    }
}
