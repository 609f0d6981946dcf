//! GitHub REST client
//!
//! Thin authenticated wrapper over reqwest that tracks the shared quota,
//! retries transient network faults, and turns expected absence into
//! [`ApiOutcome`] variants instead of errors.
//!
//! # Examples
//!
//! ```rust,no_run
//! use ci_harvest::GitHubClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gh = GitHubClient::with_token("ghp_...")?;
//!     let url = gh.ghurl("repos/rust-lang/rust");
//!     if let Some(repo) = gh.api_request(&url, None).await? {
//!         println!("{}", repo["full_name"]);
//!     }
//!     Ok(())
//! }
//! ```

use crate::github::error::{GitHubError, GitHubResult};
use crate::github::pagination::ensure_per_page;
use crate::github::rate_limiter::RateLimiter;
use log::{info, warn};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, USER_AGENT};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com/";
pub const DEFAULT_MEDIA_TYPE: &str = "application/json";
const DEFAULT_USER_AGENT: &str = "ci-harvest";
const MAX_ATTEMPTS: u32 = 3;

/// A successful response, body already read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    /// The raw `link` header, if GitHub sent one.
    pub fn link_header(&self) -> Option<&str> {
        self.headers.get("link").and_then(|v| v.to_str().ok())
    }

    /// Parsed JSON body. Malformed JSON is logged and read as an empty array.
    pub fn json(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Array(Vec::new());
        }
        match serde_json::from_str(&self.body) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping invalid JSON from {}: {e}", self.url);
                Value::Array(Vec::new())
            }
        }
    }
}

/// Result of a single logical request.
#[derive(Debug, Clone)]
pub enum ApiOutcome {
    Found(RawResponse),
    /// 400/403/404/409/422/451: the resource is treated as absent.
    NotFound { status: u16 },
    /// Quota exhausted on every attempt.
    RateLimited,
    /// Transient network failures on every attempt.
    Skipped,
}

impl ApiOutcome {
    pub fn into_found(self) -> Option<RawResponse> {
        match self {
            ApiOutcome::Found(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ApiOutcome::Found(_))
    }
}

/// What one network attempt produced.
enum Attempt {
    Done(GitHubResult<ApiOutcome>),
    Transient(reqwest::Error),
    Throttled,
}

struct ClientInner {
    http: reqwest::Client,
    token: Option<String>,
    user_agent: String,
    base_url: String,
    limiter: RateLimiter,
}

/// GitHub API client.
///
/// Cloning is cheap (Arc clone); clones share the connection pool and the
/// rate limiter.
#[derive(Clone)]
pub struct GitHubClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.inner.base_url)
            .field("token", &fmt_token(self.inner.token.as_deref()))
            .finish()
    }
}

impl GitHubClient {
    /// Create a new client builder
    #[must_use]
    pub fn builder() -> GitHubClientBuilder {
        GitHubClientBuilder::new()
    }

    /// Convenience: create client with personal access token
    pub fn with_token(token: impl Into<String>) -> GitHubResult<Self> {
        Self::builder().personal_token(token).build()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Absolute API URL for `path`, always carrying `per_page=100`.
    #[must_use]
    pub fn ghurl(&self, path: &str) -> String {
        ensure_per_page(&format!("{}{}", self.inner.base_url, path))
    }

    /// Absolute API URL for one page of `path`.
    #[must_use]
    pub fn ghurl_page(&self, path: &str, page: u32) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{}{path}{sep}page={page}&per_page=100", self.inner.base_url)
    }

    /// Single request returning the parsed body, or `None` when absent.
    pub async fn api_request(
        &self,
        url: &str,
        media_type: Option<&str>,
    ) -> GitHubResult<Option<Value>> {
        let outcome = self.request(&ensure_per_page(url), media_type).await?;
        Ok(outcome.into_found().map(|r| r.json()))
    }

    /// Issue one logical GET, retrying transient faults.
    ///
    /// After every attempt the shared quota is checked and, if it dropped
    /// below the floor, the call sleeps until the window resets.
    pub async fn request(&self, url: &str, media_type: Option<&str>) -> GitHubResult<ApiOutcome> {
        let url = encode_brackets(url);
        let media_type = media_type
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MEDIA_TYPE);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.inner.limiter.wait_if_needed().await;
            let result = self.attempt(&url, media_type).await;
            self.inner.limiter.wait_if_needed().await;

            match result {
                Attempt::Done(outcome) => return outcome,
                Attempt::Transient(e) => {
                    warn!("Timeout on {url}: {e}");
                    if attempt >= MAX_ATTEMPTS {
                        warn!("Failed after {MAX_ATTEMPTS} attempts, skipping: {url}");
                        return Ok(ApiOutcome::Skipped);
                    }
                }
                Attempt::Throttled => {
                    if attempt >= MAX_ATTEMPTS {
                        warn!("Still rate limited after {MAX_ATTEMPTS} attempts: {url}");
                        return Ok(ApiOutcome::RateLimited);
                    }
                }
            }
        }
    }

    async fn attempt(&self, url: &str, media_type: &str) -> Attempt {
        let started = Instant::now();
        let mut request = self
            .inner
            .http
            .get(url)
            .header(USER_AGENT, &self.inner.user_agent)
            .header(ACCEPT, media_type);
        if let Some(token) = &self.inner.token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if is_transient(&e) => return Attempt::Transient(e),
            Err(e) => {
                warn!("{}", self.error_msg(url, &e.to_string()).await);
                return Attempt::Done(Err(GitHubError::Transport {
                    url: url.to_string(),
                    source: e,
                }));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        self.inner.limiter.record(&headers).await;

        if !status.is_success() {
            return self.classify_failure(url, status, &headers).await;
        }

        match response.text().await {
            Ok(body) => {
                info!(
                    "Successful request. URL: {url}, Remaining: {}, Total: {} ms",
                    self.inner.limiter.remaining().await,
                    started.elapsed().as_millis()
                );
                Attempt::Done(Ok(ApiOutcome::Found(RawResponse {
                    url: url.to_string(),
                    status: status.as_u16(),
                    headers,
                    body,
                })))
            }
            Err(e) if is_transient(&e) => Attempt::Transient(e),
            Err(e) => Attempt::Done(Err(GitHubError::Transport {
                url: url.to_string(),
                source: e,
            })),
        }
    }

    async fn classify_failure(&self, url: &str, status: StatusCode, headers: &HeaderMap) -> Attempt {
        let code = status.as_u16();
        let msg = self.request_error_msg(url, status).await;
        match code {
            403 | 429 if quota_exhausted(headers) => {
                warn!("{msg}");
                Attempt::Throttled
            }
            400 | 403 | 404 | 409 | 422 => {
                warn!("{msg}");
                Attempt::Done(Ok(ApiOutcome::NotFound { status: code }))
            }
            401 => {
                warn!("{msg}");
                warn!(
                    "Unauthorised request with token: {}",
                    fmt_token(self.inner.token.as_deref())
                );
                Attempt::Done(Err(GitHubError::Unauthorized {
                    url: url.to_string(),
                }))
            }
            451 => {
                warn!("{msg}");
                warn!("Repo was taken down (DMCA)");
                Attempt::Done(Ok(ApiOutcome::NotFound { status: code }))
            }
            _ => {
                warn!("{msg}");
                Attempt::Done(Err(GitHubError::Server {
                    status: code,
                    url: url.to_string(),
                }))
            }
        }
    }

    async fn request_error_msg(&self, url: &str, status: StatusCode) -> String {
        format!(
            "Failed request. URL: {url}, Status code: {}, Status: {}, Access: {}, Remaining: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown"),
            fmt_token(self.inner.token.as_deref()),
            self.inner.limiter.remaining().await
        )
    }

    async fn error_msg(&self, url: &str, message: &str) -> String {
        format!(
            "Failed request. URL: {url}, Exception: {message}, Access: {}, Remaining: {}",
            fmt_token(self.inner.token.as_deref()),
            self.inner.limiter.remaining().await
        )
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body()
}

fn quota_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

/// First ten characters of the token, enough to tell keys apart in logs.
fn fmt_token(token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => t.chars().take(10).collect(),
        _ => "<empty-token>".to_string(),
    }
}

/// Percent-encode literal square brackets in the path part of `url`.
#[must_use]
pub fn encode_brackets(url: &str) -> String {
    if !url.contains(['[', ']']) {
        return url.to_string();
    }
    let path_start = url
        .find("://")
        .and_then(|scheme_end| {
            url[scheme_end + 3..]
                .find('/')
                .map(|i| scheme_end + 3 + i)
        })
        .unwrap_or(0);
    let (head, path) = url.split_at(path_start);
    format!("{head}{}", path.replace('[', "%5B").replace(']', "%5D"))
}

/// Builder for creating `GitHubClient`
pub struct GitHubClientBuilder {
    token: Option<String>,
    base_uri: Option<String>,
    user_agent: Option<String>,
    timeout: Duration,
    limiter: Option<RateLimiter>,
    req_limit: u32,
}

impl GitHubClientBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: None,
            base_uri: None,
            user_agent: None,
            timeout: Duration::from_secs(20),
            limiter: None,
            req_limit: 10,
        }
    }

    /// Set personal access token for authentication. Empty tokens are ignored.
    pub fn personal_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Set base URI (mirror or GitHub Enterprise)
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Connect and read timeout per attempt
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Remaining-request floor below which requests wait for the reset
    pub fn req_limit(mut self, floor: u32) -> Self {
        self.req_limit = floor;
        self
    }

    /// Share an existing limiter instead of creating one
    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Build the `GitHubClient`
    pub fn build(self) -> GitHubResult<GitHubClient> {
        let mut base_url = self
            .base_uri
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        reqwest::Url::parse(&base_url).map_err(|e| GitHubError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let http = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
            .map_err(|e| GitHubError::ClientSetup(e.to_string()))?;

        Ok(GitHubClient {
            inner: Arc::new(ClientInner {
                http,
                token: self.token,
                user_agent: self
                    .user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
                base_url,
                limiter: self
                    .limiter
                    .unwrap_or_else(|| RateLimiter::new(self.req_limit)),
            }),
        })
    }
}

impl Default for GitHubClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
