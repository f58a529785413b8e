#![forbid(unsafe_code)]

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};

use crate::error::ToolhubError;
use crate::scan::model::{
    ApiErrorBody, CsrfTokenBody, ScanRequest, StatusUpdate, SubmitResponse,
};

/// Statuses that mean "your CSRF token or session went stale".
const AUTH_FAILURES: [u16; 3] = [401, 403, 419];

/// The calls the poller and dashboard need from the hub.
#[async_trait]
pub trait ScanApi: Send + Sync {
    async fn status(&self, task_id: &str, include_log: bool)
    -> Result<StatusUpdate, ToolhubError>;

    async fn ping(&self) -> Result<(), ToolhubError>;
}

#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: Mutex<Option<String>>,
}

struct Call<'a> {
    method: Method,
    segments: &'a [&'a str],
    query: &'a [(&'a str, &'a str)],
    form: Option<&'a ScanRequest>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        csrf_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ToolhubError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| ToolhubError::Config(format!("invalid server.base_url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ToolhubError::Config(format!(
                "server.base_url cannot be used as a base: {base_url}"
            )));
        }
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(concat!("toolhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolhubError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base,
            token: Mutex::new(csrf_token.filter(|t| !t.trim().is_empty())),
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, ToolhubError> {
        Self::new(
            &cfg.server.base_url,
            Some(cfg.server.csrf_token.clone()),
            Duration::from_secs(cfg.server.timeout_secs),
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    #[must_use]
    pub fn csrf_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: String) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ToolhubError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ToolhubError::Config(format!("invalid base URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetches a fresh token from `/csrf-token` and remembers it.
    pub async fn refresh_token(&self) -> Result<String, ToolhubError> {
        let resp = self
            .dispatch(&Call {
                method: Method::GET,
                segments: &["csrf-token"],
                query: &[],
                form: None,
            })
            .await?;
        let resp = check(resp).await?;
        let url = resp.url().to_string();
        let body: CsrfTokenBody = resp
            .json()
            .await
            .map_err(|source| ToolhubError::Transport { url, source })?;
        self.set_token(body.csrf_token.clone());
        tracing::debug!("CSRF token refreshed");
        Ok(body.csrf_token)
    }

    async fn dispatch(&self, call: &Call<'_>) -> Result<reqwest::Response, ToolhubError> {
        let url = self.url(call.segments)?;
        let mut req = self
            .http
            .request(call.method.clone(), url.clone())
            .header("X-Requested-With", "XMLHttpRequest");
        if let Some(token) = self.csrf_token() {
            req = req.header("X-CSRFToken", token);
        }
        if !call.query.is_empty() {
            req = req.query(call.query);
        }
        if let Some(form) = call.form {
            req = req.form(form);
        }
        req.send().await.map_err(|source| ToolhubError::Transport {
            url: url.to_string(),
            source,
        })
    }

    /// Sends a call, refreshing the CSRF token and replaying once on an auth
    /// failure. If the refresh itself fails the first response is returned.
    async fn execute(&self, call: &Call<'_>) -> Result<reqwest::Response, ToolhubError> {
        if call.method != Method::GET && self.csrf_token().is_none() {
            self.refresh_token().await?;
        }

        let mut retried = false;
        loop {
            let resp = self.dispatch(call).await?;
            let status = resp.status().as_u16();
            if retried || !AUTH_FAILURES.contains(&status) {
                return Ok(resp);
            }
            retried = true;
            tracing::debug!(status, url = %resp.url(), "auth failure; refreshing CSRF token");
            if let Err(e) = self.refresh_token().await {
                tracing::warn!(error = %e, "CSRF token refresh failed");
                return Ok(resp);
            }
        }
    }

    pub async fn get_status(
        &self,
        task_id: &str,
        include_log: bool,
    ) -> Result<StatusUpdate, ToolhubError> {
        let query: &[(&str, &str)] = if include_log {
            &[("include_log", "1")]
        } else {
            &[]
        };
        let resp = self
            .execute(&Call {
                method: Method::GET,
                segments: &["status", task_id],
                query,
                form: None,
            })
            .await?;
        let resp = check(resp).await?;
        let url = resp.url().to_string();
        resp.json()
            .await
            .map_err(|source| ToolhubError::Transport { url, source })
    }

    pub async fn submit(&self, form: &ScanRequest) -> Result<SubmitResponse, ToolhubError> {
        let resp = self
            .execute(&Call {
                method: Method::POST,
                segments: &["repo-scan"],
                query: &[],
                form: Some(form),
            })
            .await?;
        let resp = check(resp).await?;
        let url = resp.url().to_string();
        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|source| ToolhubError::Transport { url, source })?;
        tracing::info!(task_id = %body.task_id, repo = %form.repo_url, "scan queued");
        Ok(body)
    }

    pub async fn ping_server(&self) -> Result<(), ToolhubError> {
        let resp = self
            .dispatch(&Call {
                method: Method::GET,
                segments: &["ping"],
                query: &[],
                form: None,
            })
            .await?;
        check(resp).await.map(drop)
    }

    pub async fn download_screenshot(&self, filename: &str) -> Result<Vec<u8>, ToolhubError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ToolhubError::Validation(format!(
                "refusing to download suspicious screenshot name: {filename}"
            )));
        }
        let resp = self
            .execute(&Call {
                method: Method::GET,
                segments: &["download", "screenshots", filename],
                query: &[],
                form: None,
            })
            .await?;
        let resp = check(resp).await?;
        let url = resp.url().to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|source| ToolhubError::Transport { url, source })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ScanApi for ApiClient {
    async fn status(
        &self,
        task_id: &str,
        include_log: bool,
    ) -> Result<StatusUpdate, ToolhubError> {
        self.get_status(task_id, include_log).await
    }

    async fn ping(&self) -> Result<(), ToolhubError> {
        self.ping_server().await
    }
}

/// Turns non-2xx responses into errors, preferring the server's own message.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ToolhubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    if status != StatusCode::NOT_FOUND
        && let Ok(body) = resp.json::<ApiErrorBody>().await
        && !body.error.trim().is_empty()
    {
        return Err(ToolhubError::Api(body.error));
    }
    Err(ToolhubError::HttpStatus {
        status: status.as_u16(),
        url,
    })
}
