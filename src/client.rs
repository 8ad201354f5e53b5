//! Tracker REST API client
//!
//! Every outbound request is dispatched through the client's
//! [`RequestThrottle`]; nothing in this module talks to the network
//! directly.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::metrics::ThrottleMetrics;
use crate::models::{
    Comment, CommentList, ErrorBody, Issue, IssueState, NewComment, NewIssue, SearchPage,
    StateUpdate,
};
use crate::throttler::RequestThrottle;

#[derive(Debug, Clone)]
pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    throttle: RequestThrottle,
}

impl TrackerClient {
    pub fn new(
        base_url: &str,
        token: &str,
        throttle: RequestThrottle,
        request_timeout: Duration,
    ) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::Configuration("API token contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("tracker-bridge/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            throttle,
        })
    }

    /// Build a client and its throttle from process configuration
    pub fn from_config(config: &Config) -> ApiResult<Self> {
        let token = config
            .require_token()
            .map_err(|e| ApiError::Configuration(e.to_string()))?;
        let throttle = RequestThrottle::new(config.throttle.clone())?;
        Self::new(&config.api_url, token, throttle, config.request_timeout)
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    pub fn throttle_metrics(&self) -> ThrottleMetrics {
        self.throttle.metrics()
    }

    pub async fn get_issue(&self, key: &str) -> ApiResult<Issue> {
        let request = self.http.get(issue_url(&self.base_url, key));
        self.execute(format!("get_issue {}", key), request).await
    }

    pub async fn search_issues(&self, query: &str, limit: u32) -> ApiResult<SearchPage> {
        let limit = limit.to_string();
        let request = self
            .http
            .get(format!("{}/issues", self.base_url))
            .query(&[("q", query), ("limit", limit.as_str())]);
        self.execute("search_issues".to_string(), request).await
    }

    pub async fn create_issue(&self, issue: &NewIssue) -> ApiResult<Issue> {
        let request = self
            .http
            .post(format!("{}/issues", self.base_url))
            .json(issue);
        self.execute(format!("create_issue {}", issue.project), request)
            .await
    }

    pub async fn update_issue_state(&self, key: &str, state: IssueState) -> ApiResult<Issue> {
        let request = self
            .http
            .patch(issue_url(&self.base_url, key))
            .json(&StateUpdate { state });
        self.execute(format!("update_issue_state {}", key), request)
            .await
    }

    pub async fn add_comment(&self, key: &str, body: &str) -> ApiResult<Comment> {
        let request = self
            .http
            .post(format!("{}/comments", issue_url(&self.base_url, key)))
            .json(&NewComment { body });
        self.execute(format!("add_comment {}", key), request).await
    }

    pub async fn list_comments(&self, key: &str) -> ApiResult<Vec<Comment>> {
        let request = self
            .http
            .get(format!("{}/comments", issue_url(&self.base_url, key)));
        let list: CommentList = self
            .execute(format!("list_comments {}", key), request)
            .await?;
        Ok(list.comments)
    }

    /// Fetch several issues, `batch_size` requests in flight at the gate at once
    pub async fn get_issues(&self, keys: Vec<String>, batch_size: usize) -> Vec<ApiResult<Issue>> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();

        self.throttle
            .batch(
                keys,
                batch_size,
                move |key: String| send(http.get(issue_url(&base_url, &key))),
                "get_issues",
            )
            .await
    }

    async fn execute<T>(&self, label: String, request: reqwest::RequestBuilder) -> ApiResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.throttle.submit(label, move || send(request)).await
    }
}

fn issue_url(base_url: &str, key: &str) -> String {
    format!("{}/issues/{}", base_url, key)
}

async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> ApiResult<T> {
    let response = request.send().await?;
    decode(response).await
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    let status = response.status();
    let url = response.url().clone();
    let bytes = response.bytes().await?;

    debug!(%url, status = status.as_u16(), bytes = bytes.len(), "Tracker response");

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                if text.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    text
                }
            });
        return Err(ApiError::Http {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_slice(&bytes)?)
}
