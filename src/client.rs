use std::time::Duration;

use log::debug;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::error::{Result, StageWatchError};

pub const DEFAULT_BASE_URL: &str = "https://codesphere.com/api";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect timeout for event streams. Reads on a stream are never bounded here.
pub const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("stagewatch/", env!("CARGO_PKG_VERSION"));

/// HTTP transport shared by the log streams and the pipeline status calls.
///
/// Holds two underlying clients: one for ordinary request/response calls with
/// bounded timeouts, and one for long-lived `text/event-stream` responses
/// whose read side is unbounded. Any overall stream deadline is enforced by
/// [`LogStream`](crate::logs::LogStream), not by the transport.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    stream_client: Client,
    api_url: Url,
    token: Option<Token>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<Token>) -> Result<Self> {
        Self::with_timeouts(
            base_url,
            token,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        token: Option<Token>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| StageWatchError::Config(format!("Failed to create HTTP client: {e}")))?;

        let stream_client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                StageWatchError::Config(format!("Failed to create streaming HTTP client: {e}"))
            })?;

        // Url::join replaces the last segment unless the base ends with '/'
        let mut base = base_url.trim().to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        let api_url = Url::parse(&base)
            .map_err(|e| StageWatchError::Config(format!("Invalid base URL: {e}")))?;

        Ok(Self {
            client,
            stream_client,
            api_url,
            token,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Resolve an endpoint path such as `/workspaces/1/pipeline/run` against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| StageWatchError::Config(format!("Invalid endpoint '{path}': {e}")))
    }

    pub fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("Request: GET {url}");

        let response = self.auth_request(self.client.get(url)).send().await?;
        let response = check_status(&Method::GET, response).await?;

        Ok(response.json().await?)
    }

    pub async fn post(&self, path: &str) -> Result<()> {
        let url = self.endpoint(path)?;
        debug!("Request: POST {url}");

        let response = self.auth_request(self.client.post(url)).send().await?;
        check_status(&Method::POST, response).await?;

        Ok(())
    }

    /// Perform the blocking handshake for a `text/event-stream` endpoint.
    ///
    /// A non-successful response is read in full and translated into a domain
    /// error; no partial stream is handed out.
    pub async fn open_event_stream(&self, path: &str) -> Result<Response> {
        let url = self.endpoint(path)?;
        debug!("Opening event stream: GET {url}");

        let response = self
            .auth_request(
                self.stream_client
                    .get(url)
                    .header(ACCEPT, "text/event-stream"),
            )
            .send()
            .await?;

        check_status(&Method::GET, response).await
    }
}

async fn check_status(method: &Method, response: Response) -> Result<Response> {
    if response.status().is_success() {
        debug!("Response: {} for {}", response.status(), response.url());
        Ok(response)
    } else {
        Err(error_for_status(method, response).await)
    }
}

/// Translate a non-successful response to a `method` request into the matching [`StageWatchError`].
pub async fn error_for_status(method: &Method, response: Response) -> StageWatchError {
    let status = response.status().as_u16();
    let request = format!("{method} {}", response.url());
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());
    let body = serde_json::from_str::<serde_json::Value>(&text).ok();

    let message = body
        .as_ref()
        .and_then(message_from_body)
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("HTTP {status}")
            } else {
                text.clone()
            }
        });

    debug!("API error {status} on {request}: {message}");

    match status {
        401 => StageWatchError::Authentication(message),
        403 => StageWatchError::Authorization(message),
        404 => StageWatchError::NotFound(message),
        400 | 422 => {
            let detail = body
                .as_ref()
                .and_then(|b| b.get("errors"))
                .map(|errors| errors.to_string());
            StageWatchError::Validation { message, detail }
        }
        409 => StageWatchError::Conflict(message),
        429 => StageWatchError::RateLimited {
            message,
            retry_after,
        },
        _ => StageWatchError::Api {
            status: i64::from(status),
            message,
            body,
            request: Some(request),
        },
    }
}

fn message_from_body(body: &serde_json::Value) -> Option<String> {
    ["message", "error", "detail", "errors"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Array(items) if !items.is_empty() => Some(
                items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        })
}
