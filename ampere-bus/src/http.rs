use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Request(e) => e.status(),
            HttpError::Status { status, .. } => Some(*status),
        }
    }
}

/// JSON-over-HTTP client with a fixed per-request timeout and bearer auth.
/// Anything other than a 2xx response is an error.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, HttpError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { http })
    }

    pub async fn post_json<T>(&self, url: &str, bearer: &str, body: &T) -> Result<(), HttpError>
    where
        T: Serialize + ?Sized,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await?;

        check(response).await
    }

    pub async fn put_json<T>(&self, url: &str, bearer: &str, body: &T) -> Result<(), HttpError>
    where
        T: Serialize + ?Sized,
    {
        let response = self
            .http
            .put(url)
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await?;

        check(response).await
    }
}

async fn check(response: reqwest::Response) -> Result<(), HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(HttpError::Status { status, body })
}
