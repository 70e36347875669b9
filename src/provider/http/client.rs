//! HTTP client wrapper for chat-completion requests.

use crate::provider::error::{Error, format_api_error};
use bytes::Bytes;
use futures::Stream;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer credentials. Keyless local servers use `None`.
#[derive(Clone, Default)]
pub struct BearerAuth(Option<String>);

impl BearerAuth {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("BearerAuth([REDACTED])"),
            None => f.write_str("BearerAuth(None)"),
        }
    }
}

/// HTTP client bound to one API base URL.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    auth: BearerAuth,
}

impl HttpClient {
    /// Create a new HTTP client. `timeout` bounds a whole request, which for
    /// long code generations has to be generous.
    pub fn new(base_url: impl Into<String>, auth: BearerAuth, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.auth.0 {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::Api("API key contains invalid header characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// POST a JSON body and deserialize the JSON response.
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, Error> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: parse_retry_after(&response),
            });
        }
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Api(format!("Failed to parse response: {e}\nBody: {text}")))
    }

    /// POST a JSON body and return the raw SSE byte stream.
    pub async fn post_stream<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, Error> {
        let url = format!("{}{path}", self.base_url);
        let mut headers = self.build_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: parse_retry_after(&response),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        Ok(response.bytes_stream())
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> Error {
    Error::Status {
        status: status.as_u16(),
        message: format_api_error(&format!("HTTP {status}: {body}")),
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    let value = response.headers().get(RETRY_AFTER)?;
    parse_retry_after_value(value.to_str().ok()?)
}

/// Parse a `Retry-After` value in seconds, rounding fractions up.
/// HTTP-date values are not supported and yield `None`.
fn parse_retry_after_value(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(secs.max(1));
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f > 0.0 => Some((f.ceil() as u64).max(1)),
        _ => None,
    }
}
