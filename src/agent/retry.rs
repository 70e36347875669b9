//! Retry policy for transient provider failures.

use super::events::CrewEvent;
use crate::provider::{Completion, Error};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cap on any single retry delay, including server-requested ones.
pub const MAX_RETRY_DELAY: u64 = 60;

/// Classify a retryable error, returning the category if retryable.
///
/// HTTP responses are judged by status code alone. Message text is only
/// inspected for transport failures, which carry no status.
pub(crate) fn retryable_category(err: &Error) -> Option<&'static str> {
    match err {
        Error::RateLimited { .. } => Some("Rate limited"),
        Error::Status { status: 429, .. } => Some("Rate limited"),
        Error::Status { status, .. } if *status >= 500 => Some("Server error"),
        Error::Http(e) if e.is_timeout() => Some("Request timed out"),
        Error::Http(e) if e.is_connect() => Some("Network error"),
        Error::Http(e) => match e.status() {
            Some(status) if status.is_server_error() => Some("Server error"),
            Some(_) => None,
            None => transport_category(&e.to_string()),
        },
        Error::Stream(message) => transport_category(message),
        _ => None,
    }
}

/// Category of a transport failure from its message.
fn transport_category(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline exceeded")
    {
        return Some("Request timed out");
    }

    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
        || lower.contains("error sending request")
        || lower.contains("error decoding response body")
    {
        return Some("Network error");
    }

    None
}

/// Delay before retry number `attempt` (1-based): the server's
/// `Retry-After` if given, else `2^attempt` seconds, capped.
pub(crate) fn retry_delay(attempt: u32, server_retry_after: Option<u64>) -> u64 {
    server_retry_after
        .unwrap_or_else(|| 1u64 << attempt.min(16))
        .min(MAX_RETRY_DELAY)
}

/// Run `attempt` until it succeeds, fails permanently, exhausts
/// `max_retries` or `abort` fires. Retries are reported on `tx`.
pub(crate) async fn with_retry<F, Fut>(
    max_retries: u32,
    abort: &CancellationToken,
    tx: &mpsc::Sender<CrewEvent>,
    mut attempt: F,
) -> Result<Completion, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Completion, Error>>,
{
    let mut retry_count = 0u32;

    loop {
        let result = tokio::select! {
            biased;
            () = abort.cancelled() => return Err(Error::Cancelled),
            result = attempt() => result,
        };

        let err = match result {
            Ok(completion) => return Ok(completion),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => e,
        };

        let Some(reason) = retryable_category(&err) else {
            return Err(err);
        };
        if retry_count >= max_retries {
            return Err(err);
        }

        retry_count += 1;
        let delay = retry_delay(retry_count, err.retry_after());
        warn!(
            "{}, retrying in {}s (attempt {}/{}): {}",
            reason, delay, retry_count, max_retries, err
        );
        let _ = tx
            .send(CrewEvent::Retry {
                reason: reason.to_string(),
                delay_secs: delay,
                attempt: retry_count,
            })
            .await;

        tokio::select! {
            biased;
            () = abort.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(Duration::from_secs(delay)) => {}
        }
    }
}
