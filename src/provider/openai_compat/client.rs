//! OpenAI-compatible chat-completions client.

use super::quirks::ProviderQuirks;
use super::request::{OpenAIMessage, OpenAIRequest};
use super::response::OpenAIResponse;
use super::stream::StreamChunk;
use crate::provider::api_provider::Provider;
use crate::provider::error::Error;
use crate::provider::http::{BearerAuth, HttpClient, SseParser};
use crate::provider::types::{ChatRequest, Completion, Message, Role, StreamEvent, Usage};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct OpenAICompatClient {
    http: HttpClient,
    quirks: ProviderQuirks,
    provider: Provider,
}

impl OpenAICompatClient {
    /// Create a client. `base_url` overrides the provider default and is
    /// required for [`Provider::Local`].
    pub fn new(
        provider: Provider,
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let quirks = ProviderQuirks::for_provider(provider);
        let base_url = base_url
            .or_else(|| quirks.base_url.map(String::from))
            .ok_or_else(|| Error::MissingBaseUrl(provider.id().to_string()))?;

        Ok(Self {
            http: HttpClient::new(base_url, BearerAuth::new(api_key), timeout),
            quirks,
            provider,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub async fn complete(&self, request: ChatRequest) -> Result<Completion, Error> {
        let api_request = self.build_request(&request, false);

        tracing::debug!(
            provider = %self.provider,
            model = %api_request.model,
            messages = api_request.messages.len(),
            "chat completion request"
        );

        let response: OpenAIResponse = self
            .http
            .post_json("/chat/completions", &api_request)
            .await?;

        tracing::debug!(model = %response.model, "chat completion response");
        let usage = response.usage.map(Usage::from).unwrap_or_default();
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| {
                if c.finish_reason.as_deref() == Some("length") {
                    tracing::warn!("completion truncated at max_tokens");
                }
                c.message.content
            })
            .filter(|c| !c.trim().is_empty())
            .ok_or(Error::EmptyResponse)?;

        Ok(Completion {
            message: Message::assistant(content),
            usage,
        })
    }

    pub async fn stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), Error> {
        let api_request = self.build_request(&request, true);

        tracing::debug!(
            provider = %self.provider,
            model = %api_request.model,
            messages = api_request.messages.len(),
            "chat completion stream request"
        );

        let stream = self
            .http
            .post_stream("/chat/completions", &api_request)
            .await?;
        forward_sse(stream, &tx).await
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            messages.push(OpenAIMessage {
                role: "system",
                content: system.to_string(),
            });
        }

        messages.extend(request.messages.iter().map(|m| OpenAIMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }));

        OpenAIRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
            ..Default::default()
        }
        .apply_quirks(&self.quirks)
    }

    #[cfg(test)]
    pub(super) fn build_request_for_test(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        self.build_request(request, stream)
    }
}

/// Parse an SSE byte stream and forward its events, ending with
/// [`StreamEvent::Done`].
pub(super) async fn forward_sse<S, E>(stream: S, tx: &mpsc::Sender<StreamEvent>) -> Result<(), Error>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    futures::pin_mut!(stream);

    let mut parser = SseParser::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Stream(e.to_string()))?;
        for data in parser.feed(&chunk) {
            forward_data(&data, tx).await?;
        }
    }
    if let Some(data) = parser.finish() {
        tracing::debug!("stream ended without a final blank line");
        forward_data(&data, tx).await?;
    }

    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

async fn forward_data(data: &str, tx: &mpsc::Sender<StreamEvent>) -> Result<(), Error> {
    if data.is_empty() || data == "[DONE]" {
        return Ok(());
    }
    for event in parse_stream_data(data)? {
        if tx.send(event).await.is_err() {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}

/// Turn one SSE payload into stream events. Error payloads become errors;
/// unrecognised payloads are logged and skipped.
pub(super) fn parse_stream_data(data: &str) -> Result<Vec<StreamEvent>, Error> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Failed to parse stream chunk: {e}\nData: {data}");
            return Ok(Vec::new());
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map_or_else(|| error.to_string(), String::from);
        return Err(Error::Api(message));
    }

    let chunk: StreamChunk = match serde_json::from_value(value) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Unexpected stream chunk shape: {e}\nData: {data}");
            return Ok(Vec::new());
        }
    };

    let mut events = Vec::new();
    for choice in chunk.choices {
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!("stream truncated at max_tokens");
        }
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::TextDelta(text));
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage.into()));
    }
    Ok(events)
}
