//! OpenAI-compatible request body.

use super::quirks::ProviderQuirks;
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OpenAIMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

impl OpenAIRequest {
    /// Move the token limit into whichever field the provider accepts and
    /// request streamed usage where it is supported.
    pub fn apply_quirks(mut self, quirks: &ProviderQuirks) -> Self {
        let limit = self.max_tokens.take().or(self.max_completion_tokens.take());
        if quirks.use_max_tokens {
            self.max_tokens = limit;
        } else {
            self.max_completion_tokens = limit;
        }

        self.stream_options = (self.stream && quirks.stream_usage).then_some(StreamOptions {
            include_usage: true,
        });

        self
    }
}
