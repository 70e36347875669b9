//! Per-provider differences between OpenAI-compatible APIs.

use crate::provider::api_provider::Provider;

#[derive(Debug, Clone)]
pub struct ProviderQuirks {
    /// Send `max_tokens` instead of `max_completion_tokens`.
    pub use_max_tokens: bool,
    /// Ask for a final usage chunk via `stream_options.include_usage`.
    pub stream_usage: bool,
    /// Default base URL. `None` means the config must provide one.
    pub base_url: Option<&'static str>,
}

impl ProviderQuirks {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::OpenAI => Self {
                use_max_tokens: false,
                stream_usage: true,
                base_url: Some("https://api.openai.com/v1"),
            },
            Provider::OpenRouter => Self {
                use_max_tokens: false,
                stream_usage: true,
                base_url: Some("https://openrouter.ai/api/v1"),
            },
            Provider::Groq => Self {
                use_max_tokens: true,
                stream_usage: false,
                base_url: Some("https://api.groq.com/openai/v1"),
            },
            Provider::Ollama => Self {
                use_max_tokens: true,
                stream_usage: false,
                base_url: Some("http://localhost:11434/v1"),
            },
            Provider::Local => Self {
                use_max_tokens: true,
                stream_usage: false,
                base_url: None,
            },
        }
    }
}
