//! Provider-agnostic chat client.

use super::api_provider::Provider;
use super::error::Error;
use super::openai_compat::OpenAICompatClient;
use super::types::{ChatRequest, Completion, StreamEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default whole-request timeout. Full Java generations routinely take
/// minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Connection settings resolved from config and environment.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

/// Chat-completion API used by agents.
#[async_trait]
pub trait LlmApi: Send + Sync {
    /// Provider identifier, for logs.
    fn id(&self) -> &str;
    /// Stream a completion, sending deltas to `tx` and finishing with
    /// [`StreamEvent::Done`].
    async fn stream(&self, request: ChatRequest, tx: mpsc::Sender<StreamEvent>)
    -> Result<(), Error>;
    /// Get a non-streaming completion.
    async fn complete(&self, request: ChatRequest) -> Result<Completion, Error>;
}

pub struct Client {
    inner: OpenAICompatClient,
}

impl Client {
    /// Create a client. Providers that need a key fail here rather than on
    /// the first request.
    pub fn new(provider: Provider, options: ClientOptions) -> Result<Self, Error> {
        let api_key = options.api_key.or_else(|| provider.api_key());
        if provider.requires_key() && api_key.is_none() {
            return Err(Error::MissingApiKey {
                provider: provider.name().to_string(),
                env_vars: provider.env_vars().iter().map(|s| s.to_string()).collect(),
            });
        }

        let inner = OpenAICompatClient::new(
            provider,
            api_key,
            options.base_url,
            options.timeout.unwrap_or(DEFAULT_TIMEOUT),
        )?;
        Ok(Self { inner })
    }

    pub fn provider(&self) -> Provider {
        self.inner.provider()
    }
}

#[async_trait]
impl LlmApi for Client {
    fn id(&self) -> &str {
        self.inner.provider().id()
    }

    async fn stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), Error> {
        self.inner.stream(request, tx).await
    }

    async fn complete(&self, request: ChatRequest) -> Result<Completion, Error> {
        self.inner.complete(request).await
    }
}
