//! API provider detection.
//!
//! Every supported backend speaks the OpenAI chat-completions protocol;
//! providers differ in base URL, auth and a handful of request quirks.

use std::env;

/// Supported chat-completions backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Direct OpenAI API
    OpenAI,
    /// OpenRouter aggregator
    OpenRouter,
    /// Groq cloud inference
    Groq,
    /// Local Ollama instance
    Ollama,
    /// Any other OpenAI-compatible server (requires `base_url`)
    Local,
}

impl Provider {
    pub const ALL: &'static [Provider] = &[
        Provider::OpenAI,
        Provider::OpenRouter,
        Provider::Groq,
        Provider::Ollama,
        Provider::Local,
    ];

    /// Lowercase ID used in config files.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Groq => "groq",
            Provider::Ollama => "ollama",
            Provider::Local => "local",
        }
    }

    /// Parse provider from ID string.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "openrouter" => Some(Provider::OpenRouter),
            "groq" => Some(Provider::Groq),
            "ollama" => Some(Provider::Ollama),
            "local" => Some(Provider::Local),
            _ => None,
        }
    }

    /// Display name for the provider.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::OpenRouter => "OpenRouter",
            Provider::Groq => "Groq",
            Provider::Ollama => "Ollama",
            Provider::Local => "Local",
        }
    }

    /// Environment variable(s) that carry the API key.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAI => &["OPENAI_API_KEY"],
            Provider::OpenRouter => &["OPENROUTER_API_KEY"],
            Provider::Groq => &["GROQ_API_KEY"],
            Provider::Ollama | Provider::Local => &[],
        }
    }

    /// Whether requests must carry an API key.
    pub fn requires_key(&self) -> bool {
        !matches!(self, Provider::Ollama | Provider::Local)
    }

    /// Get the API key from the environment, if set.
    pub fn api_key(&self) -> Option<String> {
        self.env_vars()
            .iter()
            .filter_map(|var| env::var(var).ok())
            .find(|key| !key.is_empty())
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(Provider::from_id(provider.id()), Some(*provider));
        }
    }

    #[test]
    fn test_from_id_case_insensitive() {
        assert_eq!(Provider::from_id("OpenRouter"), Some(Provider::OpenRouter));
        assert_eq!(Provider::from_id("anthropic"), None);
    }

    #[test]
    fn test_keyless_providers() {
        assert!(!Provider::Ollama.requires_key());
        assert!(!Provider::Local.requires_key());
        assert!(Provider::OpenAI.requires_key());
        assert!(Provider::Ollama.env_vars().is_empty());
    }
}
