use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::Error),

    #[error("Prompt error: {0}")]
    Prompt(#[from] crate::prompts::PromptError),
}

pub type Result<T> = std::result::Result<T, Error>;
