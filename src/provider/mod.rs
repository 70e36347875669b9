//! Chat-completion providers.
//!
//! Every backend is reached through the OpenAI-compatible wire protocol;
//! [`LlmApi`] is the seam agents depend on, which keeps them testable with
//! a scripted implementation.
//!
//! ```ignore
//! use cobol_bridge::provider::{Client, ClientOptions, Provider};
//!
//! let client = Client::new(Provider::OpenAI, ClientOptions::default())?;
//! let completion = client.complete(request).await?;
//! ```

mod api_provider;
mod client;
mod error;
mod http;
mod openai_compat;
mod types;

pub use api_provider::Provider;
pub use client::{Client, ClientOptions, DEFAULT_TIMEOUT, LlmApi};
pub use error::{Error, format_api_error};
pub use types::*;
