//! OpenAI-compatible API client.
//!
//! Serves OpenAI, OpenRouter, Groq, Ollama and custom local servers.

mod client;
mod quirks;
mod request;
mod response;
mod stream;

#[cfg(test)]
mod tests;

pub use client::OpenAICompatClient;
