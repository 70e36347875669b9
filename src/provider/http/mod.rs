//! Shared HTTP plumbing for chat-completion backends.

mod client;
mod sse;

pub use client::{BearerAuth, HttpClient};
pub use sse::SseParser;
