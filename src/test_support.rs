//! Shared test helpers.

use crate::provider::{ChatRequest, Completion, Error, LlmApi, Message, StreamEvent, Usage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// An [`LlmApi`] that replays queued answers and records every request.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, Error>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_answer(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn push_error(&self, error: Error) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Last user message of request `index`.
    pub fn prompt(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index]
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn next(&self, request: ChatRequest) -> Result<String, Error> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Api("script exhausted".into())))
    }
}

#[async_trait]
impl LlmApi for ScriptedLlm {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), Error> {
        let text = self.next(request)?;
        // Split so consumers see more than one delta.
        let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
        for part in [&text[..mid], &text[mid..]] {
            if !part.is_empty() {
                let _ = tx.send(StreamEvent::TextDelta(part.to_string())).await;
            }
        }
        let _ = tx
            .send(StreamEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }))
            .await;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }

    async fn complete(&self, request: ChatRequest) -> Result<Completion, Error> {
        let text = self.next(request)?;
        Ok(Completion {
            message: Message::assistant(text),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}
