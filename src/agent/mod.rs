//! Agents with a persona, tasks, and sequential crews.
//!
//! An [`Agent`] is a role/goal/backstory persona bound to a model. A
//! [`Crew`] runs its tasks in order; every task sees the final answers of
//! the tasks before it as context.

mod crew;
mod events;
pub(crate) mod retry;

pub use crew::{Crew, CrewOutput, Task, TaskOutput};
pub use events::CrewEvent;

use crate::prompts::{PromptError, PromptLibrary};
use crate::provider::{self, ChatRequest, Completion, LlmApi, Message, StreamEvent, Usage};
use minijinja::context;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] provider::Error),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Provider(provider::Error::Cancelled))
    }
}

/// Who an agent is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

impl Persona {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
        }
    }
}

/// Model parameters shared by every agent of a pipeline.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_retries: u32,
    pub stream: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_tokens: None,
            max_retries: 3,
            stream: true,
        }
    }
}

pub struct Agent {
    persona: Persona,
    llm: Arc<dyn LlmApi>,
    prompts: Arc<PromptLibrary>,
    settings: ModelSettings,
}

impl Agent {
    pub fn new(
        persona: Persona,
        llm: Arc<dyn LlmApi>,
        prompts: Arc<PromptLibrary>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            persona,
            llm,
            prompts,
            settings,
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    fn system_prompt(&self) -> Result<String, PromptError> {
        self.prompts.render(
            "agent_system",
            context! {
                role => &self.persona.role,
                goal => &self.persona.goal,
                backstory => &self.persona.backstory,
            },
        )
    }

    /// Execute one task with the given context, returning the final answer.
    pub async fn execute(
        &self,
        description: &str,
        expected_output: &str,
        task_context: &str,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        let user = self.prompts.render(
            "task",
            context! {
                description => description,
                expected_output => expected_output,
                context => task_context,
            },
        )?;

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: Arc::new(vec![Message::user(user)]),
            system: Some(Cow::Owned(self.system_prompt()?)),
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        };

        tracing::debug!(
            role = %self.persona.role,
            provider = self.llm.id(),
            model = %request.model,
            "executing task"
        );

        let llm = self.llm.as_ref();
        let max_retries = self.settings.max_retries;
        let completion = if self.settings.stream {
            retry::with_retry(max_retries, abort, tx, || stream_once(llm, request.clone(), tx))
                .await?
        } else {
            retry::with_retry(max_retries, abort, tx, || llm.complete(request.clone())).await?
        };

        Ok(completion)
    }
}

/// One streaming attempt: forward deltas and collect the full answer.
async fn stream_once(
    llm: &dyn LlmApi,
    request: ChatRequest,
    tx: &mpsc::Sender<CrewEvent>,
) -> Result<Completion, provider::Error> {
    let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(100);

    let producer = llm.stream(request, stream_tx);
    let consumer = async {
        let mut text = String::new();
        let mut usage = Usage::default();
        while let Some(event) = stream_rx.recv().await {
            match event {
                StreamEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    let _ = tx.send(CrewEvent::TextDelta { text: delta }).await;
                }
                StreamEvent::Usage(u) => usage.add(u),
                StreamEvent::Done => break,
            }
        }
        (text, usage)
    };

    let (result, (text, usage)) = tokio::join!(producer, consumer);
    result?;

    if text.trim().is_empty() {
        return Err(provider::Error::EmptyResponse);
    }
    Ok(Completion {
        message: Message::assistant(text),
        usage,
    })
}
