use super::{Agent, AgentError, CrewEvent};
use crate::provider::Usage;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Separator between earlier task outputs when passed on as context.
const CONTEXT_SEPARATOR: &str = "\n\n----------\n\n";

pub struct Task {
    pub agent: Arc<Agent>,
    pub description: String,
    pub expected_output: String,
}

impl Task {
    pub fn new(
        agent: Arc<Agent>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            description: description.into(),
            expected_output: expected_output.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutput {
    pub role: String,
    pub expected_output: String,
    pub raw: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrewOutput {
    pub tasks: Vec<TaskOutput>,
    /// Final answer of the last task.
    pub raw: String,
    pub usage: Usage,
}

/// Tasks executed in order.
pub struct Crew {
    tasks: Vec<Task>,
}

impl Crew {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task in order. Each task's context is the joined final
    /// answers of the tasks before it.
    pub async fn kickoff(
        &self,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<CrewOutput, AgentError> {
        let total = self.tasks.len();
        let mut outputs: Vec<TaskOutput> = Vec::with_capacity(total);
        let mut usage = Usage::default();

        for (index, task) in self.tasks.iter().enumerate() {
            let role = task.agent.persona().role.clone();
            info!(task = index + 1, total, role = %role, "task started");
            let _ = tx
                .send(CrewEvent::TaskStarted {
                    index,
                    total,
                    role: role.clone(),
                    expected_output: task.expected_output.clone(),
                })
                .await;

            let context = outputs
                .iter()
                .map(|o| o.raw.as_str())
                .collect::<Vec<_>>()
                .join(CONTEXT_SEPARATOR);

            let completion = task
                .agent
                .execute(&task.description, &task.expected_output, &context, tx, abort)
                .await?;

            info!(
                task = index + 1,
                role = %role,
                input_tokens = completion.usage.input_tokens,
                output_tokens = completion.usage.output_tokens,
                "task finished"
            );
            let _ = tx
                .send(CrewEvent::TaskFinished {
                    index,
                    role: role.clone(),
                    usage: completion.usage,
                })
                .await;

            usage.add(completion.usage);
            outputs.push(TaskOutput {
                role,
                expected_output: task.expected_output.clone(),
                raw: completion.message.content,
                usage: completion.usage,
            });
        }

        let raw = outputs.last().map(|o| o.raw.clone()).unwrap_or_default();
        Ok(CrewOutput {
            tasks: outputs,
            raw,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ModelSettings, Persona};
    use crate::prompts::PromptLibrary;
    use crate::provider::Role;
    use crate::test_support::ScriptedLlm;

    fn agent(llm: &Arc<ScriptedLlm>, role: &str, stream: bool) -> Arc<Agent> {
        Arc::new(Agent::new(
            Persona::new(role, "goal", "backstory"),
            llm.clone(),
            Arc::new(PromptLibrary::builtin().unwrap()),
            ModelSettings {
                stream,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_sequential_context_passing() {
        let llm = Arc::new(ScriptedLlm::new(["analysis text", "brd text"]));
        let crew = Crew::new(vec![
            Task::new(agent(&llm, "COBOL Analyst", false), "Analyze.", "COBOL Analysis Output"),
            Task::new(agent(&llm, "BRD Writer", false), "Write.", "Final BRD Section"),
        ]);

        let (tx, mut rx) = mpsc::channel(100);
        let output = crew.kickoff(&tx, &CancellationToken::new()).await.unwrap();
        drop(tx);

        assert_eq!(output.raw, "brd text");
        assert_eq!(output.tasks.len(), 2);
        assert_eq!(output.tasks[0].role, "COBOL Analyst");

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        let first = &requests[0].messages[0];
        assert_eq!(first.role, Role::User);
        assert!(!first.content.contains("context you're working with"));
        let second = &requests[1].messages[0].content;
        assert!(second.ends_with("This is the context you're working with:\nanalysis text"));
        assert!(
            requests[1]
                .system
                .as_deref()
                .unwrap()
                .starts_with("You are BRD Writer.")
        );

        let mut started = 0;
        let mut finished = 0;
        while let Some(event) = rx.recv().await {
            match event {
                CrewEvent::TaskStarted { total, .. } => {
                    assert_eq!(total, 2);
                    started += 1;
                }
                CrewEvent::TaskFinished { .. } => finished += 1,
                _ => {}
            }
        }
        assert_eq!((started, finished), (2, 2));
    }

    #[tokio::test]
    async fn test_streaming_forwards_deltas() {
        let llm = Arc::new(ScriptedLlm::new(["public class Payroll {}"]));
        let crew = Crew::new(vec![Task::new(
            agent(&llm, "COBOL to Java Migration Expert", true),
            "Convert.",
            "Complete Java implementation",
        )]);

        let (tx, mut rx) = mpsc::channel(100);
        let output = crew.kickoff(&tx, &CancellationToken::new()).await.unwrap();
        drop(tx);

        assert_eq!(output.raw, "public class Payroll {}");
        let mut streamed = String::new();
        while let Some(event) = rx.recv().await {
            if let CrewEvent::TextDelta { text } = event {
                streamed.push_str(&text);
            }
        }
        assert_eq!(streamed, "public class Payroll {}");
    }

    #[tokio::test]
    async fn test_failure_stops_crew() {
        let llm = Arc::new(ScriptedLlm::new(Vec::<&str>::new()));
        llm.push_error(crate::provider::Error::Api("HTTP 401: invalid key".into()));
        let crew = Crew::new(vec![
            Task::new(agent(&llm, "A", false), "one", "x"),
            Task::new(agent(&llm, "B", false), "two", "y"),
        ]);

        let (tx, _rx) = mpsc::channel(100);
        let result = crew.kickoff(&tx, &CancellationToken::new()).await;
        assert!(matches!(result, Err(AgentError::Provider(_))));
        assert_eq!(llm.requests().len(), 1);
    }
}
