//! The migration pipeline: COBOL → BRD → Java → optimized → enterprise.
//!
//! Each stage runs a small crew against the current [`Run`] and writes
//! its results back. Stages check their prerequisites before any model
//! call, so a missing BRD or Java never costs a request.

mod personas;
mod run;

pub use run::{OptimizationLevel, Run, Stage};

use crate::agent::{Agent, AgentError, Crew, CrewEvent, CrewOutput, ModelSettings, Persona, Task};
use crate::config::Config;
use crate::prompts::{PromptError, PromptLibrary};
use crate::provider::{Client, LlmApi, Usage};
use crate::session::RunStoreError;
use minijinja::context;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Rough characters per token for budget checks.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No COBOL source provided")]
    EmptyInput,

    #[error("Cannot {stage}: {missing} is missing. {hint}")]
    MissingArtifact {
        stage: Stage,
        missing: &'static str,
        hint: &'static str,
    },

    #[error("Input for {stage} is too large: ~{estimated} tokens (limit {limit})")]
    InputTooLarge {
        stage: Stage,
        estimated: usize,
        limit: usize,
    },

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("Failed to save run: {0}")]
    Save(#[from] RunStoreError),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Agent(e) if e.is_cancelled())
    }

    /// Caused by the request rather than the model provider.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyInput
                | PipelineError::MissingArtifact { .. }
                | PipelineError::InputTooLarge { .. }
        )
    }
}

/// Estimated token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub struct Pipeline {
    llm: Arc<dyn LlmApi>,
    prompts: Arc<PromptLibrary>,
    settings: ModelSettings,
    max_input_tokens: usize,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn LlmApi>,
        prompts: Arc<PromptLibrary>,
        settings: ModelSettings,
        max_input_tokens: usize,
    ) -> Self {
        Self {
            llm,
            prompts,
            settings,
            max_input_tokens,
        }
    }

    /// Pipeline for the configured provider. `model` overrides the
    /// configured model.
    pub fn from_config(config: &Config, model: Option<&str>) -> crate::error::Result<Self> {
        let provider = config.provider()?;
        let llm: Arc<dyn LlmApi> = Arc::new(Client::new(provider, config.client_options(provider))?);
        let prompts = PromptLibrary::new(config.prompts_dir.as_deref())?;

        let settings = ModelSettings {
            model: model.map_or_else(|| config.model.clone(), str::to_string),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            stream: config.stream,
        };
        tracing::debug!(
            provider = %provider,
            model = %settings.model,
            overrides = ?prompts.overridden(),
            "pipeline configured"
        );
        Ok(Self::new(
            llm,
            Arc::new(prompts),
            settings,
            config.max_input_tokens,
        ))
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    fn agent(&self, persona: Persona) -> Arc<Agent> {
        Arc::new(Agent::new(
            persona,
            self.llm.clone(),
            self.prompts.clone(),
            self.settings.clone(),
        ))
    }

    fn check_budget(&self, stage: Stage, inputs: &[&str]) -> Result<(), PipelineError> {
        let estimated: usize = inputs.iter().map(|s| estimate_tokens(s)).sum();
        if self.max_input_tokens > 0 && estimated > self.max_input_tokens {
            return Err(PipelineError::InputTooLarge {
                stage,
                estimated,
                limit: self.max_input_tokens,
            });
        }
        Ok(())
    }

    async fn kickoff(
        &self,
        stage: Stage,
        tasks: Vec<Task>,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<CrewOutput, PipelineError> {
        info!(stage = %stage, tasks = tasks.len(), "stage started");
        let output = Crew::new(tasks).kickoff(tx, abort).await?;
        info!(
            stage = %stage,
            input_tokens = output.usage.input_tokens,
            output_tokens = output.usage.output_tokens,
            "stage finished"
        );
        Ok(output)
    }

    /// Analyze the COBOL and write the BRD. Resets everything downstream.
    pub async fn generate_brd(
        &self,
        run: &mut Run,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<Usage, PipelineError> {
        let source = run.source();
        if source.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        self.check_budget(Stage::Brd, &[&run.cobol, &run.glossary])?;

        let analysis = self.prompts.render(
            "cobol_analysis",
            context! {
                summary => source.summary(),
                cobol => &run.cobol,
                glossary => run.glossary().render(),
            },
        )?;
        let brd = self.prompts.render("brd", context! {})?;

        let tasks = vec![
            Task::new(
                self.agent(personas::cobol_analyst()),
                analysis,
                "COBOL Analysis Output",
            ),
            Task::new(self.agent(personas::brd_writer()), brd, "Final BRD Section"),
        ];
        let mut output = self.kickoff(Stage::Brd, tasks, tx, abort).await?;

        run.reset_from(Stage::Brd);
        run.analysis = output.tasks.first_mut().map(|t| std::mem::take(&mut t.raw));
        run.brd = Some(output.raw);
        run.usage.add(output.usage);
        run.touch();
        Ok(output.usage)
    }

    /// Generate Java from the COBOL and the BRD.
    pub async fn convert(
        &self,
        run: &mut Run,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<Usage, PipelineError> {
        let Some(brd) = run.brd.as_deref() else {
            return Err(PipelineError::MissingArtifact {
                stage: Stage::Convert,
                missing: "the BRD",
                hint: "Please generate a BRD first.",
            });
        };
        self.check_budget(Stage::Convert, &[&run.cobol, brd])?;

        let description = self.prompts.render(
            "java_generation",
            context! {
                cobol => &run.cobol,
                brd => brd,
                class_name => run.source().java_class_name(),
            },
        )?;
        let tasks = vec![Task::new(
            self.agent(personas::java_generator()),
            description,
            "Complete Java implementation",
        )];
        let output = self.kickoff(Stage::Convert, tasks, tx, abort).await?;

        run.reset_from(Stage::Convert);
        run.java_original = Some(output.raw.clone());
        run.java = Some(output.raw);
        run.level = Some(OptimizationLevel::Basic);
        run.usage.add(output.usage);
        run.touch();
        Ok(output.usage)
    }

    /// Evaluate the current Java against the COBOL, then optimize it
    /// using the evaluation report.
    pub async fn optimize(
        &self,
        run: &mut Run,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<Usage, PipelineError> {
        let Some(java) = run.java.clone() else {
            return Err(PipelineError::MissingArtifact {
                stage: Stage::Optimize,
                missing: "the Java code",
                hint: "Please generate Java code first.",
            });
        };
        self.check_budget(Stage::Optimize, &[&run.cobol, &java])?;

        let description = self.prompts.render(
            "evaluation",
            context! { cobol => &run.cobol, java => &java },
        )?;
        let tasks = vec![Task::new(
            self.agent(personas::code_evaluator()),
            description,
            "Detailed evaluation report",
        )];
        let evaluation = self.kickoff(Stage::Optimize, tasks, tx, abort).await?;
        self.check_budget(Stage::Optimize, &[&run.cobol, &java, &evaluation.raw])?;

        let description = self.prompts.render(
            "optimization",
            context! {
                evaluation => &evaluation.raw,
                java => &java,
                cobol => &run.cobol,
            },
        )?;
        let tasks = vec![Task::new(
            self.agent(personas::code_optimizer()),
            description,
            "Optimized Java code implementation",
        )];
        let optimized = self.kickoff(Stage::Optimize, tasks, tx, abort).await?;

        run.reset_from(Stage::Optimize);
        run.evaluation = Some(evaluation.raw);
        run.optimized_java = Some(optimized.raw.clone());
        run.java = Some(optimized.raw);
        run.level = Some(OptimizationLevel::Optimized);
        let mut usage = evaluation.usage;
        usage.add(optimized.usage);
        run.usage.add(usage);
        run.touch();
        Ok(usage)
    }

    /// Take optimized Java to enterprise standard.
    pub async fn refine(
        &self,
        run: &mut Run,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<Usage, PipelineError> {
        let Some(optimized) = run.optimized_java.as_deref() else {
            return Err(PipelineError::MissingArtifact {
                stage: Stage::Refine,
                missing: "the optimized Java code",
                hint: "Please run the optimization first.",
            });
        };
        self.check_budget(Stage::Refine, &[&run.cobol, optimized])?;

        let description = self.prompts.render(
            "refinement",
            context! {
                java => optimized,
                cobol => &run.cobol,
                packed_decimal_fields => run.source().packed_decimal_fields,
            },
        )?;
        let tasks = vec![Task::new(
            self.agent(personas::enterprise_refiner()),
            description,
            "Enterprise-grade Java implementation",
        )];
        let output = self.kickoff(Stage::Refine, tasks, tx, abort).await?;

        run.enterprise_java = Some(output.raw.clone());
        run.java = Some(output.raw);
        run.level = Some(OptimizationLevel::Enterprise);
        run.usage.add(output.usage);
        run.touch();
        Ok(output.usage)
    }

    pub async fn run_stage(
        &self,
        stage: Stage,
        run: &mut Run,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
    ) -> Result<Usage, PipelineError> {
        match stage {
            Stage::Brd => self.generate_brd(run, tx, abort).await,
            Stage::Convert => self.convert(run, tx, abort).await,
            Stage::Optimize => self.optimize(run, tx, abort).await,
            Stage::Refine => self.refine(run, tx, abort).await,
        }
    }

    /// Run every stage that has no output yet, in order. `on_stage` is
    /// called after each finished stage with that stage's usage so callers
    /// can persist progress; a failure there stops the run.
    pub async fn run_all(
        &self,
        run: &mut Run,
        tx: &mpsc::Sender<CrewEvent>,
        abort: &CancellationToken,
        mut on_stage: impl FnMut(Stage, &Run, Usage) -> Result<(), RunStoreError>,
    ) -> Result<Vec<Stage>, PipelineError> {
        let mut completed = Vec::new();
        while let Some(stage) = run.next_stage() {
            let usage = self.run_stage(stage, run, tx, abort).await?;
            on_stage(stage, run, usage)?;
            completed.push(stage);
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Error as ProviderError;
    use crate::test_support::ScriptedLlm;

    const COBOL: &str = "       IDENTIFICATION DIVISION.
       PROGRAM-ID. PAY-CALC01.
       DATA DIVISION.
       01  WS-RATE   PIC S9(5)V99 COMP-3.
       PROCEDURE DIVISION.
           STOP RUN.
";

    fn pipeline(llm: &Arc<ScriptedLlm>, max_input_tokens: usize) -> Pipeline {
        Pipeline::new(
            llm.clone(),
            Arc::new(PromptLibrary::builtin().unwrap()),
            ModelSettings {
                stream: false,
                ..Default::default()
            },
            max_input_tokens,
        )
    }

    async fn stage(p: &Pipeline, stage: Stage, run: &mut Run) -> Result<Usage, PipelineError> {
        let (tx, _rx) = mpsc::channel(100);
        p.run_stage(stage, run, &tx, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_generate_brd() {
        let llm = Arc::new(ScriptedLlm::new(["the analysis", "the brd"]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "WS-RATE: hourly pay rate");

        stage(&p, Stage::Brd, &mut run).await.unwrap();

        assert_eq!(run.analysis.as_deref(), Some("the analysis"));
        assert_eq!(run.brd.as_deref(), Some("the brd"));
        assert_eq!(run.usage.input_tokens, 20);

        let analysis_prompt = llm.prompt(0);
        assert!(analysis_prompt.contains("Program: PAY-CALC01"));
        assert!(analysis_prompt.contains("- WS-RATE: hourly pay rate"));
        assert!(llm.prompt(1).ends_with("context you're working with:\nthe analysis"));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        let llm = Arc::new(ScriptedLlm::new(["unused"]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new("   \n", "");

        let err = stage(&p, Stage::Brd, &mut run).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
        assert!(err.is_user_error());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifacts() {
        let llm = Arc::new(ScriptedLlm::new(Vec::<&str>::new()));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");

        for (s, hint) in [
            (Stage::Convert, "generate a BRD first"),
            (Stage::Optimize, "generate Java code first"),
            (Stage::Refine, "run the optimization first"),
        ] {
            let err = stage(&p, s, &mut run).await.unwrap_err();
            assert!(matches!(err, PipelineError::MissingArtifact { .. }), "{s}");
            assert!(err.to_string().contains(hint), "{err}");
        }
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_input_budget() {
        let llm = Arc::new(ScriptedLlm::new(["unused"]));
        let p = pipeline(&llm, 10);
        let mut run = Run::new(COBOL, "");

        let err = stage(&p, Stage::Brd, &mut run).await.unwrap_err();
        assert!(matches!(err, PipelineError::InputTooLarge { limit: 10, .. }));
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_convert_names_class() {
        let llm = Arc::new(ScriptedLlm::new(["class PayCalc01 {}"]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");
        run.brd = Some("brd".into());

        stage(&p, Stage::Convert, &mut run).await.unwrap();

        assert!(llm.prompt(0).contains("the main class is PayCalc01"));
        assert_eq!(run.java_original.as_deref(), Some("class PayCalc01 {}"));
        assert_eq!(run.java, run.java_original);
        assert_eq!(run.level, Some(OptimizationLevel::Basic));
    }

    #[tokio::test]
    async fn test_optimize_embeds_evaluation() {
        let llm = Arc::new(ScriptedLlm::new(["Business Logic: Partial", "class V2 {}"]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");
        run.brd = Some("brd".into());
        run.java_original = Some("class V1 {}".into());
        run.java = Some("class V1 {}".into());
        run.level = Some(OptimizationLevel::Basic);

        let usage = stage(&p, Stage::Optimize, &mut run).await.unwrap();
        assert_eq!(usage.input_tokens, 20);

        // Separate crews: the optimizer sees the report in its prompt, not as context.
        let optimizer_prompt = llm.prompt(1);
        assert!(optimizer_prompt.contains("Evaluation Report:\nBusiness Logic: Partial"));
        assert!(optimizer_prompt.contains("class V1 {}"));
        assert!(!optimizer_prompt.contains("context you're working with"));

        assert_eq!(run.evaluation.as_deref(), Some("Business Logic: Partial"));
        assert_eq!(run.java.as_deref(), Some("class V2 {}"));
        assert_eq!(run.java_original.as_deref(), Some("class V1 {}"));
        assert_eq!(run.level, Some(OptimizationLevel::Optimized));
    }

    #[tokio::test]
    async fn test_run_all_completes_pipeline() {
        let llm = Arc::new(ScriptedLlm::new([
            "analysis", "brd", "class V1 {}", "report", "class V2 {}", "class V3 {}",
        ]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");

        let (tx, _rx) = mpsc::channel(100);
        let mut seen = Vec::new();
        let completed = p
            .run_all(&mut run, &tx, &CancellationToken::new(), |s, _, _| {
                seen.push(s);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(completed, Stage::ALL.to_vec());
        assert_eq!(seen, completed);
        assert!(llm.prompt(5).contains("(the source declares 1 of them)"));
        assert_eq!(run.java.as_deref(), Some("class V3 {}"));
        assert_eq!(run.optimized_java.as_deref(), Some("class V2 {}"));
        assert_eq!(run.java_original.as_deref(), Some("class V1 {}"));
        assert_eq!(run.level, Some(OptimizationLevel::Enterprise));
        assert_eq!(run.next_stage(), None);
    }

    #[tokio::test]
    async fn test_rerunning_brd_resets_downstream() {
        let llm = Arc::new(ScriptedLlm::new(["analysis 2", "brd 2"]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");
        run.brd = Some("brd 1".into());
        run.java_original = Some("v1".into());
        run.java = Some("v1".into());
        run.level = Some(OptimizationLevel::Basic);

        stage(&p, Stage::Brd, &mut run).await.unwrap();
        assert_eq!(run.brd.as_deref(), Some("brd 2"));
        assert!(run.java.is_none());
        assert!(run.level.is_none());
    }

    #[tokio::test]
    async fn test_failed_stage_leaves_run_untouched() {
        let llm = Arc::new(ScriptedLlm::new(["report"]));
        llm.push_error(ProviderError::Api("HTTP 400: bad request".into()));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");
        run.java = Some("class V1 {}".into());
        let before = run.clone();

        let err = stage(&p, Stage::Optimize, &mut run).await.unwrap_err();
        assert!(!err.is_user_error());
        assert_eq!(run, before);
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.provider = "ollama".into();
        config.model = "llama3.1".into();
        let p = Pipeline::from_config(&config, None).unwrap();
        assert_eq!(p.settings().model, "llama3.1");
        let p = Pipeline::from_config(&config, Some("qwen2.5-coder")).unwrap();
        assert_eq!(p.settings().model, "qwen2.5-coder");

        config.provider = "mainframe".into();
        assert!(matches!(
            Pipeline::from_config(&config, None),
            Err(crate::error::Error::Config(_))
        ));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("€€€€"), 1);
        assert_eq!(estimate_tokens("Straße"), 2);
    }

    #[tokio::test]
    async fn test_run_all_stops_when_save_fails() {
        let llm = Arc::new(ScriptedLlm::new([
            "analysis", "brd", "class V1 {}", "report", "class V2 {}", "class V3 {}",
        ]));
        let p = pipeline(&llm, 100_000);
        let mut run = Run::new(COBOL, "");

        let (tx, _rx) = mpsc::channel(100);
        let err = p
            .run_all(&mut run, &tx, &CancellationToken::new(), |_, run, _| {
                Err(RunStoreError::NotFound(run.id.clone()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Save(RunStoreError::NotFound(_))));
        assert!(!err.is_user_error());
        assert_eq!(llm.requests().len(), 2);
        assert!(run.java.is_none());
    }
}
