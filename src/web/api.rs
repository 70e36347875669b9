//! Routing and handlers for the JSON API.

use crate::agent::CrewEvent;
use crate::cobol::CobolSource;
use crate::export::{self, Artifact};
use crate::pipeline::{Pipeline, PipelineError, Run, Stage};
use crate::session::{RunStore, RunStoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("index.html");
const JSON: &str = "application/json";
const RUN_LIST_LIMIT: usize = 50;

pub struct AppState {
    pipeline: Pipeline,
    store: Mutex<RunStore>,
    runtime: Handle,
    abort: CancellationToken,
    active: Mutex<HashMap<String, Progress>>,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        store: RunStore,
        runtime: Handle,
        abort: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            store: Mutex::new(store),
            runtime,
            abort,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub(super) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn store(&self) -> Result<MutexGuard<'_, RunStore>, ApiError> {
        self.store
            .lock()
            .map_err(|_| ApiError::new(500, "Run store is unavailable"))
    }

    fn active(&self) -> Result<MutexGuard<'_, HashMap<String, Progress>>, ApiError> {
        self.active
            .lock()
            .map_err(|_| ApiError::new(500, "Progress state is unavailable"))
    }
}

/// What a running stage is doing, for the UI's progress line.
#[derive(Debug, Clone, Serialize)]
struct Progress {
    stage: Stage,
    task: usize,
    total: usize,
    role: Option<String>,
    received_chars: usize,
    retry: Option<String>,
}

impl Progress {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            task: 0,
            total: 0,
            role: None,
            received_chars: 0,
            retry: None,
        }
    }

    fn apply(&mut self, event: CrewEvent) {
        match event {
            CrewEvent::TaskStarted {
                index, total, role, ..
            } => {
                self.task = index + 1;
                self.total = total;
                self.role = Some(role);
                self.received_chars = 0;
                self.retry = None;
            }
            CrewEvent::TextDelta { text } => self.received_chars += text.len(),
            CrewEvent::Retry {
                reason,
                delay_secs,
                attempt,
            } => {
                self.received_chars = 0;
                self.retry = Some(format!("{reason}, retry {attempt} in {delay_secs}s"));
            }
            CrewEvent::TaskFinished { .. } => {}
        }
    }
}

/// Marks a run busy until dropped.
struct ActiveRun<'a> {
    state: &'a AppState,
    id: String,
}

impl<'a> ActiveRun<'a> {
    fn claim(state: &'a AppState, id: &str, stage: Stage) -> Result<Self, ApiError> {
        let mut active = state.active()?;
        if active.contains_key(id) {
            return Err(ApiError::new(409, "A stage is already running for this run"));
        }
        active.insert(id.to_string(), Progress::new(stage));
        Ok(Self {
            state,
            id: id.to_string(),
        })
    }

    fn update(&self, event: CrewEvent) {
        if let Ok(mut active) = self.state.active.lock()
            && let Some(progress) = active.get_mut(&self.id)
        {
            progress.apply(event);
        }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.state.active.lock() {
            active.remove(&self.id);
        }
    }
}

pub(super) struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub file_name: Option<&'static str>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: JSON,
                body,
                file_name: None,
            },
            Err(e) => Self::error(500, &format!("Failed to encode response: {e}")),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: JSON,
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
            file_name: None,
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: u16,
    message: String,
}

impl ApiError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RunStoreError> for ApiError {
    fn from(e: RunStoreError) -> Self {
        match e {
            RunStoreError::NotFound(_) => Self::new(404, e.to_string()),
            _ => Self::new(500, e.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = if e.is_user_error() {
            400
        } else if e.is_cancelled() {
            503
        } else if matches!(e, PipelineError::Save(RunStoreError::NotFound(_))) {
            404
        } else if matches!(e, PipelineError::Prompt(_) | PipelineError::Save(_)) {
            500
        } else {
            502
        };
        Self::new(status, e.to_string())
    }
}

/// A run plus what the UI derives from it.
#[derive(Serialize)]
struct RunView<'a> {
    #[serde(flatten)]
    run: &'a Run,
    title: String,
    next_stage: Option<Stage>,
    level_description: Option<&'static str>,
    java_file_name: &'static str,
    downloads: Vec<&'static str>,
}

impl<'a> RunView<'a> {
    fn new(run: &'a Run) -> Self {
        Self {
            run,
            title: run.title(),
            next_stage: run.next_stage(),
            level_description: run.level.map(|l| l.description()),
            java_file_name: export::java_file_name(run.level),
            downloads: Artifact::ALL
                .into_iter()
                .filter(|a| export::is_available(run, *a))
                .map(|a| a.id())
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct NewRun {
    cobol: String,
    #[serde(default)]
    glossary: String,
}

pub(super) async fn route(state: &AppState, method: &str, path: &str, body: &str) -> Reply {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let result = match (method, segments.as_slice()) {
        ("GET", []) => {
            return Reply {
                status: 200,
                content_type: "text/html; charset=utf-8",
                body: INDEX_HTML.as_bytes().to_vec(),
                file_name: None,
            };
        }
        ("GET", ["api", "runs"]) => list_runs(state),
        ("POST", ["api", "runs"]) => create_run(state, body),
        ("GET", ["api", "runs", id]) => get_run(state, id),
        ("DELETE", ["api", "runs", id]) => delete_run(state, id),
        ("GET", ["api", "runs", id, "progress"]) => progress(state, id),
        ("POST", ["api", "runs", id, stage]) => run_stage(state, id, stage).await,
        ("GET", ["api", "runs", id, "download", artifact]) => download(state, id, artifact),
        _ => Err(ApiError::new(404, format!("No route for {method} {path}"))),
    };

    result.unwrap_or_else(|e| {
        if e.status >= 500 {
            warn!(status = e.status, "{method} {path}: {}", e.message);
        }
        Reply::error(e.status, &e.message)
    })
}

fn list_runs(state: &AppState) -> Result<Reply, ApiError> {
    let runs = state.store()?.list(RUN_LIST_LIMIT)?;
    Ok(Reply::json(200, &runs))
}

fn create_run(state: &AppState, body: &str) -> Result<Reply, ApiError> {
    let input: NewRun = serde_json::from_str(body)
        .map_err(|e| ApiError::new(400, format!("Invalid request body: {e}")))?;
    if CobolSource::inspect(&input.cobol).is_empty() {
        return Err(PipelineError::EmptyInput.into());
    }

    let run = Run::new(input.cobol, input.glossary);
    state.store()?.save(&run)?;
    info!(run = %run.id, "run created");
    Ok(Reply::json(201, &RunView::new(&run)))
}

fn get_run(state: &AppState, id: &str) -> Result<Reply, ApiError> {
    let run = state.store()?.load(id)?;
    Ok(Reply::json(200, &RunView::new(&run)))
}

fn delete_run(state: &AppState, id: &str) -> Result<Reply, ApiError> {
    // Held until the delete is done so no stage can claim the run in between.
    let active = state.active()?;
    let store = state.store()?;
    let run_id = store.load(id)?.id;
    if active.contains_key(&run_id) {
        return Err(ApiError::new(409, "Cannot delete a run while a stage is running"));
    }
    store.delete(&run_id)?;
    info!(run = %run_id, "run deleted");
    Ok(Reply::json(200, &serde_json::json!({ "deleted": run_id })))
}

fn progress(state: &AppState, id: &str) -> Result<Reply, ApiError> {
    let progress = state.active()?.get(id).cloned();
    Ok(Reply::json(200, &progress))
}

async fn run_stage(state: &AppState, id: &str, stage: &str) -> Result<Reply, ApiError> {
    let stage = Stage::from_id(stage)
        .ok_or_else(|| ApiError::new(404, format!("Unknown stage: {stage}")))?;
    let run_id = state.store()?.load(id)?.id;
    let active = ActiveRun::claim(state, &run_id, stage)?;
    // Only read once claimed, so a stage that finished meanwhile is seen.
    let mut run = state.store()?.load(&run_id)?;

    let (tx, mut rx) = mpsc::channel(100);
    let work = async {
        let result = state
            .pipeline
            .run_stage(stage, &mut run, &tx, &state.abort)
            .await;
        drop(tx);
        result
    };
    let events = async {
        while let Some(event) = rx.recv().await {
            active.update(event);
        }
    };
    let (result, ()) = tokio::join!(work, events);
    let usage = result?;

    state
        .store()?
        .save_stage(&run, stage, &state.pipeline.settings().model, usage)?;
    Ok(Reply::json(200, &RunView::new(&run)))
}

fn download(state: &AppState, id: &str, artifact: &str) -> Result<Reply, ApiError> {
    let artifact = Artifact::from_id(artifact)
        .ok_or_else(|| ApiError::new(404, format!("Unknown artifact: {artifact}")))?;
    let run = state.store()?.load(id)?;
    let file = export::render(&run, artifact)
        .map_err(|e| ApiError::new(500, format!("Failed to render {}: {e}", artifact.id())))?
        .ok_or_else(|| ApiError::new(404, format!("No {} available yet", artifact.id())))?;

    Ok(Reply {
        status: 200,
        content_type: file.content_type,
        body: file.content,
        file_name: Some(file.file_name),
    })
}
