use crate::provider::Usage;
use serde::Serialize;

/// Progress of a running crew, for printers and the web UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrewEvent {
    TaskStarted {
        index: usize,
        total: usize,
        role: String,
        expected_output: String,
    },
    TextDelta {
        text: String,
    },
    /// A transient failure; any partial text of the current task is discarded.
    Retry {
        reason: String,
        delay_secs: u64,
        attempt: u32,
    },
    TaskFinished {
        index: usize,
        role: String,
        usage: Usage,
    },
}
