mod store;

pub use store::{RunStore, RunStoreError, RunSummary, StageRecord};
