//! Run persistence with `SQLite`.
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite uses i64

use crate::pipeline::{OptimizationLevel, Run, Stage};
use crate::provider::Usage;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use thiserror::Error;

const SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Summary of a run for listing purposes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub id: String,
    pub program_id: Option<String>,
    pub level: Option<OptimizationLevel>,
    pub next_stage: Option<Stage>,
    pub updated_at: DateTime<Utc>,
}

/// One finished stage, as recorded in the history table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub model: String,
    pub usage: Usage,
    pub finished_at: DateTime<Utc>,
}

pub struct RunStore {
    db: Connection,
}

impl RunStore {
    /// Open or create a run store at the given path.
    pub fn open(path: &Path) -> Result<Self, RunStoreError> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                RunStoreError::InvalidData(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn in_memory() -> Result<Self, RunStoreError> {
        let store = Self {
            db: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RunStoreError> {
        let version: i32 = self
            .db
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        // v0 -> v1: runs
        if version < 1 {
            self.db.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS runs (
                    id          TEXT PRIMARY KEY,
                    program_id  TEXT,
                    level       TEXT,
                    next_stage  TEXT,
                    created_at  INTEGER NOT NULL,
                    updated_at  INTEGER NOT NULL,
                    data        TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_runs_updated
                    ON runs(updated_at DESC);

                PRAGMA user_version = 1;
                ",
            )?;
        }

        // v1 -> v2: per-stage history
        if version < SCHEMA_VERSION {
            self.db.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS stage_history (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id         TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    stage          TEXT NOT NULL,
                    model          TEXT NOT NULL,
                    input_tokens   INTEGER NOT NULL,
                    output_tokens  INTEGER NOT NULL,
                    finished_at    INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_stage_history_run
                    ON stage_history(run_id, id);

                PRAGMA user_version = 2;
                ",
            )?;
        }

        self.db.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(())
    }

    /// Insert or replace a run.
    pub fn save(&self, run: &Run) -> Result<(), RunStoreError> {
        let data = serde_json::to_string(run)?;
        self.db.execute(
            r"
            INSERT INTO runs (id, program_id, level, next_stage, created_at, updated_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                program_id = excluded.program_id,
                level = excluded.level,
                next_stage = excluded.next_stage,
                updated_at = excluded.updated_at,
                data = excluded.data
            ",
            params![
                run.id,
                run.source().program_id,
                run.level.map(|l| l.id()),
                run.next_stage().map(|s| s.id()),
                run.created_at.timestamp_millis(),
                run.updated_at.timestamp_millis(),
                data,
            ],
        )?;
        Ok(())
    }

    /// Overwrite an existing run. A run deleted in the meantime stays
    /// deleted and yields `NotFound`.
    fn update(&self, run: &Run) -> Result<(), RunStoreError> {
        let data = serde_json::to_string(run)?;
        let changed = self.db.execute(
            r"
            UPDATE runs SET
                program_id = ?2,
                level = ?3,
                next_stage = ?4,
                updated_at = ?5,
                data = ?6
            WHERE id = ?1
            ",
            params![
                run.id,
                run.source().program_id,
                run.level.map(|l| l.id()),
                run.next_stage().map(|s| s.id()),
                run.updated_at.timestamp_millis(),
                data,
            ],
        )?;
        if changed == 0 {
            return Err(RunStoreError::NotFound(run.id.clone()));
        }
        Ok(())
    }

    /// Update a stored run together with the record of the stage that just
    /// finished.
    pub fn save_stage(
        &self,
        run: &Run,
        stage: Stage,
        model: &str,
        usage: Usage,
    ) -> Result<(), RunStoreError> {
        self.db.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| {
            self.update(run)?;
            self.db.execute(
                r"
                INSERT INTO stage_history (run_id, stage, model, input_tokens, output_tokens, finished_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    run.id,
                    stage.id(),
                    model,
                    usage.input_tokens,
                    usage.output_tokens,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            Ok::<(), RunStoreError>(())
        })();

        match result {
            Ok(()) => {
                self.db.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = self.db.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Load a run by ID. A unique ID prefix of at least 4 characters also
    /// matches.
    pub fn load(&self, id: &str) -> Result<Run, RunStoreError> {
        let data: Option<String> = self
            .db
            .query_row("SELECT data FROM runs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;

        let data = match data {
            Some(data) => data,
            None => self.load_by_prefix(id)?,
        };
        Ok(serde_json::from_str(&data)?)
    }

    fn load_by_prefix(&self, prefix: &str) -> Result<String, RunStoreError> {
        if prefix.len() < 4 || prefix.contains(['%', '_']) {
            return Err(RunStoreError::NotFound(prefix.to_string()));
        }
        let mut stmt = self
            .db
            .prepare("SELECT data FROM runs WHERE id LIKE ?1 || '%' LIMIT 2")?;
        let mut matches: Vec<String> = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(RunStoreError::NotFound(prefix.to_string())),
            _ => Err(RunStoreError::InvalidData(format!(
                "Run ID prefix '{prefix}' is ambiguous"
            ))),
        }
    }

    /// Most recently updated run.
    pub fn latest(&self) -> Result<Option<Run>, RunStoreError> {
        let data: Option<String> = self
            .db
            .query_row(
                "SELECT data FROM runs ORDER BY updated_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(RunStoreError::from))
            .transpose()
    }

    /// List recent runs, most recently updated first.
    pub fn list(&self, limit: usize) -> Result<Vec<RunSummary>, RunStoreError> {
        let mut stmt = self.db.prepare(
            r"
            SELECT id, program_id, level, next_stage, updated_at
            FROM runs
            ORDER BY updated_at DESC, rowid DESC
            LIMIT ?1
            ",
        )?;

        let summaries: Result<Vec<RunSummary>, RunStoreError> = stmt
            .query_map(params![limit as i64], |row| {
                let id: String = row.get(0)?;
                let program_id: Option<String> = row.get(1)?;
                let level: Option<String> = row.get(2)?;
                let next_stage: Option<String> = row.get(3)?;
                let updated_at: i64 = row.get(4)?;
                Ok((id, program_id, level, next_stage, updated_at))
            })?
            .map(|r| {
                let (id, program_id, level, next_stage, updated_at) = r?;
                let level = level
                    .map(|l| {
                        OptimizationLevel::from_id(&l)
                            .ok_or_else(|| RunStoreError::InvalidData(format!("Unknown level: {l}")))
                    })
                    .transpose()?;
                let next_stage = next_stage.map(|s| parse_stage(&s)).transpose()?;
                Ok(RunSummary {
                    id,
                    program_id,
                    level,
                    next_stage,
                    updated_at: from_millis(updated_at)?,
                })
            })
            .collect();

        summaries
    }

    /// Stage history of a run, oldest first.
    pub fn history(&self, run_id: &str) -> Result<Vec<StageRecord>, RunStoreError> {
        let mut stmt = self.db.prepare(
            r"
            SELECT stage, model, input_tokens, output_tokens, finished_at
            FROM stage_history
            WHERE run_id = ?1
            ORDER BY id
            ",
        )?;

        let records: Result<Vec<StageRecord>, RunStoreError> = stmt
            .query_map(params![run_id], |row| {
                let stage: String = row.get(0)?;
                let model: String = row.get(1)?;
                let input_tokens: u32 = row.get(2)?;
                let output_tokens: u32 = row.get(3)?;
                let finished_at: i64 = row.get(4)?;
                Ok((stage, model, input_tokens, output_tokens, finished_at))
            })?
            .map(|r| {
                let (stage, model, input_tokens, output_tokens, finished_at) = r?;
                Ok(StageRecord {
                    stage: parse_stage(&stage)?,
                    model,
                    usage: Usage {
                        input_tokens,
                        output_tokens,
                    },
                    finished_at: from_millis(finished_at)?,
                })
            })
            .collect();

        records
    }

    /// Delete a run and its history.
    pub fn delete(&self, id: &str) -> Result<(), RunStoreError> {
        let affected = self
            .db
            .execute("DELETE FROM runs WHERE id = ?1", params![id])?;

        if affected == 0 {
            return Err(RunStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn parse_stage(s: &str) -> Result<Stage, RunStoreError> {
    Stage::from_id(s).ok_or_else(|| RunStoreError::InvalidData(format!("Unknown stage: {s}")))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, RunStoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| RunStoreError::InvalidData(format!("Invalid timestamp: {ms}")))
}
