//! Migration run state.

use crate::cobol::{CobolSource, Glossary};
use crate::provider::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Brd,
    Convert,
    Optimize,
    Refine,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Brd, Stage::Convert, Stage::Optimize, Stage::Refine];

    pub fn id(&self) -> &'static str {
        match self {
            Stage::Brd => "brd",
            Stage::Convert => "convert",
            Stage::Optimize => "optimize",
            Stage::Refine => "refine",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Human label, as shown on progress output.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Brd => "Generate BRD",
            Stage::Convert => "Generate Java code from BRD",
            Stage::Optimize => "Evaluate & optimize Java code",
            Stage::Refine => "Apply enterprise-grade refinements",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// How far the Java has been taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// First generation, roughly 60% complete.
    Basic,
    /// Improved from evaluation feedback, roughly 75% complete.
    Optimized,
    /// Production-ready refinement.
    Enterprise,
}

impl OptimizationLevel {
    pub fn id(&self) -> &'static str {
        match self {
            OptimizationLevel::Basic => "basic",
            OptimizationLevel::Optimized => "optimized",
            OptimizationLevel::Enterprise => "enterprise",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "basic" => Some(OptimizationLevel::Basic),
            "optimized" => Some(OptimizationLevel::Optimized),
            "enterprise" => Some(OptimizationLevel::Enterprise),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OptimizationLevel::Basic => "Initial Java code generation (~60% complete)",
            OptimizationLevel::Optimized => "Improved with evaluation feedback (~75% complete)",
            OptimizationLevel::Enterprise => "Production-ready implementation (~100% complete)",
        }
    }
}

/// Everything a migration has produced so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cobol: String,
    #[serde(default)]
    pub glossary: String,
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub brd: Option<String>,
    /// Java as first generated; later stages never modify it.
    #[serde(default)]
    pub java_original: Option<String>,
    /// Latest Java.
    #[serde(default)]
    pub java: Option<String>,
    #[serde(default)]
    pub evaluation: Option<String>,
    #[serde(default)]
    pub optimized_java: Option<String>,
    #[serde(default)]
    pub enterprise_java: Option<String>,
    #[serde(default)]
    pub level: Option<OptimizationLevel>,
    #[serde(default)]
    pub usage: Usage,
}

impl Run {
    pub fn new(cobol: impl Into<String>, glossary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            cobol: cobol.into(),
            glossary: glossary.into(),
            analysis: None,
            brd: None,
            java_original: None,
            java: None,
            evaluation: None,
            optimized_java: None,
            enterprise_java: None,
            level: None,
            usage: Usage::default(),
        }
    }

    pub fn source(&self) -> CobolSource {
        CobolSource::inspect(&self.cobol)
    }

    pub fn glossary(&self) -> Glossary {
        Glossary::parse(&self.glossary)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether a stage's output is present.
    pub fn is_done(&self, stage: Stage) -> bool {
        match stage {
            Stage::Brd => self.brd.is_some(),
            Stage::Convert => self.java_original.is_some(),
            Stage::Optimize => self.optimized_java.is_some(),
            Stage::Refine => self.enterprise_java.is_some(),
        }
    }

    /// First stage that hasn't produced output yet.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| !self.is_done(*s))
    }

    /// Drop everything produced by `stage` and the stages after it.
    pub fn reset_from(&mut self, stage: Stage) {
        if stage <= Stage::Brd {
            self.analysis = None;
            self.brd = None;
        }
        if stage <= Stage::Convert {
            self.java_original = None;
            self.java = None;
            self.level = None;
        }
        if stage <= Stage::Optimize {
            self.evaluation = None;
            self.optimized_java = None;
            if self.java_original.is_some() {
                self.java = self.java_original.clone();
                self.level = Some(OptimizationLevel::Basic);
            }
        }
        if stage <= Stage::Refine {
            self.enterprise_java = None;
            if self.optimized_java.is_some() {
                self.java = self.optimized_java.clone();
                self.level = Some(OptimizationLevel::Optimized);
            }
        }
    }

    /// Short title for listings.
    pub fn title(&self) -> String {
        self.source()
            .program_id
            .unwrap_or_else(|| "unnamed program".to_string())
    }
}
