//! Lightweight inspection of COBOL source and glossary input.
//!
//! Nothing here parses COBOL properly. The facts gathered are used to
//! reject empty input early, name the generated Java class and give the
//! agents a short orientation header.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::LazyLock;

static PROGRAM_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPROGRAM-ID\s*\.\s*([A-Z0-9][A-Z0-9-]*)").expect("valid regex")
});
static DIVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(IDENTIFICATION|ID|ENVIRONMENT|DATA|PROCEDURE)\s+DIVISION\b")
        .expect("valid regex")
});
static COPYBOOK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCOPY\s+([A-Z0-9][A-Z0-9-]*)").expect("valid regex"));
static COMP3: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(COMP-3|COMPUTATIONAL-3|PACKED-DECIMAL)\b").expect("valid regex"));

/// A COBOL program plus facts gathered from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CobolSource {
    pub text: String,
    pub program_id: Option<String>,
    pub divisions: Vec<String>,
    pub copybooks: Vec<String>,
    pub packed_decimal_fields: usize,
    pub code_lines: usize,
}

impl CobolSource {
    /// Inspect source text. Comment lines (indicator `*` or `/` in column 7)
    /// are skipped; inspection itself never fails.
    pub fn inspect(text: &str) -> Self {
        let mut divisions: Vec<String> = Vec::new();
        let mut copybooks: Vec<String> = Vec::new();
        let mut program_id = None;
        let mut packed_decimal_fields = 0;
        let mut code_lines = 0;

        for line in text.lines().filter(|l| !is_comment_line(l)) {
            if line.trim().is_empty() {
                continue;
            }
            code_lines += 1;

            if program_id.is_none()
                && let Some(caps) = PROGRAM_ID.captures(line)
            {
                program_id = Some(caps[1].to_uppercase());
            }
            for caps in DIVISION.captures_iter(line) {
                let name = match caps[1].to_uppercase().as_str() {
                    "ID" => "IDENTIFICATION".to_string(),
                    other => other.to_string(),
                };
                if !divisions.contains(&name) {
                    divisions.push(name);
                }
            }
            for caps in COPYBOOK.captures_iter(line) {
                let name = caps[1].to_uppercase();
                if !copybooks.contains(&name) {
                    copybooks.push(name);
                }
            }
            packed_decimal_fields += COMP3.find_iter(line).count();
        }

        Self {
            text: text.to_string(),
            program_id,
            divisions,
            copybooks,
            packed_decimal_fields,
            code_lines,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// One-paragraph orientation for prompts and logs.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "Program: {}; {} code lines",
            self.program_id.as_deref().unwrap_or("unnamed"),
            self.code_lines
        );
        if !self.divisions.is_empty() {
            let _ = write!(out, "; divisions: {}", self.divisions.join(", "));
        }
        if !self.copybooks.is_empty() {
            let _ = write!(out, "; copybooks: {}", self.copybooks.join(", "));
        }
        if self.packed_decimal_fields > 0 {
            let _ = write!(out, "; COMP-3 fields: {}", self.packed_decimal_fields);
        }
        out
    }

    /// Java class name derived from PROGRAM-ID.
    pub fn java_class_name(&self) -> Option<String> {
        self.program_id.as_deref().map(java_class_name)
    }
}

/// Fixed-format comment: indicator area (column 7) holds `*` or `/`.
/// Free-format `*>` comments are also recognised.
fn is_comment_line(line: &str) -> bool {
    if line.trim_start().starts_with("*>") {
        return true;
    }
    matches!(line.chars().nth(6), Some('*' | '/'))
}

/// `PAY-CALC01` → `PayCalc01`. Names that would start with a digit get a
/// `Cobol` prefix.
pub fn java_class_name(program_id: &str) -> String {
    let mut name: String = program_id
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let lower = part.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if name.is_empty() {
        return "CobolProgram".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Cobol");
    }
    name
}

/// A glossary entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub term: String,
    pub definition: String,
}

/// Business glossary: `TERM: definition` / `TERM - definition` lines plus
/// free-form notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Glossary {
    pub entries: Vec<GlossaryEntry>,
    pub notes: Vec<String>,
}

impl Glossary {
    pub fn parse(text: &str) -> Self {
        let mut glossary = Self::default();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let line = line.trim_start_matches(['-', '*', '•']).trim();
            let split = line
                .split_once(':')
                .or_else(|| line.split_once(" - "))
                .or_else(|| line.split_once(" = "));

            match split {
                Some((term, definition))
                    if !term.trim().is_empty() && !definition.trim().is_empty() =>
                {
                    glossary.entries.push(GlossaryEntry {
                        term: term.trim().to_string(),
                        definition: definition.trim().to_string(),
                    });
                }
                _ => glossary.notes.push(line.to_string()),
            }
        }

        glossary
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.notes.is_empty()
    }

    /// Canonical text form used in prompts.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("- {}: {}", e.term, e.definition))
            .collect();
        lines.extend(self.notes.iter().map(|n| format!("- {n}")));
        lines.join("\n")
    }
}
