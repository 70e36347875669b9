//! Downloadable artifacts of a run.

use crate::pipeline::{OptimizationLevel, Run};
use docx_rs::{BreakType, Docx, Paragraph, Run as TextRun, Style, StyleType};
use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

pub const BRD_FILE: &str = "Generated_BRD.md";
pub const BRD_DOCX_FILE: &str = "Generated_BRD.docx";
pub const JAVA_FILE: &str = "COBOL_to_Java_Implementation.java";
pub const ENTERPRISE_JAVA_FILE: &str = "Enterprise_Java_Implementation.java";
pub const ORIGINAL_JAVA_FILE: &str = "Original_Java_Implementation.java";
pub const EVALUATION_FILE: &str = "Java_Evaluation_Report.md";

const BRD_TITLE: &str = "Business Requirements Document (BRD)";
const BRD_HEADING: &str = "# Business Requirements Document (BRD)";
const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Brd,
    /// The BRD as a Word document.
    BrdDocx,
    /// Latest Java.
    Java,
    Evaluation,
    /// Java as first generated.
    Original,
}

impl Artifact {
    pub const ALL: [Artifact; 5] = [
        Artifact::Brd,
        Artifact::BrdDocx,
        Artifact::Java,
        Artifact::Evaluation,
        Artifact::Original,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Artifact::Brd => "brd",
            Artifact::BrdDocx => "brd-docx",
            Artifact::Java => "java",
            Artifact::Evaluation => "evaluation",
            Artifact::Original => "original",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "brd" => Some(Artifact::Brd),
            "brd-docx" => Some(Artifact::BrdDocx),
            "java" => Some(Artifact::Java),
            "evaluation" => Some(Artifact::Evaluation),
            "original" => Some(Artifact::Original),
            _ => None,
        }
    }
}

/// A rendered artifact ready to be written or served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: &'static str,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

impl ExportFile {
    fn text(file_name: &'static str, content_type: &'static str, content: String) -> Self {
        Self {
            file_name,
            content_type,
            content: content.into_bytes(),
        }
    }
}

/// Whether the run has produced the source of an artifact.
pub fn is_available(run: &Run, artifact: Artifact) -> bool {
    match artifact {
        Artifact::Brd | Artifact::BrdDocx => run.brd.is_some(),
        Artifact::Java => run.java.is_some(),
        Artifact::Evaluation => run.evaluation.is_some(),
        Artifact::Original => run.java_original.is_some(),
    }
}

/// Render one artifact. `Ok(None)` if the run has not produced it yet.
pub fn render(run: &Run, artifact: Artifact) -> io::Result<Option<ExportFile>> {
    let file = match artifact {
        Artifact::Brd => run.brd.as_deref().map(|brd| {
            ExportFile::text(BRD_FILE, "text/markdown; charset=utf-8", brd_document(brd))
        }),
        Artifact::BrdDocx => match run.brd.as_deref() {
            Some(brd) => Some(ExportFile {
                file_name: BRD_DOCX_FILE,
                content_type: DOCX_CONTENT_TYPE,
                content: brd_docx(brd)?,
            }),
            None => None,
        },
        Artifact::Java => run.java.as_deref().map(|java| {
            ExportFile::text(
                java_file_name(run.level),
                "text/x-java-source; charset=utf-8",
                extract_java(java),
            )
        }),
        Artifact::Evaluation => run.evaluation.as_deref().map(|report| {
            ExportFile::text(
                EVALUATION_FILE,
                "text/markdown; charset=utf-8",
                ensure_newline(report.trim().to_string()),
            )
        }),
        Artifact::Original => run.java_original.as_deref().map(|java| {
            ExportFile::text(
                ORIGINAL_JAVA_FILE,
                "text/x-java-source; charset=utf-8",
                extract_java(java),
            )
        }),
    };
    Ok(file)
}

pub fn java_file_name(level: Option<OptimizationLevel>) -> &'static str {
    match level {
        Some(OptimizationLevel::Enterprise) => ENTERPRISE_JAVA_FILE,
        _ => JAVA_FILE,
    }
}

/// The BRD as a standalone Markdown document.
pub fn brd_document(brd: &str) -> String {
    let body = brd.trim();
    if body.starts_with(BRD_HEADING) {
        return ensure_newline(body.to_string());
    }
    format!("{BRD_HEADING}\n\n{body}\n")
}

/// The BRD as a Word document: a level-1 heading followed by the BRD
/// text in one paragraph, with its lines kept as line breaks.
pub fn brd_docx(brd: &str) -> io::Result<Vec<u8>> {
    let heading_style = Style::new("Heading1", StyleType::Paragraph)
        .name("Heading 1")
        .size(32)
        .bold();

    let mut body = TextRun::new();
    for (i, line) in brd.trim().lines().enumerate() {
        if i > 0 {
            body = body.add_break(BreakType::TextWrapping);
        }
        body = body.add_text(line);
    }

    let mut buffer = Cursor::new(Vec::new());
    Docx::new()
        .add_style(heading_style)
        .add_paragraph(
            Paragraph::new()
                .style("Heading1")
                .add_run(TextRun::new().add_text(BRD_TITLE)),
        )
        .add_paragraph(Paragraph::new().add_run(body))
        .build()
        .pack(&mut buffer)
        .map_err(io::Error::other)?;
    Ok(buffer.into_inner())
}

/// Java source from a model answer: every fenced `java` block, in order.
/// Answers without such blocks are taken to be bare code.
pub fn extract_java(text: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                let lang = lang.split_whitespace().next().unwrap_or("");
                if lang.eq_ignore_ascii_case("java") {
                    current = Some(String::new());
                }
            }
            Event::Text(t) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&t);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(buf) = current.take() {
                    let code = buf.trim_end();
                    if !code.is_empty() {
                        blocks.push(code.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if blocks.is_empty() {
        return ensure_newline(text.trim().to_string());
    }
    ensure_newline(blocks.join("\n\n"))
}

fn ensure_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

/// Write every available artifact into `dir`, returning the written paths.
pub fn export_run(run: &Run, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for artifact in Artifact::ALL {
        let Some(file) = render(run, artifact)? else {
            continue;
        };
        // Before optimization, latest and original are the same file content.
        if artifact == Artifact::Original && run.level == Some(OptimizationLevel::Basic) {
            continue;
        }
        let path = dir.join(file.file_name);
        std::fs::write(&path, file.content)?;
        tracing::debug!(path = %path.display(), "exported artifact");
        written.push(path);
    }
    Ok(written)
}
