//! Prompt templates.
//!
//! Built-in templates are compiled in; a user directory can override any of
//! them by providing `<name>.j2`. Rendering is strict: a template that
//! references a variable the caller didn't supply fails instead of
//! silently rendering an empty string.

use minijinja::{Environment, UndefinedBehavior, Value};
use std::path::Path;
use thiserror::Error;

/// Template names, in the order the pipeline uses them.
pub const TEMPLATES: &[(&str, &str)] = &[
    ("agent_system", include_str!("templates/agent_system.j2")),
    ("task", include_str!("templates/task.j2")),
    ("cobol_analysis", include_str!("templates/cobol_analysis.j2")),
    ("brd", include_str!("templates/brd.j2")),
    ("java_generation", include_str!("templates/java_generation.j2")),
    ("evaluation", include_str!("templates/evaluation.j2")),
    ("optimization", include_str!("templates/optimization.j2")),
    ("refinement", include_str!("templates/refinement.j2")),
];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompt override {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Prompt template error: {0}")]
    Template(#[from] minijinja::Error),
}

pub struct PromptLibrary {
    env: Environment<'static>,
    overridden: Vec<String>,
}

impl std::fmt::Debug for PromptLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptLibrary")
            .field("overridden", &self.overridden)
            .finish()
    }
}

impl PromptLibrary {
    /// Built-in templates only.
    pub fn builtin() -> Result<Self, PromptError> {
        Self::new(None)
    }

    /// Built-in templates, with any `<name>.j2` found in `override_dir`
    /// replacing the built-in of the same name.
    pub fn new(override_dir: Option<&Path>) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let mut overridden = Vec::new();
        for &(name, source) in TEMPLATES {
            let custom = match override_dir {
                Some(dir) => read_override(&dir.join(format!("{name}.j2")))?,
                None => None,
            };
            match custom {
                Some(content) => {
                    tracing::info!(template = name, "using prompt override");
                    env.add_template_owned(name.to_string(), content)?;
                    overridden.push(name.to_string());
                }
                None => env.add_template(name, source)?,
            }
        }

        Ok(Self { env, overridden })
    }

    /// Names of templates replaced from the override directory.
    pub fn overridden(&self) -> &[String] {
        &self.overridden
    }

    /// Render a template with the given context.
    pub fn render(&self, name: &str, ctx: Value) -> Result<String, PromptError> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }
}

fn read_override(path: &Path) -> Result<Option<String>, PromptError> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|source| PromptError::Io {
            path: path.display().to_string(),
            source,
        })
}
