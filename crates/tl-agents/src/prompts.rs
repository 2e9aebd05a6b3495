//! Prompt templates rendered against a compiled context bundle.
//!
//! Templates are Handlebars, registered from three places in order (later
//! registrations replace earlier ones with the same name):
//! built-in defaults, `[templates]` in the pipeline config, and `*.hbs`
//! files in `templates_dir`. Rendering runs in strict mode so a template
//! referencing a field the bundle does not have fails loudly and the router
//! falls back to the generic prompt.

use std::path::Path;

use handlebars::Handlebars;
use serde_json::Value;
use tracing::{debug, warn};

use tl_core::config::PipelineConfig;
use tl_core::text::truncate_chars;
use tl_core::types::Task;
use tl_intelligence::context_compiler::ContextBundle;
use tl_intelligence::manifest::ManifestContent;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
    #[error("template '{name}' failed to render: {message}")]
    Render { name: String, message: String },
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

const SHARED_CONTEXT: &str = r#"{{#if board}}
Project: {{board.name}}
{{/if}}
{{#if manifest_text}}

## Project manifest
{{manifest_text}}
{{/if}}
{{#if dependencies}}

## Dependencies
{{#each dependencies}}
- {{this.name}} ({{this.status}})
{{/each}}
{{/if}}
{{#if retrieval}}

## Related material
{{#each retrieval}}
- [{{this.source}}] {{this.content}}
{{/each}}
{{/if}}
{{#if recent_siblings}}

## Recently completed on this board
{{#each recent_siblings}}
- {{this.name}}{{#if this.model}} ({{this.model}}){{/if}}
{{/each}}
{{/if}}
{{#if task.acceptance_criteria}}

## Acceptance criteria
{{task.acceptance_criteria}}
{{/if}}
{{#if task.validation_command}}

## Validation
Run `{{task.validation_command}}` before reporting back and include its output.
{{/if}}"#;

const BUG_FIX: &str = r#"You are fixing a bug.

## Bug
{{task.name}}

{{task.description}}

Reproduce the problem first, fix the root cause, and add a regression test.
"#;

const FEATURE: &str = r#"You are implementing a feature.

## Feature
{{task.name}}

{{task.description}}

Keep the change focused, follow the existing conventions of the codebase, and cover the new behaviour with tests.
"#;

const RESEARCH: &str = r#"You are researching a question. Do not change code.

## Question
{{task.name}}

{{task.description}}

Report findings as a short summary followed by the evidence, and link every source you relied on.
"#;

const PLANNING: &str = r#"You are planning work, not doing it.

## Goal
{{task.name}}

{{task.description}}

Break the goal into independently shippable tasks. For each, give a one-line name, the acceptance criteria, and its dependencies.
"#;

fn builtin_templates() -> [(&'static str, String); 4] {
    [
        ("bug_fix", format!("{BUG_FIX}{SHARED_CONTEXT}")),
        ("feature", format!("{FEATURE}{SHARED_CONTEXT}")),
        ("research", format!("{RESEARCH}{SHARED_CONTEXT}")),
        ("planning", format!("{PLANNING}{SHARED_CONTEXT}")),
    ]
}

// ---------------------------------------------------------------------------
// PromptRegistry
// ---------------------------------------------------------------------------

pub struct PromptRegistry {
    engine: Handlebars<'static>,
}

impl std::fmt::Debug for PromptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRegistry")
            .field("templates", &self.names())
            .finish()
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    /// Registry holding only the built-in templates.
    pub fn new() -> Self {
        let mut engine = Handlebars::new();
        engine.set_strict_mode(true);
        engine.register_escape_fn(handlebars::no_escape);
        let mut registry = Self { engine };
        for (name, source) in builtin_templates() {
            registry.register(name, &source);
        }
        registry
    }

    /// Built-ins plus config inline templates plus `templates_dir/*.hbs`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut registry = Self::new();
        for (name, source) in &config.templates {
            registry.register(name, source);
        }
        if let Some(dir) = &config.templates_dir {
            registry.load_dir(dir);
        }
        registry
    }

    /// Register a template, logging and skipping it if it does not parse.
    pub fn register(&mut self, name: &str, source: &str) -> bool {
        match self.engine.register_template_string(name, source) {
            Ok(()) => true,
            Err(e) => {
                warn!(template = name, error = %e, "prompt template does not parse; skipped");
                false
            }
        }
    }

    /// Load every `*.hbs` file in `dir`, named by file stem.
    pub fn load_dir(&mut self, dir: &Path) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read templates_dir");
                return 0;
            }
        };
        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("hbs") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    if self.register(name, &source) {
                        loaded += 1;
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "cannot read template"),
            }
        }
        debug!(dir = %dir.display(), loaded, "prompt templates loaded");
        loaded
    }

    pub fn has(&self, name: &str) -> bool {
        self.engine.has_template(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engine.get_templates().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn render(&self, name: &str, bundle: &ContextBundle) -> Result<String, PromptError> {
        if !self.has(name) {
            return Err(PromptError::UnknownTemplate(name.to_string()));
        }
        self.engine
            .render(name, &render_data(bundle))
            .map_err(|e| PromptError::Render {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

/// The serialized bundle plus a flattened `manifest_text` for templates.
fn render_data(bundle: &ContextBundle) -> Value {
    let mut data = bundle.to_value();
    let manifest_text = bundle.manifest.as_ref().map(|m| match &m.content {
        ManifestContent::Structured { data } => {
            serde_json::to_string_pretty(data).unwrap_or_default()
        }
        ManifestContent::Text { text, .. } => text.clone(),
    });
    if let Some(obj) = data.as_object_mut() {
        obj.insert(
            "manifest_text".to_string(),
            manifest_text.map(Value::String).unwrap_or(Value::Null),
        );
    }
    data
}

/// Prompt used when no template applies or rendering fails.
pub fn generic_prompt(task: &Task, description_limit: usize) -> String {
    let mut prompt = format!("Task: {}\n", task.name.trim());

    let description = task.description.as_deref().unwrap_or("").trim();
    if !description.is_empty() {
        prompt.push('\n');
        prompt.push_str(truncate_chars(description, description_limit));
        prompt.push('\n');
    }

    if let Some(criteria) = task.acceptance_criteria.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\nAcceptance criteria:\n");
        prompt.push_str(criteria.trim());
        prompt.push('\n');
    }

    match task.validation_command.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(cmd) => prompt.push_str(&format!(
            "\nWhen you are done, run `{}` from the project root and make sure it exits \
             successfully. Include its output in your report.\n",
            cmd.trim()
        )),
        None => prompt.push_str("\nWhen you are done, summarize what you changed and how you verified it.\n"),
    }
    prompt
}
