//! Prompt templates for pipeline agents
//!
//! Templates use `{{variable}}` placeholders. A [`PromptClient`] resolves a
//! template name against, in order: templates registered at runtime, a
//! directory of `<name>.txt` files, and the built-in defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{EvalFlowError, Result};

/// A named prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Template name
    pub name: String,
    /// Template content with {{variable}} placeholders
    pub template: String,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Render the template with variable substitution.
    ///
    /// Values are inserted verbatim; placeholders without a value are left as-is.
    pub fn render(&self, variables: &[(&str, &str)]) -> String {
        let mut result = self.template.clone();
        for (key, value) in variables {
            let placeholder = format!("{{{{{}}}}}", key);
            result = result.replace(&placeholder, value);
        }
        result
    }
}

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "router_prompt",
        "You are a routing assistant for a retail analytics system. Classify the user query \
into exactly one of: KPI, DIAGNOSTIC, SIMULATION, INSIGHT, DASHBOARD, MEMORY. \
Reply with the label only.\nUser Query: {{query}}\nReply:",
    ),
    (
        "kpi_prompt",
        "You are a KPI analyst. Report the requested sales KPIs concisely with the region, \
sales and growth figures.\nQuery: {{query}}",
    ),
    (
        "diagnostic_prompt",
        "You are a diagnostic analyst. Explain the primary cause and the secondary \
contributors of the issue below.\nIssue: {{query}}",
    ),
    (
        "simulation_prompt",
        "You are a what-if simulation engine. State your assumptions, then the projected \
impact of the scenario below.\nScenario: {{query}}",
    ),
    (
        "insight_prompt",
        "You are an insight generator. For each insight give the pattern, the reason, \
the impact and a recommended action.\nInsightRequest: {{query}}",
    ),
    (
        "dashboard_prompt",
        "You render text dashboards. For each KPI output one line formatted as \
KPI_NAME: VALUE TREND: up/down CONFIDENCE.\nDashboardName: {{query}}",
    ),
    (
        "memory_prompt",
        "You are a memory assistant. Restate the retrieved context below as a short summary.\
\nRetrieved: {{query}}",
    ),
    (
        "persona_prompt",
        "You are a retail analytics assistant adapting your tone to the user's role. \
Answer the request below.\nRequest: {{query}}",
    ),
];

/// Resolves and renders named prompt templates
#[derive(Debug, Clone)]
pub struct PromptClient {
    templates: HashMap<String, PromptTemplate>,
    dir: Option<PathBuf>,
    builtins: bool,
}

impl Default for PromptClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptClient {
    /// Client backed by the built-in templates only
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            dir: None,
            builtins: true,
        }
    }

    /// Client with no templates at all; every lookup misses until templates are added
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
            dir: None,
            builtins: false,
        }
    }

    /// Look up `<name>.txt` files in `dir` before falling back to built-ins
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Register a template, overriding any file or built-in of the same name
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.templates.insert(template.name.clone(), template);
        self
    }

    /// Resolve a template by name.
    ///
    /// A trailing `.txt` on the name is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EvalFlowError::TemplateNotFound`] if no source has the template,
    /// or an IO error if the template file exists but cannot be read.
    pub fn template(&self, name: &str) -> Result<PromptTemplate> {
        let name = name.strip_suffix(".txt").unwrap_or(name);

        if let Some(template) = self.templates.get(name) {
            return Ok(template.clone());
        }

        if let Some(dir) = &self.dir {
            if let Some(template) = load_from_dir(dir, name)? {
                return Ok(template);
            }
        }

        if self.builtins {
            if let Some((_, text)) = BUILTIN_TEMPLATES.iter().find(|(n, _)| *n == name) {
                return Ok(PromptTemplate::new(name, *text));
            }
        }

        Err(EvalFlowError::TemplateNotFound(name.to_string()))
    }

    /// Resolve and render a template
    pub fn render(&self, name: &str, variables: &[(&str, &str)]) -> Result<String> {
        let prompt = self.template(name)?.render(variables);
        tracing::debug!(template = name, chars = prompt.chars().count(), "Rendered prompt");
        Ok(prompt)
    }
}

fn load_from_dir(dir: &Path, name: &str) -> Result<Option<PromptTemplate>> {
    let path = dir.join(format!("{}.txt", name));
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(PromptTemplate::new(name, text))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
