//! Conversation reports
//!
//! A [`ConversationReport`] is the artifact consumed by test suites and CI:
//! field names and nesting are stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::agents::AgentRole;
use crate::error::Result;
use crate::metrics::MetricScores;
use crate::reference::Region;

/// Metrics attached to one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepMetrics {
    /// The four quality scores
    Scored(MetricScores),
    /// `{"failed": true}`
    Failed { failed: bool },
    /// `{"note": "..."}` for steps that are recorded but not scored
    Note { note: String },
}

impl StepMetrics {
    pub fn failed() -> Self {
        StepMetrics::Failed { failed: true }
    }

    pub fn note(note: impl Into<String>) -> Self {
        StepMetrics::Note { note: note.into() }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepMetrics::Failed { failed: true })
    }

    pub fn scores(&self) -> Option<&MetricScores> {
        match self {
            StepMetrics::Scored(scores) => Some(scores),
            _ => None,
        }
    }
}

/// One agent invocation within a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub agent: AgentRole,

    /// Model text, or the error description when the step failed
    pub output: String,

    pub metrics: StepMetrics,

    /// Detected region; only the KPI step sets this
    pub region: Option<Region>,

    /// 1-based position in the conversation
    pub step: usize,

    /// Output is a gateway placeholder rather than model text
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,

    pub duration_ms: u64,
}

impl StepRecord {
    /// Create a record; `step` is assigned when it is added to a report
    pub fn new(agent: AgentRole, output: impl Into<String>, metrics: StepMetrics) -> Self {
        Self {
            agent,
            output: output.into(),
            metrics,
            region: None,
            step: 0,
            degraded: false,
            duration_ms: 0,
        }
    }

    /// Create a failed record
    pub fn failure(agent: AgentRole, error: impl Into<String>) -> Self {
        Self::new(agent, error, StepMetrics::failed())
    }

    pub fn with_region(mut self, region: Option<Region>) -> Self {
        self.region = region;
        self
    }

    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.metrics.is_failed()
    }
}

/// Pass/fail counts for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
}

impl Summary {
    /// Steps without a failed marker count as passed
    pub fn from_steps(steps: &[StepRecord]) -> Self {
        let total = steps.len();
        let passed = steps.iter().filter(|s| !s.is_failed()).count();
        Self {
            total,
            passed,
            pass_rate: passed as f64 / total.max(1) as f64,
        }
    }
}

/// Result of one full conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,

    /// The caller's query, verbatim
    pub query: String,

    /// Raw router output; `None` when routing failed
    pub classification: Option<String>,

    /// Steps in execution order
    pub steps: Vec<StepRecord>,

    pub summary: Summary,
}

impl ConversationReport {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            query: query.into(),
            classification: None,
            steps: Vec::new(),
            summary: Summary::from_steps(&[]),
        }
    }

    /// Append a step, numbering it and refreshing the summary
    pub fn add_step(&mut self, mut step: StepRecord) {
        step.step = self.steps.len() + 1;
        self.steps.push(step);
        self.summary = Summary::from_steps(&self.steps);
    }

    /// First step recorded for `agent`
    pub fn step_for(&self, agent: AgentRole) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.agent == agent)
    }

    /// Region detected by the KPI step
    pub fn region(&self) -> Option<Region> {
        self.step_for(AgentRole::Kpi).and_then(|s| s.region)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        tracing::info!(path = %path.display(), run_id = %self.run_id, "Report written");
        Ok(())
    }

    /// Human-readable summary
    pub fn to_summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Conversation: {}", self.run_id));
        lines.push(format!("Query: {}", self.query));
        lines.push(format!(
            "Classification: {}",
            self.classification.as_deref().unwrap_or("-")
        ));
        lines.push(String::new());

        for step in &self.steps {
            let detail = match &step.metrics {
                StepMetrics::Scored(s) => format!(
                    "factual={:.2} relevance={:.2} hallucination={:.2} correctness={:.2}",
                    s.factual, s.relevance, s.hallucination, s.correctness
                ),
                StepMetrics::Failed { .. } => format!("FAILED: {}", step.output),
                StepMetrics::Note { note } => note.clone(),
            };
            let region = step
                .region
                .map(|r| format!(" [{}]", r))
                .unwrap_or_default();
            let degraded = if step.degraded { " (degraded)" } else { "" };
            lines.push(format!(
                "  {}. {:<10}{}{} {}",
                step.step,
                step.agent.name(),
                region,
                degraded,
                detail
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "Passed: {}/{} ({:.0}%) in {}ms",
            self.summary.passed,
            self.summary.total,
            self.summary.pass_rate * 100.0,
            self.total_duration_ms()
        ));

        lines.join("\n")
    }
}
