//! Quality gates over conversation reports
//!
//! Gates compare step metrics against thresholds, the spread of a metric
//! between agents of one report, and the drift of a metric for one agent
//! across repeated runs. Failed and note-only steps are never gated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::agents::AgentRole;
use crate::config::ThresholdConfig;
use crate::metrics::{MetricKind, MetricScores};
use crate::report::ConversationReport;

/// Direction of a threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    AtLeast(f64),
    AtMost(f64),
}

impl Bound {
    pub fn admits(&self, value: f64) -> bool {
        match self {
            Bound::AtLeast(min) => value >= *min,
            Bound::AtMost(max) => value <= *max,
        }
    }

    pub fn limit(&self) -> f64 {
        match self {
            Bound::AtLeast(v) | Bound::AtMost(v) => *v,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::AtLeast(v) => write!(f, ">= {:.2}", v),
            Bound::AtMost(v) => write!(f, "<= {:.2}", v),
        }
    }
}

/// A bound on one metric, optionally restricted to some agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub name: String,
    pub metric: MetricKind,
    pub bound: Bound,
    /// `None` applies to every scored step
    pub agents: Option<Vec<AgentRole>>,
}

impl Threshold {
    pub fn new(name: impl Into<String>, metric: MetricKind, bound: Bound) -> Self {
        Self {
            name: name.into(),
            metric,
            bound,
            agents: None,
        }
    }

    pub fn for_agents(mut self, agents: impl IntoIterator<Item = AgentRole>) -> Self {
        self.agents = Some(agents.into_iter().collect());
        self
    }

    fn applies_to(&self, agent: AgentRole) -> bool {
        self.agents.as_ref().is_none_or(|agents| agents.contains(&agent))
    }
}

/// One broken gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateViolation {
    pub gate: String,
    /// Offending agent; `None` for report-wide gates
    pub agent: Option<AgentRole>,
    pub metric: MetricKind,
    pub value: f64,
    pub bound: Bound,
}

impl fmt::Display for GateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.agent {
            Some(agent) => write!(
                f,
                "{}: {} {} = {:.3}, expected {}",
                self.gate, agent, self.metric, self.value, self.bound
            ),
            None => write!(
                f,
                "{}: {} = {:.3}, expected {}",
                self.gate, self.metric, self.value, self.bound
            ),
        }
    }
}

/// Result of gating one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub violations: Vec<GateViolation>,
    /// Max minus min of each metric across scored steps
    pub spread: BTreeMap<MetricKind, f64>,
    pub passed: bool,
}

/// Per-step thresholds built from configuration
pub fn default_gates(config: &ThresholdConfig) -> Vec<Threshold> {
    let generic = [
        AgentRole::Diagnostic,
        AgentRole::Simulation,
        AgentRole::Insight,
        AgentRole::Dashboard,
    ];

    vec![
        Threshold::new("kpi_factual", MetricKind::Factual, Bound::AtLeast(config.kpi_factual))
            .for_agents([AgentRole::Kpi]),
        Threshold::new(
            "kpi_hallucination",
            MetricKind::Hallucination,
            Bound::AtMost(config.kpi_hallucination),
        )
        .for_agents([AgentRole::Kpi]),
        Threshold::new(
            "generic_factual",
            MetricKind::Factual,
            Bound::AtLeast(config.generic_factual),
        )
        .for_agents(generic),
        Threshold::new(
            "generic_hallucination",
            MetricKind::Hallucination,
            Bound::AtMost(config.generic_hallucination),
        )
        .for_agents(generic),
    ]
}

fn scored_steps(report: &ConversationReport) -> impl Iterator<Item = (AgentRole, &MetricScores)> {
    report
        .steps
        .iter()
        .filter_map(|step| step.metrics.scores().map(|scores| (step.agent, scores)))
}

/// Check every scored step against `thresholds`
pub fn check_thresholds(
    report: &ConversationReport,
    thresholds: &[Threshold],
) -> Vec<GateViolation> {
    let mut violations = Vec::new();

    for (agent, scores) in scored_steps(report) {
        for threshold in thresholds.iter().filter(|t| t.applies_to(agent)) {
            let value = scores.get(threshold.metric);
            if !threshold.bound.admits(value) {
                violations.push(GateViolation {
                    gate: threshold.name.clone(),
                    agent: Some(agent),
                    metric: threshold.metric,
                    value,
                    bound: threshold.bound,
                });
            }
        }
    }

    violations
}

/// Max minus min of `metric` across scored steps; `None` without scored steps
pub fn metric_spread(report: &ConversationReport, metric: MetricKind) -> Option<f64> {
    spread(scored_steps(report).map(|(_, scores)| scores.get(metric)))
}

fn spread(values: impl Iterator<Item = f64>) -> Option<f64> {
    values
        .fold(None::<(f64, f64)>, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .map(|(lo, hi)| hi - lo)
}

/// Per agent, max minus min of `metric` across repeated runs.
///
/// Uses the first scored step of each agent in every report.
pub fn run_variance(
    reports: &[ConversationReport],
    metric: MetricKind,
) -> BTreeMap<AgentRole, f64> {
    let mut values: BTreeMap<AgentRole, Vec<f64>> = BTreeMap::new();

    for report in reports {
        let mut seen = Vec::new();
        for (agent, scores) in scored_steps(report) {
            if !seen.contains(&agent) {
                seen.push(agent);
                values.entry(agent).or_default().push(scores.get(metric));
            }
        }
    }

    values
        .into_iter()
        .filter_map(|(agent, v)| spread(v.into_iter()).map(|s| (agent, s)))
        .collect()
}

/// Run-to-run drift violations for every metric
pub fn check_run_variance(
    reports: &[ConversationReport],
    config: &ThresholdConfig,
) -> Vec<GateViolation> {
    let bound = Bound::AtMost(config.max_run_variance);
    let mut violations = Vec::new();

    for metric in MetricKind::ALL {
        for (agent, value) in run_variance(reports, metric) {
            if !bound.admits(value) {
                violations.push(GateViolation {
                    gate: "max_run_variance".to_string(),
                    agent: Some(agent),
                    metric,
                    value,
                    bound,
                });
            }
        }
    }

    violations
}

/// Apply the configured thresholds and the inter-agent spread limit
pub fn evaluate_report(report: &ConversationReport, config: &ThresholdConfig) -> GateOutcome {
    let mut violations = check_thresholds(report, &default_gates(config));
    let mut spreads = BTreeMap::new();
    let bound = Bound::AtMost(config.max_spread);

    for metric in MetricKind::ALL {
        if let Some(value) = metric_spread(report, metric) {
            spreads.insert(metric, value);
            if !bound.admits(value) {
                violations.push(GateViolation {
                    gate: "max_spread".to_string(),
                    agent: None,
                    metric,
                    value,
                    bound,
                });
            }
        }
    }

    if !violations.is_empty() {
        tracing::warn!(
            run_id = %report.run_id,
            violations = violations.len(),
            "Quality gates failed"
        );
    }

    GateOutcome {
        passed: violations.is_empty(),
        violations,
        spread: spreads,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{StepMetrics, StepRecord};

    fn report(steps: &[(AgentRole, StepMetrics)]) -> ConversationReport {
        let mut report = ConversationReport::new("q");
        for (agent, metrics) in steps {
            report.add_step(StepRecord::new(*agent, "out", metrics.clone()));
        }
        report
    }

    fn scores(factual: f64, hallucination: f64) -> StepMetrics {
        StepMetrics::Scored(MetricScores::new(factual, 0.5, hallucination, 0.5))
    }

    #[test]
    fn test_bound() {
        assert!(Bound::AtLeast(0.7).admits(0.7));
        assert!(!Bound::AtLeast(0.7).admits(0.69));
        assert!(Bound::AtMost(0.25).admits(0.25));
        assert!(!Bound::AtMost(0.25).admits(0.3));
    }

    #[test]
    fn test_thresholds_skip_failed_and_notes() {
        let report = report(&[
            (AgentRole::Router, StepMetrics::note("routing")),
            (AgentRole::Kpi, StepMetrics::failed()),
            (AgentRole::Diagnostic, scores(0.9, 0.0)),
        ]);
        let config = ThresholdConfig::default();
        assert!(check_thresholds(&report, &default_gates(&config)).is_empty());
    }

    #[test]
    fn test_kpi_gates_are_stricter() {
        let report = report(&[
            (AgentRole::Kpi, scores(0.65, 0.3)),
            (AgentRole::Diagnostic, scores(0.65, 0.3)),
        ]);
        let violations = check_thresholds(&report, &default_gates(&ThresholdConfig::default()));

        let gates: Vec<_> = violations.iter().map(|v| v.gate.as_str()).collect();
        assert_eq!(gates, ["kpi_factual", "kpi_hallucination"]);
        assert_eq!(violations[0].agent, Some(AgentRole::Kpi));
    }

    #[test]
    fn test_spread() {
        let report = report(&[
            (AgentRole::Kpi, scores(0.9, 0.0)),
            (AgentRole::Insight, scores(0.6, 0.1)),
            (AgentRole::Memory, StepMetrics::note("memory retrieval")),
        ]);
        let spread = metric_spread(&report, MetricKind::Factual).unwrap();
        assert!((spread - 0.3).abs() < 1e-12);

        let outcome = evaluate_report(&report, &ThresholdConfig::default());
        assert!(!outcome.passed);
        assert!(outcome.violations.iter().any(|v| v.gate == "max_spread" && v.agent.is_none()));
        assert_eq!(metric_spread(&ConversationReport::new("q"), MetricKind::Factual), None);
    }

    #[test]
    fn test_run_variance() {
        let runs = [
            report(&[
                (AgentRole::Kpi, scores(0.8, 0.0)),
                (AgentRole::Insight, scores(0.7, 0.0)),
            ]),
            report(&[
                (AgentRole::Kpi, scores(0.6, 0.0)),
                (AgentRole::Insight, StepMetrics::failed()),
            ]),
        ];

        let variance = run_variance(&runs, MetricKind::Factual);
        assert!((variance[&AgentRole::Kpi] - 0.2).abs() < 1e-12);
        assert_eq!(variance[&AgentRole::Insight], 0.0);

        let violations = check_run_variance(&runs, &ThresholdConfig::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].agent, Some(AgentRole::Kpi));
        assert_eq!(violations[0].metric, MetricKind::Factual);
    }

    #[test]
    fn test_clean_report_passes() {
        let report = report(&[
            (AgentRole::Kpi, scores(0.8, 0.1)),
            (AgentRole::Diagnostic, scores(0.7, 0.1)),
        ]);
        let outcome = evaluate_report(&report, &ThresholdConfig::default());
        assert!(outcome.passed, "{:?}", outcome.violations);
        assert_eq!(outcome.spread.len(), 4);
    }

    #[test]
    fn test_violation_display() {
        let v = GateViolation {
            gate: "kpi_factual".to_string(),
            agent: Some(AgentRole::Kpi),
            metric: MetricKind::Factual,
            value: 0.5,
            bound: Bound::AtLeast(0.7),
        };
        assert_eq!(v.to_string(), "kpi_factual: KPI factual = 0.500, expected >= 0.70");
    }
}
