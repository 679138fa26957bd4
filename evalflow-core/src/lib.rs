//! # Evalflow - End-to-end evaluation for multi-agent LLM pipelines
//!
//! Evalflow drives a fixed pipeline of retail-analytics agents for one user
//! query and scores every answer:
//! - Routing, KPI, diagnostic, simulation, insight, dashboard and memory agents
//! - Ground-truth assertions against a static reference dataset
//! - Four quality metrics per step (factual, relevance, hallucination, correctness)
//! - Per-step failure isolation, so a report is always produced
//! - Quality gates over single reports and repeated runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use evalflow_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = EvalFlowConfig::load()?;
//!     let orchestrator = PipelineOrchestrator::from_config(&config)?;
//!
//!     let report = orchestrator.run_full_conversation("Show me UK sales").await;
//!     println!("{}", report.to_summary());
//!
//!     let outcome = evaluate_report(&report, &config.thresholds);
//!     println!("gates passed: {}", outcome.passed);
//!     Ok(())
//! }
//! ```
//!
//! ## Model access
//!
//! The [`llm::ModelGateway`] never fails outward. Without credentials, or when
//! the provider errors, it returns placeholder text tagged `[MOCKED_RESPONSE]`
//! and marks the response as degraded. The orchestrator then applies the
//! configured [`config::DegradedPolicy`].

pub mod agents;
pub mod assertion;
pub mod config;
pub mod error;
pub mod gate;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod reference;
pub mod report;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agents::{Agent, AgentRole, AgentSet, MemoryAgent, NOT_FOUND, PromptAgent};
    pub use crate::assertion::{AssertionEngine, KpiAssertion, NO_GROUND_TRUTH, detect_region};
    pub use crate::config::{
        DegradedPolicy, EvalFlowConfig, EvaluatorKind, GatewayConfig, MemoryScope,
        ThresholdConfig,
    };
    pub use crate::error::{EvalFlowError, Result};
    pub use crate::gate::{
        Bound, GateOutcome, GateViolation, Threshold, check_run_variance, check_thresholds,
        default_gates, evaluate_report, metric_spread, run_variance,
    };
    pub use crate::llm::{
        GeminiProvider, Generation, LLMProvider, LLMRequest, LLMResponse, ModelGateway,
        RetryConfig,
    };
    pub use crate::memory::MemoryStore;
    pub use crate::metrics::{
        HeuristicEvaluator, JudgeEvaluator, MetricEvaluator, MetricKind, MetricScores,
        evaluator_from_config,
    };
    pub use crate::orchestrator::{PipelineOrchestrator, PipelineOrchestratorBuilder};
    pub use crate::prompts::{PromptClient, PromptTemplate};
    pub use crate::reference::{ReferenceRow, ReferenceStore, Region};
    pub use crate::report::{ConversationReport, StepMetrics, StepRecord, Summary};
}
