//! Pipeline orchestration
//!
//! [`PipelineOrchestrator::run_full_conversation`] drives the fixed agent
//! sequence for one query:
//!
//! 1. Router (recorded as a `routing` note)
//! 2. KPI, scored against the reference dataset when a region is detected
//! 3. Diagnostic
//! 4. Simulation
//! 5. Insight
//! 6. Dashboard
//! 7. Memory retrieval of the KPI output (recorded as a note)
//!
//! Each step runs in isolation: an error or a panic becomes a
//! `{"failed": true}` record and the next step still runs, so a report is
//! always produced.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::agents::{Agent, AgentRole, AgentSet, MemoryAgent, PromptAgent};
use crate::assertion::{AssertionEngine, detect_region};
use crate::config::{DegradedPolicy, EvalFlowConfig, MemoryScope};
use crate::error::{EvalFlowError, Result};
use crate::llm::{Generation, ModelGateway};
use crate::memory::MemoryStore;
use crate::metrics::{HeuristicEvaluator, MetricEvaluator, evaluator_from_config};
use crate::prompts::PromptClient;
use crate::reference::{ReferenceStore, Region};
use crate::report::{ConversationReport, StepMetrics, StepRecord};

/// Memory key holding the latest KPI output
pub const LAST_KPI_KEY: &str = "last_kpi";

/// Ground truth when no region is detected
pub const KPI_FALLBACK_GROUND: &str = "KPI concise summary";

pub const DIAGNOSTIC_QUERY: &str = "Why did this happen?";
pub const DIAGNOSTIC_GROUND: &str = "Primary cause and secondary contributors";

pub const SIMULATION_QUERY: &str = "Simulate a 10% price increase on electronics";
pub const SIMULATION_GROUND: &str = "Assumptions + projected impact";

pub const INSIGHT_QUERY: &str = "Based on KPI and simulation, give top actions";
pub const INSIGHT_GROUND: &str = "pattern, reason, impact, action";

pub const DASHBOARD_NAME: &str = "sales_overview";
pub const DASHBOARD_SCORING_QUERY: &str = "dashboard_render";
pub const DASHBOARD_GROUND: &str = "KPI_NAME: VALUE TREND: up/down CONFIDENCE";

const ROUTING_NOTE: &str = "routing";
const MEMORY_NOTE: &str = "memory retrieval";

/// How a step's output is turned into metrics
enum Scoring {
    /// Evaluate the output for `query` against `ground`
    Evaluate { query: String, ground: String },
    /// Record a note instead of scores
    Note(&'static str),
}

/// What a step produced before scoring
struct StepPlan {
    generation: Generation,
    scoring: Scoring,
    region: Option<Region>,
}

impl StepPlan {
    fn scored(generation: Generation, query: impl Into<String>, ground: impl Into<String>) -> Self {
        Self {
            generation,
            scoring: Scoring::Evaluate {
                query: query.into(),
                ground: ground.into(),
            },
            region: None,
        }
    }

    fn noted(generation: Generation, note: &'static str) -> Self {
        Self {
            generation,
            scoring: Scoring::Note(note),
            region: None,
        }
    }
}

/// Runs full conversations through the agent pipeline
pub struct PipelineOrchestrator {
    agents: AgentSet,
    assertions: AssertionEngine,
    evaluator: Arc<dyn MetricEvaluator>,
    memory_scope: MemoryScope,
    degraded: DegradedPolicy,
    penalty: f64,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("agents", &self.agents)
            .field("memory_scope", &self.memory_scope)
            .field("degraded", &self.degraded)
            .field("penalty", &self.penalty)
            .finish()
    }
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineOrchestratorBuilder {
        PipelineOrchestratorBuilder::new()
    }

    /// Build an orchestrator from loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails when the reference dataset, the gateway or the evaluator cannot
    /// be set up.
    pub fn from_config(config: &EvalFlowConfig) -> Result<Self> {
        let mut prompts = PromptClient::new();
        if let Some(dir) = &config.prompts.dir {
            prompts = prompts.with_dir(dir);
        }

        let reference = match &config.reference.dataset {
            Some(path) => ReferenceStore::from_file(path)?,
            None => ReferenceStore::builtin(),
        };

        let evaluator = evaluator_from_config(&config.scoring, &config.gateway)?;
        tracing::info!(evaluator = evaluator.name(), "Scoring configured");

        let mut builder = Self::builder()
            .with_prompts(prompts)
            .with_gateway(ModelGateway::from_config(&config.gateway)?)
            .with_reference(reference)
            .with_evaluator(evaluator)
            .with_memory_scope(config.memory.scope)
            .with_degraded_policy(config.scoring.degraded, config.scoring.penalty);

        for role in AgentRole::PIPELINE {
            if let Some(model) = config.gateway.model_for(role) {
                builder = builder.with_agent_model(role, model);
            }
        }

        builder.build()
    }

    /// Memory store used by the orchestrator-scoped and shared scopes
    pub fn memory(&self) -> &MemoryStore {
        self.agents.memory.memory()
    }

    pub fn memory_scope(&self) -> MemoryScope {
        self.memory_scope
    }

    pub fn agents(&self) -> &AgentSet {
        &self.agents
    }

    /// Run every pipeline step for `query` and aggregate the report.
    ///
    /// Never fails: step errors are recorded in the report.
    pub async fn run_full_conversation(&self, query: &str) -> ConversationReport {
        let mut report = ConversationReport::new(query);
        tracing::info!(run_id = %report.run_id, query_len = query.len(), "Starting conversation");

        let memory = match self.memory_scope {
            MemoryScope::Conversation => self.agents.memory.with_store(MemoryStore::new()),
            MemoryScope::Orchestrator | MemoryScope::Shared => self.agents.memory.clone(),
        };

        let routing = self
            .isolated(AgentRole::Router, async {
                let generation = self.agents.router.run(query).await?;
                Ok(StepPlan::noted(generation, ROUTING_NOTE))
            })
            .await;
        if !routing.is_failed() {
            report.classification = Some(routing.output.clone());
        }
        report.add_step(routing);

        report.add_step(self.kpi_step(query, &memory).await);

        // (agent, input, scoring query, ground truth)
        let fixed_steps = [
            (&self.agents.diagnostic, DIAGNOSTIC_QUERY, DIAGNOSTIC_QUERY, DIAGNOSTIC_GROUND),
            (&self.agents.simulation, SIMULATION_QUERY, SIMULATION_QUERY, SIMULATION_GROUND),
            (&self.agents.insight, INSIGHT_QUERY, INSIGHT_QUERY, INSIGHT_GROUND),
            (&self.agents.dashboard, DASHBOARD_NAME, DASHBOARD_SCORING_QUERY, DASHBOARD_GROUND),
        ];
        for (agent, input, scoring_query, ground) in fixed_steps {
            report.add_step(self.prompted(agent, input, scoring_query, ground).await);
        }

        let retrieval = self
            .isolated(AgentRole::Memory, async {
                let generation = memory.retrieve(LAST_KPI_KEY).await?;
                Ok(StepPlan::noted(generation, MEMORY_NOTE))
            })
            .await;
        report.add_step(retrieval);

        tracing::info!(
            run_id = %report.run_id,
            passed = report.summary.passed,
            total = report.summary.total,
            pass_rate = report.summary.pass_rate,
            "Conversation complete"
        );
        report
    }

    async fn kpi_step(&self, query: &str, memory: &MemoryAgent) -> StepRecord {
        self.isolated(AgentRole::Kpi, async {
            let generation = self.agents.kpi.run(query).await?;
            let region = detect_region(query, generation.text());
            tracing::debug!(region = ?region, "Region detection");

            let ground = match region {
                Some(region) => {
                    self.assertions
                        .assert_kpi_with_output(region.code(), generation.text())
                        .ground
                }
                None => KPI_FALLBACK_GROUND.to_string(),
            };

            memory.store(LAST_KPI_KEY, generation.text());

            let mut plan = StepPlan::scored(generation, query, ground);
            plan.region = region;
            Ok(plan)
        })
        .await
    }

    /// A templated agent fed a fixed input and scored against a fixed ground truth
    async fn prompted(
        &self,
        agent: &Arc<dyn Agent>,
        input: &str,
        scoring_query: &str,
        ground: &str,
    ) -> StepRecord {
        self.isolated(agent.role(), async {
            let generation = agent.run(input).await?;
            Ok(StepPlan::scored(generation, scoring_query, ground))
        })
        .await
    }

    /// Run one step, converting any error or panic into a failed record
    async fn isolated<F>(&self, role: AgentRole, step: F) -> StepRecord
    where
        F: Future<Output = Result<StepPlan>>,
    {
        let start = Instant::now();

        let outcome = AssertUnwindSafe(async move {
            let plan = step.await?;
            self.finish(role, plan).await
        })
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(EvalFlowError::Panicked(panic_message(&*payload))),
        };

        let record = match result {
            Ok(record) => {
                if record.degraded {
                    tracing::warn!(agent = %role, "Step received a degraded response");
                }
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::info!(agent = %role, elapsed_ms, "Step completed");
                record
            }
            Err(e) => {
                tracing::warn!(agent = %role, error = %e, "Step failed");
                StepRecord::failure(role, e.to_string())
            }
        };

        record.with_duration_ms(start.elapsed().as_millis() as u64)
    }

    async fn finish(&self, role: AgentRole, plan: StepPlan) -> Result<StepRecord> {
        let degraded = plan.generation.is_degraded();

        let metrics = match plan.scoring {
            Scoring::Note(note) => StepMetrics::note(note),
            Scoring::Evaluate { query, ground } => {
                if degraded && self.degraded == DegradedPolicy::Fail {
                    return Err(EvalFlowError::DegradedResponse {
                        reason: plan.generation.reason().unwrap_or("unknown").to_string(),
                    });
                }

                let mut scores = self
                    .evaluator
                    .evaluate(&query, plan.generation.text(), &ground)
                    .await;
                if degraded && self.degraded == DegradedPolicy::Penalize {
                    scores = scores.penalize(self.penalty);
                }
                StepMetrics::Scored(scores)
            }
        };

        Ok(StepRecord::new(role, plan.generation.into_text(), metrics)
            .with_region(plan.region)
            .with_degraded(degraded))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`PipelineOrchestrator`]
pub struct PipelineOrchestratorBuilder {
    prompts: Option<PromptClient>,
    gateway: Option<ModelGateway>,
    reference: Option<Arc<ReferenceStore>>,
    evaluator: Option<Arc<dyn MetricEvaluator>>,
    memory_scope: MemoryScope,
    memory: Option<MemoryStore>,
    degraded: DegradedPolicy,
    penalty: f64,
    models: Vec<(AgentRole, String)>,
    overrides: Vec<Arc<dyn Agent>>,
}

impl Default for PipelineOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            prompts: None,
            gateway: None,
            reference: None,
            evaluator: None,
            memory_scope: MemoryScope::default(),
            memory: None,
            degraded: DegradedPolicy::default(),
            penalty: 0.5,
            models: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Prompt templates (defaults to the built-in set)
    pub fn with_prompts(mut self, prompts: PromptClient) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Model gateway (defaults to offline)
    pub fn with_gateway(mut self, gateway: ModelGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Reference dataset (defaults to the built-in one)
    pub fn with_reference(mut self, reference: ReferenceStore) -> Self {
        self.reference = Some(Arc::new(reference));
        self
    }

    /// Metric evaluator (defaults to [`HeuristicEvaluator`])
    pub fn with_evaluator(mut self, evaluator: Arc<dyn MetricEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_memory_scope(mut self, scope: MemoryScope) -> Self {
        self.memory_scope = scope;
        self
    }

    /// Use a caller-owned memory store; sets the scope to [`MemoryScope::Shared`]
    pub fn with_shared_memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self.memory_scope = MemoryScope::Shared;
        self
    }

    /// Treatment of degraded gateway responses; `penalty` applies to [`DegradedPolicy::Penalize`]
    pub fn with_degraded_policy(mut self, policy: DegradedPolicy, penalty: f64) -> Self {
        self.degraded = policy;
        self.penalty = penalty;
        self
    }

    /// Serve `role` from `model` instead of the gateway default
    pub fn with_agent_model(mut self, role: AgentRole, model: impl Into<String>) -> Self {
        self.models.push((role, model.into()));
        self
    }

    /// Substitute the agent serving `agent.role()`; takes precedence over
    /// [`with_agent_model`](Self::with_agent_model)
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.overrides.push(agent);
        self
    }

    /// # Errors
    ///
    /// Fails when the penalty is outside [0, 1] or an override or model
    /// targets a role that cannot be replaced.
    pub fn build(self) -> Result<PipelineOrchestrator> {
        if !(0.0..=1.0).contains(&self.penalty) {
            return Err(EvalFlowError::Configuration(format!(
                "Degraded penalty must be within [0, 1], got {}",
                self.penalty
            )));
        }

        let prompts = Arc::new(self.prompts.unwrap_or_default());
        let gateway = self.gateway.unwrap_or_else(ModelGateway::offline);
        let memory = self.memory.unwrap_or_default();

        let mut agents = AgentSet::new(prompts.clone(), gateway.clone(), memory);
        for (role, model) in self.models {
            let agent = PromptAgent::new(role, prompts.clone(), gateway.clone()).with_model(model);
            agents.replace(Arc::new(agent))?;
        }
        for agent in self.overrides {
            agents.replace(agent)?;
        }

        Ok(PipelineOrchestrator {
            agents,
            assertions: AssertionEngine::new(
                self.reference
                    .unwrap_or_else(|| Arc::new(ReferenceStore::builtin())),
            ),
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(HeuristicEvaluator::new())),
            memory_scope: self.memory_scope,
            degraded: self.degraded,
            penalty: self.penalty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMProvider, LLMRequest, LLMResponse};
    use crate::metrics::MetricScores;
    use async_trait::async_trait;

    struct Canned(AgentRole, &'static str);

    #[async_trait]
    impl Agent for Canned {
        fn role(&self) -> AgentRole {
            self.0
        }

        async fn run(&self, _query: &str) -> Result<Generation> {
            Ok(Generation::generated(self.1))
        }
    }

    struct Broken(AgentRole);

    #[async_trait]
    impl Agent for Broken {
        fn role(&self) -> AgentRole {
            self.0
        }

        async fn run(&self, _query: &str) -> Result<Generation> {
            Err(EvalFlowError::Other("agent exploded".to_string()))
        }
    }

    struct Exploding(AgentRole);

    #[async_trait]
    impl Agent for Exploding {
        fn role(&self) -> AgentRole {
            self.0
        }

        async fn run(&self, _query: &str) -> Result<Generation> {
            panic!("{} crashed", self.0)
        }
    }

    /// Panics while scoring the dashboard step
    struct ExplodingScorer;

    #[async_trait]
    impl MetricEvaluator for ExplodingScorer {
        async fn evaluate(&self, query: &str, output: &str, ground_truth: &str) -> MetricScores {
            if query == DASHBOARD_SCORING_QUERY {
                panic!("scorer blew up");
            }
            HeuristicEvaluator.score(query, output, ground_truth)
        }
    }

    /// Replies with the requested model id
    struct ModelEcho;

    #[async_trait]
    impl LLMProvider for ModelEcho {
        async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: request.model.clone().unwrap_or_else(|| "default".to_string()),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn test_offline_run_has_seven_steps() {
        let orchestrator = PipelineOrchestrator::builder().build().unwrap();
        let report = orchestrator.run_full_conversation("Show me UK sales").await;

        let agents: Vec<_> = report.steps.iter().map(|s| s.agent).collect();
        assert_eq!(agents, AgentRole::PIPELINE);
        for (i, step) in report.steps.iter().enumerate() {
            assert_eq!(step.step, i + 1);
        }
        assert_eq!(report.region(), Some(Region::UK));
        assert!(report.steps[1].degraded);
        assert_eq!(report.summary.passed, 7);
    }

    #[tokio::test]
    async fn test_router_failure_is_isolated() {
        let orchestrator = PipelineOrchestrator::builder()
            .with_agent(Arc::new(Broken(AgentRole::Router)))
            .build()
            .unwrap();
        let report = orchestrator.run_full_conversation("NY").await;

        assert!(report.classification.is_none());
        assert!(report.steps[0].is_failed());
        assert_eq!(report.steps[0].output, "agent exploded");
        assert_eq!(report.steps.len(), 7);
        assert_eq!(report.summary.passed, 6);
    }

    #[tokio::test]
    async fn test_classification_is_router_text() {
        let orchestrator = PipelineOrchestrator::builder()
            .with_agent(Arc::new(Canned(AgentRole::Router, "KPI")))
            .build()
            .unwrap();
        let report = orchestrator.run_full_conversation("q").await;
        assert_eq!(report.classification.as_deref(), Some("KPI"));
        assert_eq!(report.steps[0].metrics, StepMetrics::note("routing"));
    }

    #[tokio::test]
    async fn test_fail_policy_marks_scored_steps() {
        let orchestrator = PipelineOrchestrator::builder()
            .with_degraded_policy(DegradedPolicy::Fail, 0.5)
            .build()
            .unwrap();
        let report = orchestrator.run_full_conversation("UK").await;

        // Router and memory are notes; the five scored steps fail.
        assert_eq!(report.summary.passed, 2);
        assert_eq!(
            report.steps[1].output,
            "Degraded model response: missing credentials"
        );
    }

    #[tokio::test]
    async fn test_penalize_policy_scales_degraded_scores() {
        let plain = PipelineOrchestrator::builder().build().unwrap();
        let penalized = PipelineOrchestrator::builder()
            .with_degraded_policy(DegradedPolicy::Penalize, 0.0)
            .build()
            .unwrap();

        let report = plain.run_full_conversation("UK").await;
        assert!(report.steps[2].metrics.scores().is_some());

        let report = penalized.run_full_conversation("UK").await;
        let scores = report.steps[2].metrics.scores().copied().unwrap();
        assert_eq!(scores, MetricScores::new(0.0, 0.0, 1.0, 0.0));
    }

    #[tokio::test]
    async fn test_scorer_panic_is_isolated() {
        let orchestrator = PipelineOrchestrator::builder()
            .with_evaluator(Arc::new(ExplodingScorer))
            .build()
            .unwrap();
        let report = orchestrator.run_full_conversation("UK").await;

        assert_eq!(report.steps.len(), 7);
        let dashboard = &report.steps[5];
        assert_eq!(dashboard.agent, AgentRole::Dashboard);
        assert!(dashboard.is_failed());
        assert_eq!(dashboard.output, "Step panicked: scorer blew up");
        assert_eq!(
            serde_json::to_value(&dashboard.metrics).unwrap(),
            serde_json::json!({"failed": true})
        );

        assert!(report.steps[4].metrics.scores().is_some());
        assert!(!report.steps[6].is_failed());
        assert_eq!(report.summary.passed, 6);
    }

    #[tokio::test]
    async fn test_agent_panic_is_isolated() {
        let orchestrator = PipelineOrchestrator::builder()
            .with_agent(Arc::new(Exploding(AgentRole::Insight)))
            .build()
            .unwrap();
        let report = tokio::spawn(async move { orchestrator.run_full_conversation("NY").await })
            .await
            .unwrap();

        assert_eq!(report.steps.len(), 7);
        assert!(report.steps[4].is_failed());
        assert_eq!(report.steps[4].output, "Step panicked: Insight crashed");
        assert!(!report.steps[5].is_failed());
    }

    #[tokio::test]
    async fn test_agent_model_override() {
        let orchestrator = PipelineOrchestrator::builder()
            .with_gateway(ModelGateway::new(Arc::new(ModelEcho)))
            .with_agent_model(AgentRole::Kpi, "models/gemini-2.5-pro")
            .build()
            .unwrap();
        let report = orchestrator.run_full_conversation("UK").await;

        assert_eq!(report.steps[1].output, "models/gemini-2.5-pro");
        assert_eq!(report.steps[2].output, "default");
        assert_eq!(report.classification.as_deref(), Some("default"));
    }

    #[test]
    fn test_from_config_applies_models_and_rejects_memory() {
        let mut config = EvalFlowConfig::default();
        config.gateway.models.insert("kpi".to_string(), "models/gemini-2.5-pro".to_string());
        assert!(PipelineOrchestrator::from_config(&config).is_ok());

        config.gateway.models.insert("memory".to_string(), "models/other".to_string());
        assert!(PipelineOrchestrator::from_config(&config).is_err());
    }

    #[test]
    fn test_invalid_penalty_rejected() {
        let result = PipelineOrchestrator::builder()
            .with_degraded_policy(DegradedPolicy::Penalize, 1.5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_cannot_be_overridden() {
        let result = PipelineOrchestrator::builder()
            .with_agent(Arc::new(Canned(AgentRole::Memory, "x")))
            .build();
        assert!(result.is_err());
    }
}
