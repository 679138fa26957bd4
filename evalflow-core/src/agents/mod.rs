//! Pipeline agents
//!
//! Every agent renders a role-specific prompt template and forwards it to the
//! [`ModelGateway`]. Agents neither retry nor validate model output; template
//! errors propagate to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{EvalFlowError, Result};
use crate::llm::{Generation, ModelGateway};
use crate::memory::MemoryStore;
use crate::prompts::PromptClient;

mod memory_agent;
mod prompt_agent;

pub use memory_agent::{MemoryAgent, NOT_FOUND};
pub use prompt_agent::PromptAgent;

/// Semantic role of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    Router,
    #[serde(rename = "KPI")]
    Kpi,
    Diagnostic,
    Simulation,
    Insight,
    Dashboard,
    Memory,
    Persona,
}

impl AgentRole {
    /// Roles of the fixed conversation pipeline, in execution order
    pub const PIPELINE: [AgentRole; 7] = [
        AgentRole::Router,
        AgentRole::Kpi,
        AgentRole::Diagnostic,
        AgentRole::Simulation,
        AgentRole::Insight,
        AgentRole::Dashboard,
        AgentRole::Memory,
    ];

    /// Name used in reports
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Router => "Router",
            AgentRole::Kpi => "KPI",
            AgentRole::Diagnostic => "Diagnostic",
            AgentRole::Simulation => "Simulation",
            AgentRole::Insight => "Insight",
            AgentRole::Dashboard => "Dashboard",
            AgentRole::Memory => "Memory",
            AgentRole::Persona => "Persona",
        }
    }

    /// Prompt template used by this role
    pub fn template(&self) -> &'static str {
        match self {
            AgentRole::Router => "router_prompt",
            AgentRole::Kpi => "kpi_prompt",
            AgentRole::Diagnostic => "diagnostic_prompt",
            AgentRole::Simulation => "simulation_prompt",
            AgentRole::Insight => "insight_prompt",
            AgentRole::Dashboard => "dashboard_prompt",
            AgentRole::Memory => "memory_prompt",
            AgentRole::Persona => "persona_prompt",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentRole {
    type Err = EvalFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "router" => Ok(AgentRole::Router),
            "kpi" => Ok(AgentRole::Kpi),
            "diagnostic" => Ok(AgentRole::Diagnostic),
            "simulation" => Ok(AgentRole::Simulation),
            "insight" => Ok(AgentRole::Insight),
            "dashboard" => Ok(AgentRole::Dashboard),
            "memory" => Ok(AgentRole::Memory),
            "persona" => Ok(AgentRole::Persona),
            _ => Err(EvalFlowError::Configuration(format!("Unknown agent role: {}", s))),
        }
    }
}

/// A unit that turns a query into model text
#[async_trait]
pub trait Agent: Send + Sync {
    /// The role this agent plays
    fn role(&self) -> AgentRole;

    /// Run the agent on a query
    async fn run(&self, query: &str) -> Result<Generation>;
}

/// One agent per pipeline role
#[derive(Clone)]
pub struct AgentSet {
    pub router: Arc<dyn Agent>,
    pub kpi: Arc<dyn Agent>,
    pub diagnostic: Arc<dyn Agent>,
    pub simulation: Arc<dyn Agent>,
    pub insight: Arc<dyn Agent>,
    pub dashboard: Arc<dyn Agent>,
    pub memory: MemoryAgent,
}

impl AgentSet {
    /// Templated agents for every role, sharing one prompt client and gateway
    pub fn new(prompts: Arc<PromptClient>, gateway: ModelGateway, memory: MemoryStore) -> Self {
        let agent = |role| -> Arc<dyn Agent> {
            Arc::new(PromptAgent::new(role, prompts.clone(), gateway.clone()))
        };

        Self {
            router: agent(AgentRole::Router),
            kpi: agent(AgentRole::Kpi),
            diagnostic: agent(AgentRole::Diagnostic),
            simulation: agent(AgentRole::Simulation),
            insight: agent(AgentRole::Insight),
            dashboard: agent(AgentRole::Dashboard),
            memory: MemoryAgent::new(prompts.clone(), gateway.clone(), memory),
        }
    }

    /// Replace the agent serving `agent.role()`.
    ///
    /// # Errors
    ///
    /// Memory and persona roles are not replaceable through this method.
    pub fn replace(&mut self, agent: Arc<dyn Agent>) -> Result<()> {
        let slot = match agent.role() {
            AgentRole::Router => &mut self.router,
            AgentRole::Kpi => &mut self.kpi,
            AgentRole::Diagnostic => &mut self.diagnostic,
            AgentRole::Simulation => &mut self.simulation,
            AgentRole::Insight => &mut self.insight,
            AgentRole::Dashboard => &mut self.dashboard,
            role @ (AgentRole::Memory | AgentRole::Persona) => {
                return Err(EvalFlowError::Configuration(format!(
                    "{} agent cannot be replaced in a pipeline",
                    role
                )));
            }
        };
        *slot = agent;
        Ok(())
    }
}

impl fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSet")
            .field("router", &self.router.role())
            .field("kpi", &self.kpi.role())
            .field("diagnostic", &self.diagnostic.role())
            .field("simulation", &self.simulation.role())
            .field("insight", &self.insight.role())
            .field("dashboard", &self.dashboard.role())
            .field("memory", &self.memory)
            .finish()
    }
}
