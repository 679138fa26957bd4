use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentRole};
use crate::error::Result;
use crate::llm::{Generation, ModelGateway};
use crate::prompts::PromptClient;

/// Agent that renders its role's template with the query and calls the model
#[derive(Debug, Clone)]
pub struct PromptAgent {
    role: AgentRole,
    prompts: Arc<PromptClient>,
    gateway: ModelGateway,
    model: Option<String>,
}

impl PromptAgent {
    pub fn new(role: AgentRole, prompts: Arc<PromptClient>, gateway: ModelGateway) -> Self {
        Self {
            role,
            prompts,
            gateway,
            model: None,
        }
    }

    /// Pin this agent to a model other than the gateway default
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl Agent for PromptAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn run(&self, query: &str) -> Result<Generation> {
        let prompt = self.prompts.render(self.role.template(), &[("query", query)])?;

        let generation = match &self.model {
            Some(model) => self.gateway.generate_with_model(&prompt, model).await,
            None => self.gateway.generate(&prompt).await,
        };

        // Routing labels are compared downstream, so surrounding whitespace is dropped.
        if self.role == AgentRole::Router {
            return Ok(generation.map_text(|t| t.trim().to_string()));
        }

        Ok(generation)
    }
}
