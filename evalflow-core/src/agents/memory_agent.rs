use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentRole};
use crate::error::Result;
use crate::llm::{Generation, ModelGateway};
use crate::memory::MemoryStore;
use crate::prompts::PromptClient;

/// Text returned when a key has never been stored
pub const NOT_FOUND: &str = "not found";

/// Stores values and restates them through the model on retrieval
#[derive(Debug, Clone)]
pub struct MemoryAgent {
    prompts: Arc<PromptClient>,
    gateway: ModelGateway,
    memory: MemoryStore,
}

impl MemoryAgent {
    pub fn new(prompts: Arc<PromptClient>, gateway: ModelGateway, memory: MemoryStore) -> Self {
        Self {
            prompts,
            gateway,
            memory,
        }
    }

    /// Same agent bound to a different store
    pub fn with_store(&self, memory: MemoryStore) -> Self {
        Self {
            prompts: self.prompts.clone(),
            gateway: self.gateway.clone(),
            memory,
        }
    }

    /// The backing store
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Store a value; returns the acknowledgement `"stored"`
    pub fn store(&self, key: impl Into<String>, value: impl Into<String>) -> &'static str {
        self.memory.store(key, value);
        "stored"
    }

    /// Retrieve a value and have the model restate it.
    ///
    /// Missing keys return [`NOT_FOUND`] without rendering a prompt or calling the model.
    pub async fn retrieve(&self, key: &str) -> Result<Generation> {
        let Some(value) = self.memory.get(key) else {
            tracing::debug!(key, "Memory key not found");
            return Ok(Generation::generated(NOT_FOUND));
        };

        let prompt = self
            .prompts
            .render(AgentRole::Memory.template(), &[("query", value.as_str())])?;
        Ok(self.gateway.generate(&prompt).await)
    }
}

#[async_trait]
impl Agent for MemoryAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Memory
    }

    async fn run(&self, query: &str) -> Result<Generation> {
        self.retrieve(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMProvider, LLMRequest, LLMResponse};
    use crate::prompts::PromptTemplate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEcho {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for CountingEcho {
        async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LLMResponse {
                content: request.messages[0].content.clone(),
                usage: None,
            })
        }
    }

    fn agent(provider: Arc<CountingEcho>) -> MemoryAgent {
        let prompts = PromptClient::empty()
            .with_template(PromptTemplate::new("memory_prompt", "Retrieved: {{query}}"));
        MemoryAgent::new(
            Arc::new(prompts),
            ModelGateway::new(provider),
            MemoryStore::new(),
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let provider = Arc::new(CountingEcho {
            calls: AtomicUsize::new(0),
        });
        let agent = agent(provider.clone());

        assert_eq!(agent.store("last_kpi", "UK sales 87000"), "stored");
        let generation = agent.retrieve("last_kpi").await.unwrap();
        assert_eq!(generation.text(), "Retrieved: UK sales 87000");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_key_skips_model() {
        let provider = Arc::new(CountingEcho {
            calls: AtomicUsize::new(0),
        });
        let agent = agent(provider.clone());

        let generation = agent.run("last_kpi").await.unwrap();
        assert_eq!(generation, Generation::generated(NOT_FOUND));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_key_needs_no_template() {
        let agent = MemoryAgent::new(
            Arc::new(PromptClient::empty()),
            ModelGateway::offline(),
            MemoryStore::new(),
        );
        assert_eq!(agent.retrieve("x").await.unwrap().text(), NOT_FOUND);

        agent.store("x", "1");
        assert!(agent.retrieve("x").await.is_err());
    }

    #[test]
    fn test_with_store_rebinds() {
        let provider = Arc::new(CountingEcho {
            calls: AtomicUsize::new(0),
        });
        let agent = agent(provider);
        agent.store("k", "v");

        let fresh = agent.with_store(MemoryStore::new());
        assert!(fresh.memory().get("k").is_none());
        assert!(agent.memory().get("k").is_some());
    }
}
