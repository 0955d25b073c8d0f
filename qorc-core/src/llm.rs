//! LLMCoordinator: agent selection, prompt build, streaming with
//! circuit-breaker-protected fallback (§4.10).

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::traits::{AgentChunk, LlmAgent};
use crate::{AllAgentsUnavailableError, Intent, OrchestratorError, QorcResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Event stream emitted by [`LlmCoordinator::stream`] (§4.10).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Started { agent: String },
    Token { content: String, agent: String, token_count: u32 },
    Thinking { content: String, agent: String },
    Completed { content: String, agent: String, token_count: u32, is_final: bool },
    Error { error: String, agent: String },
}

/// `selector.select(intent) -> agent_name` oracle (§4.10 Agent selection).
pub trait AgentSelector: Send + Sync {
    fn select(&self, intent: Intent) -> String;
}

/// Closed-table selector: a preferred agent per intent, falling back to a
/// configured default.
pub struct TableAgentSelector {
    table: HashMap<Intent, String>,
    default_agent: String,
}

impl TableAgentSelector {
    pub fn new(table: HashMap<Intent, String>, default_agent: impl Into<String>) -> Self {
        Self { table, default_agent: default_agent.into() }
    }
}

impl AgentSelector for TableAgentSelector {
    fn select(&self, intent: Intent) -> String {
        self.table.get(&intent).cloned().unwrap_or_else(|| self.default_agent.clone())
    }
}

pub struct LlmCoordinator {
    agents: HashMap<String, Arc<dyn LlmAgent>>,
    fallback_order: Vec<String>,
    breakers: Arc<CircuitBreakerRegistry>,
    selector: Arc<dyn AgentSelector>,
    default_agent: String,
    max_context_chars: usize,
}

impl LlmCoordinator {
    pub fn new(
        agents: HashMap<String, Arc<dyn LlmAgent>>,
        fallback_order: Vec<String>,
        breakers: Arc<CircuitBreakerRegistry>,
        selector: Arc<dyn AgentSelector>,
        default_agent: impl Into<String>,
        max_context_chars: usize,
    ) -> Self {
        Self {
            agents,
            fallback_order,
            breakers,
            selector,
            default_agent: default_agent.into(),
            max_context_chars,
        }
    }

    /// `system_prompt + context (truncated) + question`. `context` must
    /// already be the sanitized context from the retrieval engine.
    pub fn build_prompt(&self, system_prompt: &str, context: &str, question: &str) -> String {
        let truncated = if context.chars().count() > self.max_context_chars {
            let head: String = context.chars().take(self.max_context_chars).collect();
            format!("{head}\n[Context truncated...]")
        } else {
            context.to_string()
        };
        format!("{system_prompt}\n\n{truncated}\n\nQuestion: {question}")
    }

    /// Agent selection with manual override, absent-agent fallback to
    /// default, then to the first available agent.
    pub fn resolve_agent_name(&self, intent: Intent, manual_agent: Option<&str>) -> String {
        if let Some(manual) = manual_agent {
            if self.agents.contains_key(manual) {
                return manual.to_string();
            }
        }
        let selected = self.selector.select(intent);
        if self.agents.contains_key(&selected) {
            return selected;
        }
        if self.agents.contains_key(&self.default_agent) {
            return self.default_agent.clone();
        }
        self.agents.keys().next().cloned().unwrap_or(selected)
    }

    /// Whether the agent `resolve_agent_name` would pick for these inputs is
    /// external. An unknown agent name is treated as external (fail-closed
    /// for the §4.12 step 8 egress filter).
    pub fn agent_is_external(&self, agent_name: &str) -> bool {
        self.agents.get(agent_name).map(|a| a.metadata().is_external).unwrap_or(true)
    }

    /// Stream a response, falling back through `fallback_agents` on any
    /// breaker-open or downstream failure. Emits `Thinking` at each switch.
    pub async fn stream(
        &self,
        intent: Intent,
        manual_agent: Option<&str>,
        prompt: &str,
    ) -> QorcResult<Vec<AgentEvent>> {
        let primary = self.resolve_agent_name(intent, manual_agent);
        let mut candidates = vec![primary.clone()];
        candidates.extend(self.fallback_order.iter().filter(|a| **a != primary).cloned());

        let mut events = Vec::new();
        for (i, agent_name) in candidates.iter().enumerate() {
            let Some(agent) = self.agents.get(agent_name) else { continue };
            let breaker = self.breakers.get_or_create(agent_name);

            if breaker.before_call().is_err() {
                if i == 0 {
                    events.push(AgentEvent::Started { agent: agent_name.clone() });
                } else {
                    events.push(AgentEvent::Thinking {
                        content: format!("Switching to {agent_name}"),
                        agent: agent_name.clone(),
                    });
                }
                continue;
            }

            if i == 0 {
                events.push(AgentEvent::Started { agent: agent_name.clone() });
            } else {
                events.push(AgentEvent::Thinking {
                    content: format!("Switching to {agent_name}"),
                    agent: agent_name.clone(),
                });
            }

            match agent.stream(prompt).await {
                Ok(chunks) => {
                    breaker.record_success();
                    let mut token_count = 0u32;
                    let mut content = String::new();
                    for chunk in chunks {
                        if let AgentChunk::Token(text) = chunk {
                            token_count += 1;
                            content.push_str(&text);
                            events.push(AgentEvent::Token {
                                content: text,
                                agent: agent_name.clone(),
                                token_count,
                            });
                        }
                    }
                    events.push(AgentEvent::Completed {
                        content,
                        agent: agent_name.clone(),
                        token_count,
                        is_final: true,
                    });
                    return Ok(events);
                }
                Err(_) => {
                    breaker.record_failure();
                }
            }
        }

        events.push(AgentEvent::Error {
            error: "All LLM agents unavailable".to_string(),
            agent: primary.clone(),
        });
        Err(OrchestratorError::AllAgentsUnavailable(AllAgentsUnavailableError {
            intent: format!("{intent:?}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLlmAgent;
    use std::time::Duration;

    fn coordinator(agents: Vec<(&str, Arc<dyn LlmAgent>)>, fallback: Vec<&str>) -> LlmCoordinator {
        let map: HashMap<String, Arc<dyn LlmAgent>> =
            agents.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let selector = Arc::new(TableAgentSelector::new(HashMap::new(), "a"));
        LlmCoordinator::new(
            map,
            fallback.into_iter().map(String::from).collect(),
            Arc::new(CircuitBreakerRegistry::new(5, Duration::from_secs(30), 2)),
            selector,
            "a",
            4000,
        )
    }

    #[tokio::test]
    async fn test_fallback_on_failure() {
        let a: Arc<dyn LlmAgent> = Arc::new(FakeLlmAgent::fails_n_times("a", 1, "unused"));
        let b: Arc<dyn LlmAgent> = Arc::new(FakeLlmAgent::always_succeeds("b", "hello from b"));
        let coord = coordinator(vec![("a", a), ("b", b)], vec!["a", "b"]);
        let events = coord.stream(Intent::General, None, "prompt").await.unwrap();
        assert!(matches!(events.first(), Some(AgentEvent::Started { agent }) if agent == "a"));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Thinking { agent, .. } if agent == "b")));
        assert!(matches!(events.last(), Some(AgentEvent::Completed { is_final: true, .. })));
    }

    #[tokio::test]
    async fn test_all_agents_unavailable() {
        let a: Arc<dyn LlmAgent> = Arc::new(FakeLlmAgent::fails_n_times("a", 10, "unused"));
        let coord = coordinator(vec![("a", a)], vec!["a"]);
        let result = coord.stream(Intent::General, None, "prompt").await;
        assert!(matches!(result, Err(OrchestratorError::AllAgentsUnavailable(_))));
    }

    #[test]
    fn test_manual_override_wins_when_available() {
        let a: Arc<dyn LlmAgent> = Arc::new(FakeLlmAgent::always_succeeds("a", "x"));
        let b: Arc<dyn LlmAgent> = Arc::new(FakeLlmAgent::always_succeeds("b", "y"));
        let coord = coordinator(vec![("a", a), ("b", b)], vec!["a", "b"]);
        assert_eq!(coord.resolve_agent_name(Intent::General, Some("b")), "b");
    }

    #[test]
    fn test_prompt_truncation_marker() {
        let a: Arc<dyn LlmAgent> = Arc::new(FakeLlmAgent::always_succeeds("a", "x"));
        let mut coord = coordinator(vec![("a", a)], vec!["a"]);
        coord.max_context_chars = 5;
        let prompt = coord.build_prompt("sys", "0123456789", "q?");
        assert!(prompt.contains("[Context truncated...]"));
    }
}
