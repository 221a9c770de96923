//! Attack pattern engine
//!
//! Each pattern generates adversarial payloads for an agent and evaluates
//! the agent's responses into confidence-scored results. The registry is
//! an ordered, name-deduplicating collection; registration order is the
//! execution order.

pub mod bypass;
pub mod disclosure;
pub mod encoding;
pub mod injection;
pub mod reasoning;

use crate::core::agent::AgentConfig;
use crate::core::config::ScannerConfig;
use crate::core::error::ScannerError;
use crate::core::result::{AttackCategory, AttackPayload, AttackResult, AttackSeverity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub use bypass::PolicyBypass;
pub use disclosure::InformationDisclosure;
pub use injection::PromptInjection;
pub use reasoning::ChainOfThought;

/// A named probe family: payload generator plus response evaluator.
pub trait AttackPattern: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> AttackCategory;

    /// Severity assigned to high-confidence findings.
    fn base_severity(&self) -> AttackSeverity;

    fn description(&self) -> &str;

    /// Produces probe payloads, bounded by `config.max_payloads_per_pattern`.
    ///
    /// Generation may embed the agent's name, system-prompt fragments or
    /// declared tool names to produce context-aware payloads.
    fn generate_payloads(
        &self,
        agent: &AgentConfig,
        config: &ScannerConfig,
    ) -> Result<Vec<AttackPayload>, ScannerError>;

    /// Scores one response. Pure CPU work; never suspends.
    fn evaluate(&self, payload: &AttackPayload, response: &str, agent: &AgentConfig) -> AttackResult;

    /// Maps evaluation confidence to a severity.
    ///
    /// ≥0.8 keeps the declared severity, ≥0.6 steps one level down, and
    /// anything weaker that still counts as vulnerable lands at Low.
    fn severity_for(&self, confidence: f64) -> AttackSeverity {
        if confidence >= 0.8 {
            self.base_severity()
        } else if confidence >= 0.6 {
            self.base_severity().step_down()
        } else {
            AttackSeverity::Low
        }
    }
}

/// Builds a non-vulnerable result for empty or unusable responses.
pub(crate) fn benign_result(
    pattern: &dyn AttackPattern,
    payload: &AttackPayload,
    response: &str,
) -> AttackResult {
    AttackResult::new(
        payload.clone(),
        pattern.name(),
        response,
        false,
        0.0,
        AttackSeverity::Low,
        pattern.category(),
    )
    .expect("zero confidence is always in range")
}

/// Execution counters kept per registered pattern.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub executions: u64,
    pub failures: u64,
}

/// Descriptor surfaced through `Scanner::get_pattern_info`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternInfo {
    pub name: String,
    pub category: AttackCategory,
    pub severity: AttackSeverity,
    pub description: String,
    pub executions: u64,
    pub failures: u64,
}

/// Ordered pattern collection keyed by name.
pub struct PatternRegistry {
    patterns: RwLock<Vec<Arc<dyn AttackPattern>>>,
    stats: RwLock<HashMap<String, PatternStats>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        PatternRegistry {
            patterns: RwLock::new(Vec::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the four mandatory patterns.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PromptInjection::new()));
        registry.register(Arc::new(InformationDisclosure::new()));
        registry.register(Arc::new(PolicyBypass::new()));
        registry.register(Arc::new(ChainOfThought::new()));
        registry
    }

    /// Registers a pattern; re-registering a name is a no-op.
    pub fn register(&self, pattern: Arc<dyn AttackPattern>) {
        let mut patterns = self.patterns.write();
        if patterns.iter().any(|p| p.name() == pattern.name()) {
            warn!("[Registry] Pattern '{}' already registered, ignoring", pattern.name());
            return;
        }
        info!("🔌 [Registry] Registered pattern: {}", pattern.name());
        self.stats
            .write()
            .insert(pattern.name().to_string(), PatternStats::default());
        patterns.push(pattern);
    }

    /// Pattern names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.patterns
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    /// Patterns enabled under `config`, in registration order.
    pub fn enabled(&self, config: &ScannerConfig) -> Vec<Arc<dyn AttackPattern>> {
        self.patterns
            .read()
            .iter()
            .filter(|p| config.pattern_enabled(p.name()))
            .cloned()
            .collect()
    }

    pub fn get_info(&self, name: &str) -> Option<PatternInfo> {
        let patterns = self.patterns.read();
        let pattern = patterns.iter().find(|p| p.name() == name)?;
        let stats = self
            .stats
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default();
        Some(PatternInfo {
            name: pattern.name().to_string(),
            category: pattern.category(),
            severity: pattern.base_severity(),
            description: pattern.description().to_string(),
            executions: stats.executions,
            failures: stats.failures,
        })
    }

    /// Records one pattern execution, failed or not.
    pub fn record_execution(&self, name: &str, failed: bool) {
        let mut stats = self.stats.write();
        let entry = stats.entry(name.to_string()).or_default();
        entry.executions += 1;
        if failed {
            entry.failures += 1;
        }
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_four_patterns_in_order() {
        let registry = PatternRegistry::with_defaults();
        assert_eq!(
            registry.list(),
            vec![
                "prompt_injection",
                "information_disclosure",
                "policy_bypass",
                "chain_of_thought"
            ]
        );
    }

    #[test]
    fn duplicate_registration_is_noop() {
        let registry = PatternRegistry::with_defaults();
        registry.register(Arc::new(PromptInjection::new()));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn enabled_respects_config_filter() {
        let registry = PatternRegistry::with_defaults();
        let config = ScannerConfig {
            enabled_patterns: Some(vec!["policy_bypass".to_string()]),
            ..Default::default()
        };
        let enabled = registry.enabled(&config);
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name(), "policy_bypass");
    }

    #[test]
    fn pattern_info_tracks_executions() {
        let registry = PatternRegistry::with_defaults();
        registry.record_execution("prompt_injection", false);
        registry.record_execution("prompt_injection", true);
        let info = registry.get_info("prompt_injection").expect("registered");
        assert_eq!(info.executions, 2);
        assert_eq!(info.failures, 1);
        assert!(registry.get_info("unknown").is_none());
    }

    #[test]
    fn severity_mapping_follows_confidence() {
        let pattern = PromptInjection::new();
        assert_eq!(pattern.severity_for(0.9), AttackSeverity::High);
        assert_eq!(pattern.severity_for(0.7), AttackSeverity::Medium);
        assert_eq!(pattern.severity_for(0.55), AttackSeverity::Low);
    }
}
