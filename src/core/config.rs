//! Scanner configuration
//!
//! Recognised options and their defaults. Nested sections keep the retry
//! and cache knobs together with their consumers.

use crate::core::result::AttackSeverity;
use serde::{Deserialize, Serialize};

/// Retry controller parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first failure.
    pub retry_attempts: u32,
    /// Base backoff delay in seconds; doubles per attempt.
    pub retry_delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            retry_attempts: 2,
            retry_delay: 0.5,
        }
    }
}

/// Result-cache policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachePolicy {
    pub cache_results: bool,
    /// Default entry lifetime in seconds.
    pub cache_ttl: f64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            cache_results: true,
            cache_ttl: 3600.0,
        }
    }
}

/// Report format hint; rendering itself happens outside the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Html,
    Text,
}

/// Main hyperparameters for a scan run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Restricts the registry to these patterns; `None` enables all.
    pub enabled_patterns: Option<Vec<String>>,
    /// Upper bound on payloads generated per pattern.
    pub max_payloads_per_pattern: usize,
    /// Global in-flight probe limit.
    pub max_concurrency: usize,
    /// Agent-level fan-out limit for multi-agent scans.
    pub max_agent_concurrency: usize,
    /// Payload parallelism within a single pattern.
    pub pattern_concurrency: usize,
    /// Per-probe timeout in seconds.
    pub timeout: f64,
    pub retry: RetryConfig,
    pub cache: CachePolicy,
    /// Terminal severity for CLI exit codes.
    pub fail_on_severity: AttackSeverity,
    pub output_format: OutputFormat,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            enabled_patterns: None,
            max_payloads_per_pattern: 10,
            max_concurrency: 10,
            max_agent_concurrency: 3,
            pattern_concurrency: 5,
            timeout: 30.0,
            retry: RetryConfig::default(),
            cache: CachePolicy::default(),
            fail_on_severity: AttackSeverity::High,
            output_format: OutputFormat::Json,
        }
    }
}

impl ScannerConfig {
    /// Returns configuration problems; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_payloads_per_pattern == 0 {
            errors.push("max_payloads_per_pattern must be at least 1".to_string());
        }
        if self.max_concurrency == 0 {
            errors.push("max_concurrency must be at least 1".to_string());
        }
        if self.max_agent_concurrency == 0 {
            errors.push("max_agent_concurrency must be at least 1".to_string());
        }
        if self.pattern_concurrency == 0 {
            errors.push("pattern_concurrency must be at least 1".to_string());
        }
        if self.timeout <= 0.0 {
            errors.push("timeout must be positive".to_string());
        }
        if self.cache.cache_ttl <= 0.0 {
            errors.push("cache_ttl must be positive".to_string());
        }
        errors
    }

    /// True when `pattern` should run under this configuration.
    pub fn pattern_enabled(&self, pattern: &str) -> bool {
        match &self.enabled_patterns {
            None => true,
            Some(enabled) => enabled.iter().any(|name| name == pattern),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScannerConfig::default();
        assert!(config.validate().is_empty());
        assert!(config.pattern_enabled("prompt_injection"));
        assert_eq!(config.max_payloads_per_pattern, 10);
    }

    #[test]
    fn empty_pattern_set_disables_everything() {
        let config = ScannerConfig {
            enabled_patterns: Some(vec![]),
            ..Default::default()
        };
        assert!(!config.pattern_enabled("prompt_injection"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = ScannerConfig {
            max_concurrency: 0,
            timeout: -1.0,
            ..Default::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
    }
}
