//! redscan-core - Adversarial Security Scanning Engine for AI Agents
//!
//! This library probes conversational agents with adversarial payload
//! batteries (prompt injection, information disclosure, policy bypass,
//! chain-of-thought poisoning), classifies responses into confidence-scored
//! findings, and aggregates them into structured scan reports with a focus
//! on reliability: per-pattern circuit breakers, retry with backoff,
//! graceful degradation, adaptive result caching and scale-out support.
//!
//! ```no_run
//! use redscan_core::{MockAgent, Scanner, ScannerConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), redscan_core::ScannerError> {
//! let scanner = Scanner::new(ScannerConfig::default())?;
//! let agent = Arc::new(MockAgent::new("assistant-under-test"));
//! let report = scanner.scan(agent, None).await?;
//! println!("risk score: {:.1}", report.statistics.risk_score);
//! # Ok(())
//! # }
//! ```

pub mod attacks;
pub mod cache;
pub mod core;
pub mod reliability;
pub mod scale;
pub mod validation;

// Re-export the surface most embedders need.
pub use crate::core::agent::{Agent, AgentConfig, AgentHealth, CustomAgent, MockAgent};
pub use crate::core::config::{CachePolicy, OutputFormat, RetryConfig, ScannerConfig};
pub use crate::core::error::{AgentError, ProbeError, ScannerError};
pub use crate::core::result::{
    AttackCategory, AttackPayload, AttackResult, AttackSeverity, ScanResult, ScanStatistics,
    Vulnerability,
};
pub use crate::core::scanner::{
    HealthSnapshot, OptimizationReport, PerfSnapshot, ProgressCallback, ScanProgress, Scanner,
    SCANNER_VERSION,
};
pub use attacks::{AttackPattern, PatternInfo, PatternRegistry};
pub use cache::{fingerprint, AdaptiveCache, CacheStats};
pub use reliability::{
    BreakerManager, CircuitBreaker, CircuitConfig, CircuitState, DegradationLevel,
    DegradationManager, RetryPolicy, ScanControls,
};
pub use scale::{
    AutoScaler, AutoScalerConfig, BalancingStrategy, LoadBalancer, PerformanceMetrics,
    ScalingAction, ScalingDecision, WorkerNode,
};
pub use validation::InputGuard;

/// Initialize tracing for the library.
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
