//! Scan orchestrator
//!
//! Fans probe payloads across patterns under bounded concurrency, routes
//! every agent query through the retry controller and the per-pattern
//! circuit breaker, aggregates results and streams progress. Collaborators
//! (cache, breaker manager, degradation manager, balancer, autoscaler) are
//! injected; the default constructor wires the standard set.

use crate::attacks::{AttackPattern, PatternInfo, PatternRegistry};
use crate::cache::{fingerprint, AdaptiveCache, CacheStats};
use crate::core::agent::{Agent, AgentConfig};
use crate::core::config::ScannerConfig;
use crate::core::error::{ProbeError, ScannerError};
use crate::core::result::{AttackCategory, AttackResult, ScanResult};
use crate::reliability::circuit::ManagerHealth;
use crate::reliability::{
    BreakerManager, CircuitConfig, DegradationLevel, DegradationManager, RetryPolicy, ScanControls,
};
use crate::scale::{
    AutoScaler, AutoScalerConfig, BalancingStrategy, LoadBalancer, PerformanceMetrics,
    ScalingAction, ScalingDecision,
};
use crate::validation::InputGuard;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const SCANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

const SCAN_HISTORY_CAP: usize = 256;

/// Snapshot handed to progress callbacks after each completed pattern.
#[derive(Clone, Debug)]
pub struct ScanProgress {
    pub completed_patterns: usize,
    pub total_patterns: usize,
    pub vulnerabilities_found: usize,
    pub elapsed: f64,
}

impl ScanProgress {
    pub fn progress_percentage(&self) -> f64 {
        if self.total_patterns == 0 {
            100.0
        } else {
            self.completed_patterns as f64 / self.total_patterns as f64 * 100.0
        }
    }
}

/// Return `false` to cancel: in-flight probes finish, no new ones start.
pub type ProgressCallback = Arc<dyn Fn(&ScanProgress) -> bool + Send + Sync>;

#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub breakers: ManagerHealth,
    pub degradation_level: DegradationLevel,
    pub cache_hit_rate: f64,
    pub active_scans: usize,
    pub timestamp: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PerfSnapshot {
    pub scans_completed: usize,
    pub avg_scan_duration: f64,
    pub p95_scan_duration: f64,
    pub p99_scan_duration: f64,
    pub avg_throughput: f64,
    pub cache_hit_rate: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct OptimizationReport {
    pub expired_entries_purged: usize,
    pub cache_capacity: usize,
    pub breakers_reset: Vec<String>,
}

/// The authoritative entry point for scans.
pub struct Scanner {
    config: ScannerConfig,
    registry: PatternRegistry,
    cache: Arc<AdaptiveCache<ScanResult>>,
    breakers: Arc<BreakerManager>,
    retry: RetryPolicy,
    degradation: Arc<DegradationManager>,
    controls: Arc<ScanControls>,
    balancer: Arc<LoadBalancer>,
    autoscaler: Arc<AutoScaler>,
    guard: InputGuard,
    active_scans: AtomicUsize,
    scan_history: Mutex<VecDeque<(f64, usize)>>,
}

impl Scanner {
    /// Default scope: wires the standard collaborators around `config`.
    pub fn new(config: ScannerConfig) -> Result<Self, ScannerError> {
        let controls = Arc::new(ScanControls::new());
        let degradation = Arc::new(DegradationManager::new(controls.clone()));
        let cache = Arc::new(AdaptiveCache::new(
            1000,
            Duration::from_secs_f64(config.cache.cache_ttl.max(1.0)),
        ));
        let balancer = Arc::new(LoadBalancer::new(BalancingStrategy::Adaptive));
        for i in 0..config.max_agent_concurrency {
            balancer.add_node(format!("worker-{}", i), 1.0);
        }
        Self::with_components(
            config,
            PatternRegistry::with_defaults(),
            cache,
            Arc::new(BreakerManager::new(CircuitConfig::default())),
            degradation,
            balancer,
            Arc::new(AutoScaler::new(AutoScalerConfig::default())),
        )
    }

    /// Fully injected constructor for tests and embedders.
    pub fn with_components(
        config: ScannerConfig,
        registry: PatternRegistry,
        cache: Arc<AdaptiveCache<ScanResult>>,
        breakers: Arc<BreakerManager>,
        degradation: Arc<DegradationManager>,
        balancer: Arc<LoadBalancer>,
        autoscaler: Arc<AutoScaler>,
    ) -> Result<Self, ScannerError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ScannerError::Validation(errors));
        }
        let retry = RetryPolicy::from_config(&config.retry);
        let controls = degradation.controls();
        info!(
            "🔍 [Scanner] Initialized v{} ({} patterns registered)",
            SCANNER_VERSION,
            registry.len()
        );
        Ok(Scanner {
            config,
            registry,
            cache,
            breakers,
            retry,
            degradation,
            controls,
            balancer,
            autoscaler,
            guard: InputGuard::new(),
            active_scans: AtomicUsize::new(0),
            scan_history: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn degradation(&self) -> Arc<DegradationManager> {
        self.degradation.clone()
    }

    pub fn autoscaler(&self) -> Arc<AutoScaler> {
        self.autoscaler.clone()
    }

    pub fn balancer(&self) -> Arc<LoadBalancer> {
        self.balancer.clone()
    }

    pub fn register_pattern(&self, pattern: Arc<dyn AttackPattern>) {
        self.registry.register(pattern);
    }

    pub fn list_patterns(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn get_pattern_info(&self, name: &str) -> Option<PatternInfo> {
        self.registry.get_info(name)
    }

    /// Returns validation problems with `agent`; empty means scannable.
    pub fn validate_agent(&self, agent: &dyn Agent) -> Vec<String> {
        let mut errors = Vec::new();
        if agent.name().trim().is_empty() {
            errors.push("agent name must not be empty".to_string());
        }
        let config = agent.config();
        if config.agent_type.trim().is_empty() {
            errors.push("agent_type must not be empty".to_string());
        }
        if config.model.trim().is_empty() {
            errors.push("agent model must not be empty".to_string());
        }
        if config.name != agent.name() {
            errors.push(format!(
                "agent name '{}' does not match its config name '{}'",
                agent.name(),
                config.name
            ));
        }
        errors
    }

    /// Screens arbitrary text through the input guard.
    pub fn validate_input(&self, text: &str, context: &str) -> (String, Vec<String>) {
        let report = self.guard.screen_prompt(text, context);
        (report.sanitized, report.warnings)
    }

    /// Runs the full probe battery against one agent.
    pub async fn scan(
        &self,
        agent: Arc<dyn Agent>,
        progress: Option<ProgressCallback>,
    ) -> Result<ScanResult, ScannerError> {
        let errors = self.validate_agent(agent.as_ref());
        if !errors.is_empty() {
            return Err(ScannerError::Validation(errors));
        }

        let agent_config = agent.config();
        let enabled = self.enabled_patterns();
        let pattern_names: Vec<String> = enabled.iter().map(|p| p.name().to_string()).collect();

        let caching = self.config.cache.cache_results && self.controls.caching_enabled();
        let cache_key = fingerprint(&agent_config.name, &pattern_names);
        if caching {
            if let Some(cached) = self.cache.get(&cache_key) {
                info!("🎯 [Scanner] Cache hit for agent '{}'", agent_config.name);
                return Ok(cached);
            }
        }

        info!(
            "🔍 [Scanner] Scanning agent '{}' with {} patterns",
            agent_config.name,
            enabled.len()
        );
        let start = Instant::now();
        self.active_scans.fetch_add(1, Ordering::SeqCst);

        let global_limit = self.controls.scale_concurrency(self.config.max_concurrency);
        let pattern_limit = self.controls.scale_concurrency(self.config.pattern_concurrency);
        let global_sem = Arc::new(Semaphore::new(global_limit));

        let total_patterns = enabled.len();
        let mut attack_results: Vec<AttackResult> = Vec::new();
        let mut patterns_executed = 0usize;
        let mut vulnerabilities_found = 0usize;
        let mut cancelled = false;

        for pattern in &enabled {
            let payloads = match pattern.generate_payloads(&agent_config, &self.config) {
                Ok(payloads) => payloads,
                Err(err) => {
                    warn!(
                        "⚠️  [Scanner] Payload generation failed for '{}', skipping: {}",
                        pattern.name(),
                        err
                    );
                    self.registry.record_execution(pattern.name(), true);
                    continue;
                }
            };

            let results = self
                .run_pattern(
                    pattern,
                    payloads,
                    &agent,
                    &agent_config,
                    global_sem.clone(),
                    pattern_limit,
                )
                .await;
            patterns_executed += 1;
            let failed = !results.is_empty() && results.iter().all(|r| r.is_error);
            self.registry.record_execution(pattern.name(), failed);

            vulnerabilities_found += results
                .iter()
                .filter(|r| r.is_vulnerable && r.confidence >= 0.5)
                .count();
            attack_results.extend(results);

            if let Some(callback) = &progress {
                let snapshot = ScanProgress {
                    completed_patterns: patterns_executed,
                    total_patterns,
                    vulnerabilities_found,
                    elapsed: start.elapsed().as_secs_f64(),
                };
                if !callback(&snapshot) {
                    warn!(
                        "⏹️  [Scanner] Cancellation requested after {}/{} patterns",
                        patterns_executed, total_patterns
                    );
                    cancelled = true;
                    break;
                }
            }
        }

        let duration = start.elapsed().as_secs_f64();
        let mut result = ScanResult::assemble(
            agent_config.name.clone(),
            agent_config.to_value(),
            attack_results,
            duration,
            patterns_executed,
            SCANNER_VERSION,
        );
        result.incomplete = cancelled;

        if caching && !cancelled {
            self.cache.set(cache_key, result.clone());
        }

        {
            let mut history = self.scan_history.lock();
            if history.len() >= SCAN_HISTORY_CAP {
                history.pop_front();
            }
            history.push_back((duration, result.total_tests));
        }
        self.active_scans.fetch_sub(1, Ordering::SeqCst);

        info!(
            "✅ [Scanner] Scan of '{}' complete: {} tests, {} vulnerabilities in {:.2}s",
            result.agent_name,
            result.total_tests,
            result.vulnerabilities.len(),
            duration
        );
        Ok(result)
    }

    /// Blocking wrapper for callers without a runtime.
    pub fn scan_blocking(&self, agent: Arc<dyn Agent>) -> Result<ScanResult, ScannerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| ScannerError::Internal(format!("runtime construction failed: {}", err)))?;
        runtime.block_on(self.scan(agent, None))
    }

    /// Fans a batch of agents out under the agent-level concurrency limit.
    ///
    /// Always returns an entry per input agent; a failed scan yields an
    /// error-bearing placeholder result.
    pub async fn scan_multiple(
        self: &Arc<Self>,
        agents: Vec<Arc<dyn Agent>>,
        auto_scale: bool,
    ) -> HashMap<String, ScanResult> {
        info!(
            "🔍 [Scanner] Multi-agent scan: {} agents (limit {})",
            agents.len(),
            self.config.max_agent_concurrency
        );

        if auto_scale {
            let metrics = self.sample_metrics(agents.len());
            if let Some(decision) = self.autoscaler.analyze(metrics) {
                self.apply_scaling(&decision);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_agent_concurrency));
        let mut set: JoinSet<(String, ScanResult)> = JoinSet::new();

        for agent in agents {
            let scanner = self.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("agent semaphore never closed");
                let agent_name = agent.name().to_string();
                let node = scanner.balancer.select_node(Some(&agent_name));
                if let Some(node) = &node {
                    scanner.balancer.increment_connections(&node.id);
                }

                let started = Instant::now();
                let outcome = scanner.scan(agent.clone(), None).await;

                if let Some(node) = &node {
                    scanner.balancer.update_node_metrics(
                        &node.id,
                        started.elapsed().as_secs_f64(),
                        outcome.is_err(),
                    );
                    scanner.balancer.decrement_connections(&node.id);
                }

                let result = match outcome {
                    Ok(result) => result,
                    Err(err) => {
                        error!("❌ [Scanner] Scan of '{}' failed: {}", agent_name, err);
                        Self::error_result(&agent_name, &err)
                    }
                };
                (agent_name, result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, result)) => {
                    results.insert(name, result);
                }
                Err(err) => error!("❌ [Scanner] Agent scan task panicked: {}", err),
            }
        }

        if auto_scale {
            let metrics = self.sample_metrics(0);
            if let Some(decision) = self.autoscaler.analyze(metrics) {
                self.apply_scaling(&decision);
            }
        }

        results
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn get_health_status(&self) -> HealthSnapshot {
        let breakers = self.breakers.health();
        let degradation_level = self.degradation.current_level();
        let status = if self.controls.emergency()
            || degradation_level == DegradationLevel::Emergency
            || breakers.status == "unhealthy"
        {
            "unhealthy"
        } else if breakers.status == "degraded" || degradation_level > DegradationLevel::Normal {
            "degraded"
        } else {
            "healthy"
        };
        HealthSnapshot {
            status: status.to_string(),
            breakers,
            degradation_level,
            cache_hit_rate: self.cache.stats().hit_rate,
            active_scans: self.active_scans.load(Ordering::SeqCst),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn get_performance_report(&self) -> PerfSnapshot {
        let history = self.scan_history.lock();
        let durations: Vec<f64> = history.iter().map(|(d, _)| *d).collect();
        let total_tests: usize = history.iter().map(|(_, t)| *t).sum();
        let total_duration: f64 = durations.iter().sum();
        PerfSnapshot {
            scans_completed: history.len(),
            avg_scan_duration: if durations.is_empty() {
                0.0
            } else {
                total_duration / durations.len() as f64
            },
            p95_scan_duration: percentile(&durations, 95.0),
            p99_scan_duration: percentile(&durations, 99.0),
            avg_throughput: if total_duration > 0.0 {
                total_tests as f64 / total_duration
            } else {
                0.0
            },
            cache_hit_rate: self.cache.stats().hit_rate,
        }
    }

    /// Housekeeping pass: purge expired cache entries, retune capacity
    /// and clear failure streaks on breakers that have recovered.
    pub fn optimize_performance(&self) -> OptimizationReport {
        let expired = self.cache.purge_expired();
        let capacity = self.cache.tune_now();

        let mut reset = Vec::new();
        for (name, state, stats) in self.breakers.all_stats() {
            if state == crate::reliability::CircuitState::Closed && stats.failure_count > 0 {
                if let Some(breaker) = self.breakers.get(&name) {
                    breaker.reset();
                    reset.push(name);
                }
            }
        }

        info!(
            "🧹 [Scanner] Optimization: {} expired entries purged, {} breakers reset",
            expired,
            reset.len()
        );
        OptimizationReport {
            expired_entries_purged: expired,
            cache_capacity: capacity,
            breakers_reset: reset,
        }
    }

    /// Releases shared state: cache, breakers, degradation overrides.
    pub fn cleanup_resources(&self) {
        info!("🧹 [Scanner] Cleaning up resources");
        self.cache.clear();
        self.breakers.reset_all();
        self.degradation.stop_monitor();
        self.degradation.force_recovery("cleanup");
    }

    /// CLI exit code mapping for a finished (or failed) scan.
    pub fn exit_code(&self, outcome: &Result<ScanResult, ScannerError>) -> i32 {
        match outcome {
            Err(ScannerError::Validation(_)) => 2,
            Err(_) => 3,
            Ok(result) => {
                let health = self.get_health_status();
                if health.status == "unhealthy" {
                    3
                } else if result.has_severity_at_or_above(self.config.fail_on_severity) {
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Enabled patterns in registration order, narrowed to the essential
    /// set while degradation demands it.
    fn enabled_patterns(&self) -> Vec<Arc<dyn AttackPattern>> {
        let mut enabled = self.registry.enabled(&self.config);
        if self.controls.essential_patterns_only() {
            enabled.retain(|p| {
                matches!(
                    p.category(),
                    AttackCategory::PromptInjection | AttackCategory::InformationDisclosure
                )
            });
        }
        enabled
    }

    /// Executes one pattern's payloads concurrently, preserving payload
    /// order in the returned results.
    async fn run_pattern(
        &self,
        pattern: &Arc<dyn AttackPattern>,
        payloads: Vec<crate::core::result::AttackPayload>,
        agent: &Arc<dyn Agent>,
        agent_config: &AgentConfig,
        global_sem: Arc<Semaphore>,
        pattern_limit: usize,
    ) -> Vec<AttackResult> {
        let pattern_sem = Arc::new(Semaphore::new(pattern_limit));
        let breaker = self.breakers.get_or_create(pattern.name());
        let timeout = Duration::from_secs_f64(self.config.timeout);
        let mut set: JoinSet<(usize, AttackResult)> = JoinSet::new();

        for (index, payload) in payloads.into_iter().enumerate() {
            let report = self.guard.screen_prompt(&payload.content, pattern.name());
            if report.rejected {
                let err = ProbeError::Evaluation(format!(
                    "payload rejected by input guard: {:?}",
                    report.warnings
                ));
                let pattern_name = pattern.name().to_string();
                let category = pattern.category();
                set.spawn(async move {
                    (
                        index,
                        AttackResult::from_error(payload, pattern_name, category, &err),
                    )
                });
                continue;
            }

            let prompt = report.sanitized;
            let agent = agent.clone();
            let pattern = pattern.clone();
            let agent_config = agent_config.clone();
            let breaker = breaker.clone();
            let retry = self.retry.clone();
            let global_sem = global_sem.clone();
            let pattern_sem = pattern_sem.clone();

            set.spawn(async move {
                let _global = global_sem
                    .acquire_owned()
                    .await
                    .expect("probe semaphore never closed");
                let _local = pattern_sem
                    .acquire_owned()
                    .await
                    .expect("pattern semaphore never closed");

                let outcome = retry
                    .run(pattern.name(), &breaker, || {
                        let agent = agent.clone();
                        let prompt = prompt.clone();
                        async move {
                            match tokio::time::timeout(timeout, agent.query(&prompt)).await {
                                Ok(Ok(response)) => Ok(response),
                                Ok(Err(err)) => Err(ProbeError::from(err)),
                                Err(_) => Err(ProbeError::Timeout(timeout.as_secs_f64())),
                            }
                        }
                    })
                    .await;

                let result = match outcome {
                    Ok(response) => pattern.evaluate(&payload, &response, &agent_config),
                    Err(err) => {
                        AttackResult::from_error(payload, pattern.name(), pattern.category(), &err)
                    }
                };
                (index, result)
            });
        }

        let mut indexed: Vec<(usize, AttackResult)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(err) => error!("❌ [Scanner] Probe task panicked: {}", err),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Builds the aggregate metric sample the autoscaler consumes.
    fn sample_metrics(&self, queue_length: usize) -> PerformanceMetrics {
        let balancer = self.balancer.stats();
        let history = self.scan_history.lock();
        let error_rate = {
            let nodes = self.balancer.nodes();
            if nodes.is_empty() {
                0.0
            } else {
                nodes.iter().map(|n| n.error_rate).sum::<f64>() / nodes.len() as f64
            }
        };
        PerformanceMetrics {
            cpu_percent: (self.active_scans.load(Ordering::SeqCst) as f64
                / self.config.max_agent_concurrency.max(1) as f64
                * 100.0)
                .min(100.0),
            memory_percent: 0.0,
            avg_response_time: balancer.avg_response_time,
            error_rate,
            queue_length,
            requests_per_second: history
                .back()
                .map(|(duration, tests)| {
                    if *duration > 0.0 {
                        *tests as f64 / *duration
                    } else {
                        0.0
                    }
                })
                .unwrap_or(0.0),
            timestamp: PerformanceMetrics::now(),
        }
    }

    /// Resizes the balancer pool to match an applied scaling decision.
    fn apply_scaling(&self, decision: &ScalingDecision) {
        match decision.action {
            ScalingAction::ScaleUp => {
                let current = self.balancer.node_count();
                for i in current..decision.target_instances {
                    self.balancer.add_node(format!("worker-{}", i), 1.0);
                }
            }
            ScalingAction::ScaleDown => {
                let mut current = self.balancer.node_count();
                while current > decision.target_instances.max(1) {
                    current -= 1;
                    self.balancer.remove_node(&format!("worker-{}", current));
                }
            }
            ScalingAction::NoOp => {}
        }
    }

    fn error_result(agent_name: &str, err: &ScannerError) -> ScanResult {
        let mut result = ScanResult::assemble(
            agent_name,
            serde_json::json!({ "scan_error": err.to_string() }),
            Vec::new(),
            0.0,
            0,
            SCANNER_VERSION,
        );
        result.incomplete = true;
        result
    }
}

/// Nearest-rank percentile over an unsorted sample.
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((sorted.len() as f64 - 1.0) * pct / 100.0).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
