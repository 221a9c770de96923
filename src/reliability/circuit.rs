//! Circuit breakers for downstream dependencies
//!
//! Closed → Open on consecutive failures, Open → HalfOpen after the
//! recovery timeout, HalfOpen → Closed on consecutive successes and back
//! to Open on any failure. Open circuits reject calls without invoking
//! the protected operation.

use crate::core::error::ProbeError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Seconds to wait in Open before probing recovery.
    pub recovery_timeout: f64,
    /// Consecutive successes to close from HalfOpen.
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            failure_threshold: 5,
            recovery_timeout: 30.0,
            success_threshold: 3,
        }
    }
}

/// Counters exposed for observability.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CircuitStats {
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_age: Option<f64>,
    pub last_success_age: Option<f64>,
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
}

type TransitionCallback = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<CircuitInner>,
    callbacks: Mutex<Vec<TransitionCallback>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let name = name.into();
        debug!("⚡ [Breaker] '{}' initialized: {:?}", name, config);
        CircuitBreaker {
            name,
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                total_calls: 0,
                total_failures: 0,
                total_successes: 0,
                last_failure_time: None,
                last_success_time: None,
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.refresh_state(&mut inner);
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Registers a callback fired on every state transition.
    pub fn on_transition(&self, callback: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Admission check; counts the call and rejects while Open.
    pub fn try_acquire(&self) -> Result<(), ProbeError> {
        let (state, transition) = {
            let mut inner = self.inner.lock();
            inner.total_calls += 1;
            let transition = self.refresh_state(&mut inner);
            (inner.state, transition)
        };
        self.notify(transition);
        match state {
            CircuitState::Open => {
                warn!("🚫 [Breaker] '{}' is OPEN - rejecting call", self.name);
                Err(ProbeError::CircuitOpen(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.success_count += 1;
            inner.total_successes += 1;
            inner.last_success_time = Some(Instant::now());
            match inner.state {
                CircuitState::HalfOpen => {
                    if inner.success_count >= self.config.success_threshold {
                        self.transition(&mut inner, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::Open => None,
            }
        };
        self.notify(transition);
    }

    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count += 1;
            inner.total_failures += 1;
            inner.last_failure_time = Some(Instant::now());
            inner.success_count = 0;
            match inner.state {
                CircuitState::Closed => {
                    if inner.failure_count >= self.config.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
                CircuitState::Open => None,
            }
        };
        self.notify(transition);
    }

    /// Runs `op` under breaker protection, recording the outcome.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ProbeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProbeError>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Operator override: force the circuit closed and wipe counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            info!("✅ [Breaker] '{}' manually reset", self.name);
            inner.failure_count = 0;
            inner.success_count = 0;
            self.transition(&mut inner, CircuitState::Closed)
        };
        self.notify(transition);
    }

    /// Operator override: trip the circuit open.
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            warn!("🚨 [Breaker] '{}' manually forced open", self.name);
            inner.last_failure_time = Some(Instant::now());
            self.transition(&mut inner, CircuitState::Open)
        };
        self.notify(transition);
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        CircuitStats {
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            last_failure_age: inner.last_failure_time.map(|t| t.elapsed().as_secs_f64()),
            last_success_age: inner.last_success_time.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Open → HalfOpen once the recovery timeout has elapsed.
    fn refresh_state(&self, inner: &mut CircuitInner) -> Option<(CircuitState, CircuitState)> {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure_time
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(f64::MAX);
            if elapsed >= self.config.recovery_timeout {
                return self.transition(inner, CircuitState::HalfOpen);
            }
        }
        None
    }

    fn transition(
        &self,
        inner: &mut CircuitInner,
        to: CircuitState,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        if to == CircuitState::HalfOpen {
            inner.success_count = 0;
        }
        info!("⚡ [Breaker] '{}': {} -> {}", self.name, from, to);
        Some((from, to))
    }

    /// Fires transition callbacks outside the state lock.
    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition {
            for callback in self.callbacks.lock().iter() {
                callback(from, to);
            }
        }
    }
}

/// Aggregate health over a set of breakers.
#[derive(Clone, Debug, Serialize)]
pub struct ManagerHealth {
    pub status: String,
    pub total: usize,
    pub open: usize,
}

impl ManagerHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Name-keyed breaker collection shared across the scanner.
pub struct BreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitConfig,
}

impl BreakerManager {
    pub fn new(default_config: CircuitConfig) -> Self {
        BreakerManager {
            breakers: DashMap::new(),
            default_config,
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config.clone())))
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn all_stats(&self) -> Vec<(String, CircuitState, CircuitStats)> {
        self.breakers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().state(),
                    entry.value().stats(),
                )
            })
            .collect()
    }

    /// `healthy` with no open circuits, `degraded` under half open,
    /// `unhealthy` otherwise.
    pub fn health(&self) -> ManagerHealth {
        let total = self.breakers.len();
        let open = self
            .breakers
            .iter()
            .filter(|entry| entry.value().is_open())
            .count();
        let status = if open == 0 {
            "healthy"
        } else if (open as f64) < (total as f64) * 0.5 {
            "degraded"
        } else {
            "unhealthy"
        };
        ManagerHealth {
            status: status.to_string(),
            total,
            open,
        }
    }
}

impl Default for BreakerManager {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
