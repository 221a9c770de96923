//! Autoscaler
//!
//! Threshold plus trend driven instance-count controller. Decisions are
//! gated by a cooldown and require a minimum window of metric samples;
//! confidence blends reason count with metric consistency.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

const METRICS_CAP: usize = 1_000;
const DECISIONS_CAP: usize = 100;
const MIN_WINDOW: usize = 5;

/// One sample of aggregate engine performance.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub queue_length: usize,
    pub requests_per_second: f64,
    pub timestamp: f64,
}

impl PerformanceMetrics {
    pub fn now() -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoOp,
}

/// A scaling decision with its reasoning and confidence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub target_instances: usize,
    pub current_instances: usize,
    pub reasoning: String,
    pub confidence: f64,
    pub metrics_snapshot: PerformanceMetrics,
    pub timestamp: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoScalerConfig {
    pub min_instances: usize,
    pub max_instances: usize,
    pub cooldown: f64,
    pub cpu_scale_up_threshold: f64,
    pub cpu_scale_down_threshold: f64,
    pub response_time_threshold: f64,
    pub queue_length_threshold: usize,
    pub error_rate_threshold: f64,
    /// Decisions below this confidence are logged but not applied.
    pub min_confidence: f64,
}

impl Default for AutoScalerConfig {
    fn default() -> Self {
        AutoScalerConfig {
            min_instances: 1,
            max_instances: 10,
            cooldown: 60.0,
            cpu_scale_up_threshold: 70.0,
            cpu_scale_down_threshold: 30.0,
            response_time_threshold: 2.0,
            queue_length_threshold: 10,
            error_rate_threshold: 0.05,
            min_confidence: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AutoScalerStats {
    pub current_instances: usize,
    pub min_instances: usize,
    pub max_instances: usize,
    pub total_decisions: usize,
    pub cooldown_remaining: f64,
}

struct ScalerInner {
    current_instances: usize,
    metrics_history: VecDeque<PerformanceMetrics>,
    decision_history: VecDeque<ScalingDecision>,
    last_decision: Option<Instant>,
}

pub struct AutoScaler {
    config: AutoScalerConfig,
    inner: Mutex<ScalerInner>,
}

impl AutoScaler {
    pub fn new(config: AutoScalerConfig) -> Self {
        let current = config.min_instances;
        AutoScaler {
            config,
            inner: Mutex::new(ScalerInner {
                current_instances: current,
                metrics_history: VecDeque::new(),
                decision_history: VecDeque::new(),
                last_decision: None,
            }),
        }
    }

    pub fn current_instances(&self) -> usize {
        self.inner.lock().current_instances
    }

    /// Records a metric sample without making a decision.
    pub fn record_metrics(&self, metrics: PerformanceMetrics) {
        let mut inner = self.inner.lock();
        Self::push_metrics(&mut inner, metrics);
    }

    /// Ingests a sample and, cooldown and window permitting, decides.
    ///
    /// Returns `None` while gated; low-confidence decisions are recorded
    /// as NoOp without changing the instance count.
    pub fn analyze(&self, metrics: PerformanceMetrics) -> Option<ScalingDecision> {
        let mut inner = self.inner.lock();
        Self::push_metrics(&mut inner, metrics.clone());

        if let Some(last) = inner.last_decision {
            if last.elapsed().as_secs_f64() < self.config.cooldown {
                return None;
            }
        }
        if inner.metrics_history.len() < MIN_WINDOW {
            return None;
        }

        let recent: Vec<PerformanceMetrics> = inner
            .metrics_history
            .iter()
            .rev()
            .take(10)
            .cloned()
            .collect();
        let cpu_trend = trend(&collect(&recent, |m| m.cpu_percent));
        let rtt_trend = trend(&collect(&recent, |m| m.avg_response_time));

        let mut up_reasons = Vec::new();
        let mut down_reasons = Vec::new();

        if metrics.cpu_percent > self.config.cpu_scale_up_threshold {
            up_reasons.push(format!("High CPU usage: {:.1}%", metrics.cpu_percent));
        } else if metrics.cpu_percent < self.config.cpu_scale_down_threshold {
            down_reasons.push(format!("Low CPU usage: {:.1}%", metrics.cpu_percent));
        }

        if metrics.avg_response_time > self.config.response_time_threshold {
            up_reasons.push(format!(
                "High response time: {:.2}s",
                metrics.avg_response_time
            ));
        } else if metrics.avg_response_time < self.config.response_time_threshold * 0.3 {
            down_reasons.push(format!(
                "Low response time: {:.2}s",
                metrics.avg_response_time
            ));
        }

        if metrics.queue_length > self.config.queue_length_threshold {
            up_reasons.push(format!("High queue length: {}", metrics.queue_length));
        }

        if metrics.error_rate > self.config.error_rate_threshold {
            up_reasons.push(format!("High error rate: {:.3}", metrics.error_rate));
        }

        if cpu_trend > 5.0 || rtt_trend > 0.5 {
            up_reasons.push("Increasing resource pressure trend".to_string());
        } else if cpu_trend < -5.0 && rtt_trend < -0.2 {
            down_reasons.push("Decreasing resource pressure trend".to_string());
        }

        let decision = if !up_reasons.is_empty()
            && inner.current_instances < self.config.max_instances
        {
            let increment = Self::scale_up_increment(&recent);
            let target =
                (inner.current_instances + increment).min(self.config.max_instances);
            Some((ScalingAction::ScaleUp, target, up_reasons))
        } else if up_reasons.is_empty()
            && !down_reasons.is_empty()
            && inner.current_instances > self.config.min_instances
        {
            let target =
                (inner.current_instances - 1).max(self.config.min_instances);
            Some((ScalingAction::ScaleDown, target, down_reasons))
        } else {
            None
        };

        let (action, target, reasons) = decision?;
        let confidence = Self::confidence(&reasons, &recent);
        let applied = confidence >= self.config.min_confidence;

        let decision = ScalingDecision {
            action: if applied { action } else { ScalingAction::NoOp },
            target_instances: if applied {
                target
            } else {
                inner.current_instances
            },
            current_instances: inner.current_instances,
            reasoning: reasons.join("; "),
            confidence,
            metrics_snapshot: metrics,
            timestamp: PerformanceMetrics::now(),
        };

        inner.last_decision = Some(Instant::now());
        if applied {
            info!(
                "📈 [AutoScaler] {:?}: {} -> {} ({:.0}% confident: {})",
                action, decision.current_instances, target, confidence * 100.0, decision.reasoning
            );
            inner.current_instances = target;
        } else {
            info!(
                "📈 [AutoScaler] Decision below confidence threshold ({:.2}), not applied",
                confidence
            );
        }

        if inner.decision_history.len() >= DECISIONS_CAP {
            inner.decision_history.pop_front();
        }
        inner.decision_history.push_back(decision.clone());
        Some(decision)
    }

    /// Projects each watched metric one horizon ahead on its linear trend.
    pub fn project(&self, horizon: f64) -> Option<PerformanceMetrics> {
        let inner = self.inner.lock();
        if inner.metrics_history.len() < 2 {
            return None;
        }
        let recent: Vec<PerformanceMetrics> = inner
            .metrics_history
            .iter()
            .rev()
            .take(10)
            .cloned()
            .collect();
        let last = inner.metrics_history.back()?.clone();
        Some(PerformanceMetrics {
            cpu_percent: (last.cpu_percent + trend(&collect(&recent, |m| m.cpu_percent)) * horizon)
                .max(0.0),
            memory_percent: last.memory_percent,
            avg_response_time: (last.avg_response_time
                + trend(&collect(&recent, |m| m.avg_response_time)) * horizon)
                .max(0.0),
            error_rate: last.error_rate,
            queue_length: last.queue_length,
            requests_per_second: last.requests_per_second,
            timestamp: last.timestamp + horizon,
        })
    }

    pub fn decision_history(&self) -> Vec<ScalingDecision> {
        self.inner.lock().decision_history.iter().cloned().collect()
    }

    pub fn stats(&self) -> AutoScalerStats {
        let inner = self.inner.lock();
        let cooldown_remaining = inner
            .last_decision
            .map(|t| (self.config.cooldown - t.elapsed().as_secs_f64()).max(0.0))
            .unwrap_or(0.0);
        AutoScalerStats {
            current_instances: inner.current_instances,
            min_instances: self.config.min_instances,
            max_instances: self.config.max_instances,
            total_decisions: inner.decision_history.len(),
            cooldown_remaining,
        }
    }

    fn push_metrics(inner: &mut ScalerInner, metrics: PerformanceMetrics) {
        if inner.metrics_history.len() >= METRICS_CAP {
            inner.metrics_history.pop_front();
        }
        inner.metrics_history.push_back(metrics);
    }

    /// 3 instances in an emergency, 2 under pressure, 1 otherwise.
    fn scale_up_increment(recent: &[PerformanceMetrics]) -> usize {
        let window: Vec<f64> = recent.iter().take(5).map(|m| m.cpu_percent).collect();
        if window.is_empty() {
            return 1;
        }
        let avg = window.iter().sum::<f64>() / window.len() as f64;
        if avg > 90.0 {
            3
        } else if avg > 80.0 {
            2
        } else {
            1
        }
    }

    /// Base 0.5, +0.2 per reason (cap 0.4), plus a consistency bonus of
    /// up to 0.3 when recent CPU variance is low.
    fn confidence(reasons: &[String], recent: &[PerformanceMetrics]) -> f64 {
        let reason_factor = (reasons.len() as f64 * 0.2).min(0.4);
        let consistency_factor = if recent.len() >= 3 {
            let cpu: Vec<f64> = recent.iter().map(|m| m.cpu_percent).collect();
            let mean = cpu.iter().sum::<f64>() / cpu.len() as f64;
            let variance =
                cpu.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (cpu.len() - 1) as f64;
            (0.3 - variance / 100.0).max(0.0)
        } else {
            0.0
        };
        (0.5 + reason_factor + consistency_factor).min(1.0)
    }
}

impl Default for AutoScaler {
    fn default() -> Self {
        Self::new(AutoScalerConfig::default())
    }
}

fn collect(metrics: &[PerformanceMetrics], f: impl Fn(&PerformanceMetrics) -> f64) -> Vec<f64> {
    // History iterates newest-first; trends want chronological order.
    metrics.iter().rev().map(f).collect()
}

/// Least-squares slope over equally spaced samples.
fn trend(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..n).map(|i| (i as f64).powi(2)).sum();
    let denominator = n_f * sum_x2 - sum_x.powi(2);
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    (n_f * sum_xy - sum_x * sum_y) / denominator
}
