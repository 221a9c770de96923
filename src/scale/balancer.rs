//! Load balancer for multi-agent fan-out
//!
//! Ordered worker-node set with five selection strategies and per-node
//! health scoring. Metric updates use exponential moving averages, so
//! stale reads between selection and update are acceptable.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{info, warn};

const EMA_ALPHA: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    Adaptive,
    IpHash,
}

/// One worker in the pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: String,
    pub weight: f64,
    pub current_connections: u32,
    pub total_requests: u64,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub health_score: f64,
    pub last_health_check: f64,
    pub is_healthy: bool,
}

impl WorkerNode {
    fn new(id: String, weight: f64) -> Self {
        WorkerNode {
            id,
            weight,
            current_connections: 0,
            total_requests: 0,
            avg_response_time: 0.0,
            error_rate: 0.0,
            health_score: 1.0,
            last_health_check: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            is_healthy: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BalancerStats {
    pub strategy: BalancingStrategy,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub total_requests: u64,
    pub avg_response_time: f64,
}

struct BalancerInner {
    nodes: Vec<WorkerNode>,
    rr_index: usize,
}

pub struct LoadBalancer {
    strategy: BalancingStrategy,
    /// Nodes below this health score are marked unhealthy.
    health_floor: f64,
    inner: Mutex<BalancerInner>,
}

impl LoadBalancer {
    pub fn new(strategy: BalancingStrategy) -> Self {
        Self::with_health_floor(strategy, 0.3)
    }

    pub fn with_health_floor(strategy: BalancingStrategy, health_floor: f64) -> Self {
        LoadBalancer {
            strategy,
            health_floor,
            inner: Mutex::new(BalancerInner {
                nodes: Vec::new(),
                rr_index: 0,
            }),
        }
    }

    pub fn add_node(&self, node_id: impl Into<String>, weight: f64) {
        let node_id = node_id.into();
        let mut inner = self.inner.lock();
        if inner.nodes.iter().any(|n| n.id == node_id) {
            warn!("⚖️  [Balancer] Node '{}' already registered", node_id);
            return;
        }
        info!("⚖️  [Balancer] Added node '{}' (weight {:.1})", node_id, weight);
        inner.nodes.push(WorkerNode::new(node_id, weight.max(0.0)));
    }

    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.nodes.len();
        inner.nodes.retain(|n| n.id != node_id);
        before != inner.nodes.len()
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Picks a healthy node under the configured strategy.
    ///
    /// `key` feeds the IpHash strategy; other strategies ignore it.
    pub fn select_node(&self, key: Option<&str>) -> Option<WorkerNode> {
        let mut inner = self.inner.lock();
        let healthy: Vec<usize> = inner
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_healthy)
            .map(|(i, _)| i)
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let pick = match self.strategy {
            BalancingStrategy::RoundRobin => {
                inner.rr_index = (inner.rr_index + 1) % healthy.len();
                healthy[inner.rr_index]
            }
            BalancingStrategy::LeastConnections => *healthy
                .iter()
                .min_by_key(|i| inner.nodes[**i].current_connections)
                .expect("non-empty healthy set"),
            BalancingStrategy::WeightedRoundRobin => {
                let total: f64 = healthy.iter().map(|i| inner.nodes[*i].weight).sum();
                if total <= 0.0 {
                    healthy[0]
                } else {
                    let draw = rand::thread_rng().gen_range(0.0..total);
                    let mut cumulative = 0.0;
                    let mut chosen = *healthy.last().expect("non-empty healthy set");
                    for i in &healthy {
                        cumulative += inner.nodes[*i].weight;
                        if draw <= cumulative {
                            chosen = *i;
                            break;
                        }
                    }
                    chosen
                }
            }
            BalancingStrategy::Adaptive => {
                let mut best = healthy[0];
                let mut best_score = f64::MIN;
                for i in &healthy {
                    let node = &inner.nodes[*i];
                    let connection_factor = 1.0 / (node.current_connections as f64 + 1.0);
                    let response_factor = 1.0 / (node.avg_response_time + 0.001);
                    let error_factor = 1.0 / (node.error_rate + 0.001);
                    let score = connection_factor * 0.3
                        + response_factor * 0.25
                        + error_factor * 0.25
                        + node.health_score * 0.1
                        + node.weight * 0.1;
                    if score > best_score {
                        best_score = score;
                        best = *i;
                    }
                }
                best
            }
            BalancingStrategy::IpHash => {
                let mut hasher = DefaultHasher::new();
                key.unwrap_or("").hash(&mut hasher);
                healthy[(hasher.finish() as usize) % healthy.len()]
            }
        };

        Some(inner.nodes[pick].clone())
    }

    pub fn increment_connections(&self, node_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.nodes.iter_mut().find(|n| n.id == node_id) {
            node.current_connections += 1;
        }
    }

    pub fn decrement_connections(&self, node_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.nodes.iter_mut().find(|n| n.id == node_id) {
            node.current_connections = node.current_connections.saturating_sub(1);
        }
    }

    /// Folds one observation into the node's EMAs and health score.
    pub fn update_node_metrics(&self, node_id: &str, response_time: f64, is_error: bool) {
        let mut inner = self.inner.lock();
        let floor = self.health_floor;
        if let Some(node) = inner.nodes.iter_mut().find(|n| n.id == node_id) {
            node.total_requests += 1;
            node.avg_response_time =
                EMA_ALPHA * response_time + (1.0 - EMA_ALPHA) * node.avg_response_time;
            let error_sample = if is_error { 1.0 } else { 0.0 };
            node.error_rate = EMA_ALPHA * error_sample + (1.0 - EMA_ALPHA) * node.error_rate;

            if node.error_rate < 0.01 && node.avg_response_time < 1.0 {
                node.health_score = (node.health_score + 0.01).min(1.0);
            } else {
                node.health_score = (node.health_score - 0.05).max(0.1);
            }
            node.last_health_check = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;

            let was_healthy = node.is_healthy;
            node.is_healthy = node.health_score >= floor;
            if was_healthy && !node.is_healthy {
                warn!(
                    "⚖️  [Balancer] Node '{}' marked unhealthy (score {:.2})",
                    node.id, node.health_score
                );
            }
        }
    }

    /// Marks a node unhealthy regardless of its score (breaker opened).
    pub fn quarantine_node(&self, node_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.nodes.iter_mut().find(|n| n.id == node_id) {
            node.is_healthy = false;
            warn!("⚖️  [Balancer] Node '{}' quarantined", node_id);
        }
    }

    pub fn nodes(&self) -> Vec<WorkerNode> {
        self.inner.lock().nodes.clone()
    }

    pub fn stats(&self) -> BalancerStats {
        let inner = self.inner.lock();
        let total_requests = inner.nodes.iter().map(|n| n.total_requests).sum();
        let avg_response_time = if inner.nodes.is_empty() {
            0.0
        } else {
            inner.nodes.iter().map(|n| n.avg_response_time).sum::<f64>()
                / inner.nodes.len() as f64
        };
        BalancerStats {
            strategy: self.strategy,
            total_nodes: inner.nodes.len(),
            healthy_nodes: inner.nodes.iter().filter(|n| n.is_healthy).count(),
            total_requests,
            avg_response_time,
        }
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(BalancingStrategy::Adaptive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer_with_nodes(strategy: BalancingStrategy, count: usize) -> LoadBalancer {
        let balancer = LoadBalancer::new(strategy);
        for i in 0..count {
            balancer.add_node(format!("worker-{}", i), 1.0);
        }
        balancer
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let balancer = LoadBalancer::new(BalancingStrategy::RoundRobin);
        assert!(balancer.select_node(None).is_none());
    }

    #[test]
    fn round_robin_cycles_through_nodes() {
        let balancer = balancer_with_nodes(BalancingStrategy::RoundRobin, 3);
        let picks: Vec<String> = (0..6)
            .map(|_| balancer.select_node(None).unwrap().id)
            .collect();
        assert_eq!(picks[0], picks[3]);
        assert_eq!(picks[1], picks[4]);
        assert_ne!(picks[0], picks[1]);
    }

    #[test]
    fn least_connections_prefers_idle_node() {
        let balancer = balancer_with_nodes(BalancingStrategy::LeastConnections, 3);
        balancer.increment_connections("worker-0");
        balancer.increment_connections("worker-1");
        assert_eq!(balancer.select_node(None).unwrap().id, "worker-2");
    }

    #[test]
    fn ip_hash_is_stable_per_key() {
        let balancer = balancer_with_nodes(BalancingStrategy::IpHash, 4);
        let first = balancer.select_node(Some("client-a")).unwrap().id;
        for _ in 0..5 {
            assert_eq!(balancer.select_node(Some("client-a")).unwrap().id, first);
        }
    }

    #[test]
    fn adaptive_avoids_slow_erroring_nodes() {
        let balancer = balancer_with_nodes(BalancingStrategy::Adaptive, 2);
        for _ in 0..10 {
            balancer.update_node_metrics("worker-0", 5.0, true);
            balancer.update_node_metrics("worker-1", 0.05, false);
        }
        assert_eq!(balancer.select_node(None).unwrap().id, "worker-1");
    }

    #[test]
    fn ema_updates_response_time() {
        let balancer = balancer_with_nodes(BalancingStrategy::Adaptive, 1);
        balancer.update_node_metrics("worker-0", 1.0, false);
        let node = &balancer.nodes()[0];
        assert!((node.avg_response_time - 0.1).abs() < 1e-9);
        assert_eq!(node.total_requests, 1);
    }

    #[test]
    fn repeated_errors_degrade_health_until_unhealthy() {
        let balancer = balancer_with_nodes(BalancingStrategy::RoundRobin, 2);
        for _ in 0..20 {
            balancer.update_node_metrics("worker-0", 3.0, true);
        }
        let node = balancer
            .nodes()
            .into_iter()
            .find(|n| n.id == "worker-0")
            .unwrap();
        assert!(!node.is_healthy);
        assert!(node.health_score >= 0.1);
        // Unhealthy nodes are skipped by selection.
        for _ in 0..4 {
            assert_eq!(balancer.select_node(None).unwrap().id, "worker-1");
        }
    }

    #[test]
    fn health_score_is_clamped() {
        let balancer = balancer_with_nodes(BalancingStrategy::RoundRobin, 1);
        for _ in 0..200 {
            balancer.update_node_metrics("worker-0", 0.01, false);
        }
        assert!(balancer.nodes()[0].health_score <= 1.0);
    }

    #[test]
    fn quarantine_removes_node_from_rotation() {
        let balancer = balancer_with_nodes(BalancingStrategy::RoundRobin, 2);
        balancer.quarantine_node("worker-0");
        for _ in 0..4 {
            assert_eq!(balancer.select_node(None).unwrap().id, "worker-1");
        }
    }

    #[test]
    fn weighted_draw_respects_zero_weight() {
        let balancer = LoadBalancer::new(BalancingStrategy::WeightedRoundRobin);
        balancer.add_node("heavy", 1.0);
        balancer.add_node("zero", 0.0);
        for _ in 0..20 {
            assert_eq!(balancer.select_node(None).unwrap().id, "heavy");
        }
    }
}
