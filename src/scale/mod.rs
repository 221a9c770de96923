//! Scaling layer
//!
//! Multi-strategy load balancing over worker nodes plus a cooldown-gated
//! autoscaler driven by aggregate performance metrics.

pub mod autoscaler;
pub mod balancer;

pub use autoscaler::{
    AutoScaler, AutoScalerConfig, PerformanceMetrics, ScalingAction, ScalingDecision,
};
pub use balancer::{BalancerStats, BalancingStrategy, LoadBalancer, WorkerNode};
