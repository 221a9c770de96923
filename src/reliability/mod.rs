//! Reliability layer
//!
//! Failure isolation and controlled recovery:
//! - Circuit breakers per downstream dependency
//! - Retry controller with exponential backoff
//! - Graceful degradation tiers with rollback-capable actions

pub mod circuit;
pub mod degradation;
pub mod retry;

pub use circuit::{BreakerManager, CircuitBreaker, CircuitConfig, CircuitState, ManagerHealth};
pub use degradation::{DegradationLevel, DegradationManager, ScanControls};
pub use retry::RetryPolicy;
