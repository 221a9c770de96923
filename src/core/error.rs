//! Error taxonomy for the scanning engine
//!
//! Probe-level failures are absorbed into sentinel results so a scan can
//! continue; validation and internal failures propagate to the caller.

use thiserror::Error;

/// Failure raised by an agent handle while answering a probe.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("agent query timed out")]
    Timeout,
    #[error("agent connection failed: {0}")]
    Connection(String),
    #[error("agent returned malformed output: {0}")]
    Logic(String),
}

/// Failure of a single probe execution, after transport and reliability
/// layers have had their say.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:.1}s")]
    Timeout(f64),
    #[error("probe transport failed: {0}")]
    Connection(String),
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),
    #[error("agent logic failure: {0}")]
    Logic(String),
    #[error("response evaluation failed: {0}")]
    Evaluation(String),
}

impl ProbeError {
    /// Transport-class failures are worth retrying; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Timeout(_) | ProbeError::Connection(_))
    }
}

impl From<AgentError> for ProbeError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Timeout => ProbeError::Timeout(0.0),
            AgentError::Connection(msg) => ProbeError::Connection(msg),
            AgentError::Logic(msg) => ProbeError::Logic(msg),
        }
    }
}

/// Scan-fatal failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("agent validation failed: {0:?}")]
    Validation(Vec<String>),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("payload generation failed for pattern '{pattern}': {message}")]
    PayloadGeneration { pattern: String, message: String },
    #[error("internal failure: {0}")]
    Internal(String),
}
