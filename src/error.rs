use thiserror::Error;

#[derive(Debug, Error)]
pub enum CmError {
    #[error("agent binary unavailable: {0}")]
    AgentUnavailable(String),
    #[error("daemon config invalid: {0}")]
    InvalidConfig(String),
    #[error("invalid interval {0}: provide a positive number of hours")]
    InvalidInterval(f64),
}
