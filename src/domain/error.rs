// Error taxonomy for the monitoring core
use thiserror::Error;

/// Errors surfaced to callers of the monitoring core.
///
/// Degenerate numeric input (constant series, empty overlap) is not an
/// error: the scorers return sentinel values instead.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("reference series unavailable")]
    ReferenceUnavailable,

    #[error("batch id {0} is outside 1..=4")]
    InvalidBatchId(i64),

    #[error("invalid series: {0}")]
    InvalidSeries(String),

    #[error("insufficient data: need at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no data available for batch {0} yet")]
    NotAvailable(u8),
}
