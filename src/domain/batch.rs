// Batch domain model
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::MonitorError;
use super::series::Series;

pub const MIN_BATCH_ID: u8 = 1;
pub const MAX_BATCH_ID: u8 = 4;

/// Identifier of one simulated fermentation run, always within 1..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct BatchId(u8);

impl BatchId {
    pub fn new(id: i64) -> Result<Self, MonitorError> {
        if id < MIN_BATCH_ID as i64 || id > MAX_BATCH_ID as i64 {
            return Err(MonitorError::InvalidBatchId(id));
        }
        Ok(Self(id as u8))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// All batch ids in processing order.
    pub fn all() -> impl Iterator<Item = BatchId> {
        (MIN_BATCH_ID..=MAX_BATCH_ID).map(BatchId)
    }
}

impl TryFrom<i64> for BatchId {
    type Error = MonitorError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        BatchId::new(value)
    }
}

impl From<BatchId> for u8 {
    fn from(id: BatchId) -> Self {
        id.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// States that an alert can be raised about.
pub trait AlertLevel: Copy + Eq + fmt::Display + Send + Sync + 'static {
    /// Whether this level is worse than the best possible state.
    fn is_degraded(&self) -> bool;
}

/// Score-banded status published on the streaming path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Perfect,
    Acceptable,
    Concerning,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Perfect => "perfect",
            BatchStatus::Acceptable => "acceptable",
            BatchStatus::Concerning => "concerning",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AlertLevel for BatchStatus {
    fn is_degraded(&self) -> bool {
        *self != BatchStatus::Perfect
    }
}

/// Threshold-rule status for a single parameter or a full-series assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterStatus {
    Normal,
    Warning,
    Critical,
}

impl ParameterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterStatus::Normal => "normal",
            ParameterStatus::Warning => "warning",
            ParameterStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for ParameterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AlertLevel for ParameterStatus {
    fn is_degraded(&self) -> bool {
        *self != ParameterStatus::Normal
    }
}

/// A pre-materialized batch run plus the metadata it was generated with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProfile {
    pub series: Series,
    /// Quality class the profile was designed to land in.
    pub target_status: BatchStatus,
    pub expected_quality_score: f64,
    #[serde(default)]
    pub description: String,
}
