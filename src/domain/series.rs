// Time series domain model for fermentation readings
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::MonitorError;

/// Number of monitored process parameters.
pub const PARAMETER_COUNT: usize = 3;

/// A single multivariate point (ph, temperature, co2).
pub type FeatureVector = [f64; PARAMETER_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Ph,
    Temperature,
    Co2,
}

impl Parameter {
    pub const ALL: [Parameter; PARAMETER_COUNT] =
        [Parameter::Ph, Parameter::Temperature, Parameter::Co2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Ph => "ph",
            Parameter::Temperature => "temperature",
            Parameter::Co2 => "co2",
        }
    }

    /// Short label used in anomaly classifications ("temp" rather than "temperature").
    pub fn short_name(&self) -> &'static str {
        match self {
            Parameter::Ph => "ph",
            Parameter::Temperature => "temp",
            Parameter::Co2 => "co2",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per parameter, serialized as `{ph, temperature, co2}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerParameter<T> {
    pub ph: T,
    pub temperature: T,
    pub co2: T,
}

impl<T> PerParameter<T> {
    pub fn new(ph: T, temperature: T, co2: T) -> Self {
        Self { ph, temperature, co2 }
    }

    pub fn from_fn(mut f: impl FnMut(Parameter) -> T) -> Self {
        Self {
            ph: f(Parameter::Ph),
            temperature: f(Parameter::Temperature),
            co2: f(Parameter::Co2),
        }
    }

    pub fn get(&self, parameter: Parameter) -> &T {
        match parameter {
            Parameter::Ph => &self.ph,
            Parameter::Temperature => &self.temperature,
            Parameter::Co2 => &self.co2,
        }
    }

    /// `(parameter, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, &T)> + '_ {
        Parameter::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

/// Actual, ideal or deviation values for the three parameters.
pub type Reading = PerParameter<f64>;

impl PerParameter<f64> {
    pub fn value(&self, parameter: Parameter) -> f64 {
        *self.get(parameter)
    }

    pub fn to_vector(&self) -> FeatureVector {
        [self.ph, self.temperature, self.co2]
    }

    /// Absolute per-parameter difference.
    pub fn abs_diff(&self, other: &Reading) -> Reading {
        Reading::from_fn(|p| (self.value(p) - other.value(p)).abs())
    }
}

/// A timestamped reading. `timestamp` is in hours since batch start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub ph: f64,
    pub temperature: f64,
    pub co2: f64,
}

impl Sample {
    pub fn new(timestamp: f64, ph: f64, temperature: f64, co2: f64) -> Self {
        Self {
            timestamp,
            ph,
            temperature,
            co2,
        }
    }

    pub fn reading(&self) -> Reading {
        Reading::new(self.ph, self.temperature, self.co2)
    }
}

/// Column-oriented wire shape: `{timestamps, ph, temperature, co2}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesColumns {
    pub timestamps: Vec<f64>,
    pub ph: Vec<f64>,
    pub temperature: Vec<f64>,
    pub co2: Vec<f64>,
}

/// Ordered, validated sequence of samples.
///
/// Timestamps are strictly increasing and every value is finite. A series
/// is immutable once built.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(into = "SeriesColumns")]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    pub fn new(samples: Vec<Sample>) -> Result<Self, MonitorError> {
        for (idx, sample) in samples.iter().enumerate() {
            let finite = sample.timestamp.is_finite()
                && sample.ph.is_finite()
                && sample.temperature.is_finite()
                && sample.co2.is_finite();
            if !finite {
                return Err(MonitorError::InvalidSeries(format!(
                    "non-finite value at index {}",
                    idx
                )));
            }
            if idx > 0 && sample.timestamp <= samples[idx - 1].timestamp {
                return Err(MonitorError::InvalidSeries(format!(
                    "timestamps not strictly increasing at index {}",
                    idx
                )));
            }
        }
        Ok(Self { samples })
    }

    pub fn from_columns(columns: SeriesColumns) -> Result<Self, MonitorError> {
        let len = columns.timestamps.len();
        if columns.ph.len() != len || columns.temperature.len() != len || columns.co2.len() != len {
            return Err(MonitorError::InvalidSeries(format!(
                "column lengths differ: timestamps={}, ph={}, temperature={}, co2={}",
                len,
                columns.ph.len(),
                columns.temperature.len(),
                columns.co2.len()
            )));
        }

        let samples = (0..len)
            .map(|i| {
                Sample::new(
                    columns.timestamps[i],
                    columns.ph[i],
                    columns.temperature[i],
                    columns.co2[i],
                )
            })
            .collect();
        Self::new(samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Values of one parameter in sample order.
    pub fn values(&self, parameter: Parameter) -> Vec<f64> {
        self.samples.iter().map(|s| s.reading().value(parameter)).collect()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    pub fn vectors(&self) -> Vec<FeatureVector> {
        self.samples.iter().map(|s| s.reading().to_vector()).collect()
    }

    /// First `len` samples. A prefix of a valid series is valid.
    pub fn truncated(&self, len: usize) -> Series {
        Series {
            samples: self.samples[..len.min(self.samples.len())].to_vec(),
        }
    }

    pub fn to_columns(&self) -> SeriesColumns {
        SeriesColumns {
            timestamps: self.timestamps(),
            ph: self.values(Parameter::Ph),
            temperature: self.values(Parameter::Temperature),
            co2: self.values(Parameter::Co2),
        }
    }
}

impl From<Series> for SeriesColumns {
    fn from(series: Series) -> Self {
        series.to_columns()
    }
}

impl TryFrom<SeriesColumns> for Series {
    type Error = MonitorError;

    fn try_from(columns: SeriesColumns) -> Result<Self, Self::Error> {
        Series::from_columns(columns)
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let columns = SeriesColumns::deserialize(deserializer)?;
        Series::from_columns(columns).map_err(serde::de::Error::custom)
    }
}

/// Truncate both series to the shorter length from the start. No resampling.
pub fn align(generated: &Series, reference: &Series) -> (Series, Series) {
    if generated.len() == reference.len() {
        return (generated.clone(), reference.clone());
    }
    let len = generated.len().min(reference.len());
    (generated.truncated(len), reference.truncated(len))
}

#[cfg(test)]
pub(crate) fn series_from(
    timestamps: &[f64],
    ph: &[f64],
    temperature: &[f64],
    co2: &[f64],
) -> Series {
    Series::from_columns(SeriesColumns {
        timestamps: timestamps.to_vec(),
        ph: ph.to_vec(),
        temperature: temperature.to_vec(),
        co2: co2.to_vec(),
    })
    .expect("valid test series")
}
