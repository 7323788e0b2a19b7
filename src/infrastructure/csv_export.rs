// CSV rendering of batch history
use anyhow::Context;
use serde::Serialize;

use crate::domain::batch::{BatchId, BatchStatus};
use crate::domain::report::ResultEnvelope;

const COLUMNS: [&str; 9] = [
    "timestamp",
    "ph",
    "temperature",
    "co2",
    "ideal_ph",
    "ideal_temperature",
    "ideal_co2",
    "quality_score",
    "status",
];

#[derive(Debug, Serialize)]
struct CsvRow {
    timestamp: f64,
    ph: f64,
    temperature: f64,
    co2: f64,
    ideal_ph: f64,
    ideal_temperature: f64,
    ideal_co2: f64,
    quality_score: f64,
    status: BatchStatus,
}

#[derive(Debug, Serialize)]
struct CombinedCsvRow {
    batch_number: BatchId,
    timestamp: f64,
    ph: f64,
    temperature: f64,
    co2: f64,
    ideal_ph: f64,
    ideal_temperature: f64,
    ideal_co2: f64,
    quality_score: f64,
    status: BatchStatus,
}

impl From<&ResultEnvelope> for CsvRow {
    fn from(envelope: &ResultEnvelope) -> Self {
        let dp = &envelope.data_point;
        let ideal = &envelope.comparison.ideal;
        Self {
            timestamp: dp.timestamp,
            ph: dp.ph,
            temperature: dp.temperature,
            co2: dp.co2,
            ideal_ph: ideal.ph,
            ideal_temperature: ideal.temperature,
            ideal_co2: ideal.co2,
            quality_score: envelope.comparison.quality_score,
            status: dp.target_status,
        }
    }
}

impl CombinedCsvRow {
    fn new(batch_number: BatchId, envelope: &ResultEnvelope) -> Self {
        let row = CsvRow::from(envelope);
        Self {
            batch_number,
            timestamp: row.timestamp,
            ph: row.ph,
            temperature: row.temperature,
            co2: row.co2,
            ideal_ph: row.ideal_ph,
            ideal_temperature: row.ideal_temperature,
            ideal_co2: row.ideal_co2,
            quality_score: row.quality_score,
            status: row.status,
        }
    }
}

/// Header is written explicitly so an empty export still carries it.
fn writer<'a>(header: impl IntoIterator<Item = &'a str>) -> anyhow::Result<csv::Writer<Vec<u8>>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(header).context("writing CSV header")?;
    Ok(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> anyhow::Result<String> {
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV output: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// One batch's history, oldest first.
pub fn batch_csv(history: &[ResultEnvelope]) -> anyhow::Result<String> {
    let mut wtr = writer(COLUMNS)?;
    for envelope in history {
        wtr.serialize(CsvRow::from(envelope))
            .context("writing CSV row")?;
    }
    finish(wtr)
}

/// Several batches in one table, prefixed by `batch_number`.
pub fn combined_csv(batches: &[(BatchId, Vec<ResultEnvelope>)]) -> anyhow::Result<String> {
    let mut wtr = writer(std::iter::once("batch_number").chain(COLUMNS))?;
    for (batch_id, history) in batches {
        for envelope in history {
            wtr.serialize(CombinedCsvRow::new(*batch_id, envelope))
                .context("writing CSV row")?;
        }
    }
    finish(wtr)
}
