// JSON-backed reference and batch profile loading
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::application::sample_source::SampleSource;
use crate::domain::batch::{BatchId, BatchProfile, BatchStatus};
use crate::domain::series::{Series, SeriesColumns};

/// Load the reference series from a `{timestamps, ph, temperature, co2}` document.
/// Extra keys are ignored.
pub fn load_reference(path: impl AsRef<Path>) -> anyhow::Result<Series> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading reference series {}", path.display()))?;
    let series: Series = serde_json::from_str(&raw)
        .with_context(|| format!("parsing reference series {}", path.display()))?;

    tracing::info!(path = %path.display(), samples = series.len(), "Loaded reference series");
    Ok(series)
}

/// On-disk profile layout: the series columns inline, plus generation metadata.
#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(flatten)]
    columns: SeriesColumns,
    #[serde(alias = "batch_status")]
    target_status: BatchStatus,
    expected_quality_score: f64,
    #[serde(default)]
    description: String,
}

/// Reads `batch_<n>.json` from a directory.
#[derive(Debug, Clone)]
pub struct JsonProfileSource {
    dir: PathBuf,
}

impl JsonProfileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, batch_id: BatchId) -> PathBuf {
        self.dir.join(format!("batch_{}.json", batch_id))
    }
}

#[async_trait]
impl SampleSource for JsonProfileSource {
    async fn load_profile(&self, batch_id: BatchId) -> anyhow::Result<BatchProfile> {
        let path = self.path_for(batch_id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading batch profile {}", path.display()))?;
        let file: ProfileFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing batch profile {}", path.display()))?;
        let series = Series::from_columns(file.columns)?;

        tracing::debug!(
            batch = %batch_id,
            path = %path.display(),
            samples = series.len(),
            "Loaded batch profile"
        );

        Ok(BatchProfile {
            series,
            target_status: file.target_status,
            expected_quality_score: file.expected_quality_score,
            description: file.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_reference_ignores_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "golden.json",
            r#"{"timestamps":[0.0,0.5,1.0],"ph":[5.5,5.47,5.44],"temperature":[18.0,18.2,18.5],"co2":[0.0,0.2,0.5],"duration_hours":1}"#,
        );

        let series = load_reference(&path).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(2).unwrap().ph, 5.44);
    }

    #[test]
    fn test_load_reference_reports_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_reference(dir.path().join("absent.json")).is_err());

        let path = write(
            dir.path(),
            "bad.json",
            r#"{"timestamps":[1.0,0.5],"ph":[5.5,5.4],"temperature":[18.0,18.1],"co2":[0.0,0.1]}"#,
        );
        let err = load_reference(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("strictly increasing"));
    }

    #[tokio::test]
    async fn test_profile_source_reads_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "batch_3.json",
            r#"{"timestamps":[0.0,0.5],"ph":[5.6,5.5],"temperature":[19.0,19.4],"co2":[0.1,0.4],
                "batch_status":"concerning","expected_quality_score":85.0,"description":"Drifting temperature"}"#,
        );
        let source = JsonProfileSource::new(dir.path());

        let profile = source.load_profile(BatchId::new(3).unwrap()).await.unwrap();
        assert_eq!(profile.series.len(), 2);
        assert_eq!(profile.target_status, BatchStatus::Concerning);
        assert_eq!(profile.description, "Drifting temperature");

        assert!(source.load_profile(BatchId::new(1).unwrap()).await.is_err());
    }
}
