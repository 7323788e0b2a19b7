use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::batch::BatchId;
use crate::domain::error::MonitorError;
use crate::domain::series::Parameter;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    #[serde(default)]
    pub novelty: NoveltyConfig,
    #[serde(default)]
    pub tick_scoring: TickScoringConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_reference_path")]
    pub reference_path: String,
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            reference_path: default_reference_path(),
            profiles_dir: default_profiles_dir(),
        }
    }
}

/// What a batch cursor does after its last sample.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Stop the batch; the run loop ends once every batch has stopped.
    #[default]
    Halt,
    /// Restart from sample 0 indefinitely.
    Wrap,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub cursor_mode: CursorMode,
    #[serde(default = "default_replay_window")]
    pub replay_window: usize,
    /// Per-batch cap on retained history; unbounded when absent.
    #[serde(default)]
    pub history_capacity: Option<usize>,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            cursor_mode: CursorMode::default(),
            replay_window: default_replay_window(),
            history_capacity: None,
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct DeviationThreshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdConfig {
    #[serde(default = "default_ph_threshold")]
    pub ph: DeviationThreshold,
    #[serde(default = "default_temperature_threshold")]
    pub temperature: DeviationThreshold,
    #[serde(default = "default_co2_threshold")]
    pub co2: DeviationThreshold,
}

impl ThresholdConfig {
    pub fn get(&self, parameter: Parameter) -> DeviationThreshold {
        match parameter {
            Parameter::Ph => self.ph,
            Parameter::Temperature => self.temperature,
            Parameter::Co2 => self.co2,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            ph: default_ph_threshold(),
            temperature: default_temperature_threshold(),
            co2: default_co2_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComparisonConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Anomaly percentage above which a system inspection is recommended.
    #[serde(default = "default_anomaly_density")]
    pub anomaly_density_percent: f64,
    /// Optional Sakoe-Chiba band for the elastic alignment.
    #[serde(default)]
    pub dtw_window: Option<usize>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            anomaly_density_percent: default_anomaly_density(),
            dtw_window: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NoveltyConfig {
    #[serde(default = "default_trees")]
    pub trees: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            trees: default_trees(),
            sample_size: default_sample_size(),
            contamination: default_contamination(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToleranceConfig {
    #[serde(default = "default_ph_tolerance")]
    pub ph: f64,
    #[serde(default = "default_temperature_tolerance")]
    pub temperature: f64,
    #[serde(default = "default_co2_tolerance")]
    pub co2: f64,
}

impl ToleranceConfig {
    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Ph => self.ph,
            Parameter::Temperature => self.temperature,
            Parameter::Co2 => self.co2,
        }
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            ph: default_ph_tolerance(),
            temperature: default_temperature_tolerance(),
            co2: default_co2_tolerance(),
        }
    }
}

/// Lower bounds of the quality-score bands; anything below `concerning` is failed.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoreBands {
    #[serde(default = "default_band_perfect")]
    pub perfect: f64,
    #[serde(default = "default_band_acceptable")]
    pub acceptable: f64,
    #[serde(default = "default_band_concerning")]
    pub concerning: f64,
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            perfect: default_band_perfect(),
            acceptable: default_band_acceptable(),
            concerning: default_band_concerning(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TickScoringConfig {
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub bands: ScoreBands,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierProvider {
    #[default]
    Console,
    Twilio,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub provider: NotifierProvider,
    /// Keyed by batch number, with `default` as the fallback.
    #[serde(default)]
    pub target_numbers: HashMap<String, String>,
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl NotificationConfig {
    pub fn target_for(&self, batch: BatchId) -> Option<&str> {
        self.target_numbers
            .get(&batch.to_string())
            .or_else(|| self.target_numbers.get("default"))
            .map(String::as_str)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: NotifierProvider::default(),
            target_numbers: HashMap::new(),
            twilio: None,
            queue_capacity: default_queue_capacity(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl Settings {
    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: String| Err(MonitorError::InvalidConfig(msg));

        for parameter in Parameter::ALL {
            let t = self.thresholds.get(parameter);
            if !(t.warning > 0.0 && t.warning < t.critical) {
                return invalid(format!(
                    "{} thresholds must satisfy 0 < warning < critical (got {} / {})",
                    parameter, t.warning, t.critical
                ));
            }
            let tolerance = self.tick_scoring.tolerance.get(parameter);
            if !(tolerance > 0.0) {
                return invalid(format!("{} tolerance must be positive", parameter));
            }
        }

        let bands = &self.tick_scoring.bands;
        if !(bands.perfect >= bands.acceptable && bands.acceptable >= bands.concerning) {
            return invalid("score bands must satisfy perfect >= acceptable >= concerning".into());
        }

        let contamination = self.novelty.contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return invalid(format!("contamination must be in (0, 0.5], got {}", contamination));
        }
        if self.novelty.trees == 0 || self.novelty.sample_size < 2 {
            return invalid(
                "novelty detector needs at least one tree and a sample size of 2".into(),
            );
        }

        if self.stream.interval_ms == 0 {
            return invalid("stream interval must be non-zero".into());
        }
        if self.stream.cursor_mode == CursorMode::Wrap
            && !self.stream.history_capacity.is_some_and(|cap| cap > 0)
        {
            return invalid("wrap cursor mode needs a positive stream.history_capacity".into());
        }
        if self.stream.subscriber_buffer == 0 || self.notification.queue_capacity == 0 {
            return invalid("subscriber buffer and notification queue must be non-zero".into());
        }

        if self.notification.enabled
            && self.notification.provider == NotifierProvider::Twilio
            && self.notification.twilio.is_none()
        {
            return invalid(
                "twilio provider selected without [notification.twilio] settings".into(),
            );
        }

        Ok(())
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from("config/monitor")
}

/// Optional file source layered under `FERMENT__SECTION__KEY` environment overrides.
pub fn load_settings_from(path: &str) -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("FERMENT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings: Settings = settings.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_reference_path() -> String {
    "data/golden_standard.json".to_string()
}
fn default_profiles_dir() -> String {
    "data/profiles".to_string()
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_replay_window() -> usize {
    50
}
fn default_subscriber_buffer() -> usize {
    64
}
fn default_ph_threshold() -> DeviationThreshold {
    DeviationThreshold { warning: 0.3, critical: 0.5 }
}
fn default_temperature_threshold() -> DeviationThreshold {
    DeviationThreshold { warning: 2.0, critical: 3.5 }
}
fn default_co2_threshold() -> DeviationThreshold {
    DeviationThreshold { warning: 1.5, critical: 3.0 }
}
fn default_similarity_threshold() -> f64 {
    0.85
}
fn default_anomaly_density() -> f64 {
    10.0
}
fn default_trees() -> usize {
    100
}
fn default_sample_size() -> usize {
    256
}
fn default_contamination() -> f64 {
    0.1
}
fn default_seed() -> u64 {
    42
}
fn default_ph_tolerance() -> f64 {
    1.0
}
fn default_temperature_tolerance() -> f64 {
    5.0
}
fn default_co2_tolerance() -> f64 {
    5.0
}
fn default_band_perfect() -> f64 {
    95.0
}
fn default_band_acceptable() -> f64 {
    90.0
}
fn default_band_concerning() -> f64 {
    80.0
}
fn default_true() -> bool {
    true
}
fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}
fn default_queue_capacity() -> usize {
    32
}
fn default_send_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.thresholds.ph.critical, 0.5);
        assert_eq!(settings.stream.cursor_mode, CursorMode::Halt);
        assert_eq!(settings.stream.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut settings = Settings::default();
        settings.thresholds.co2 = DeviationThreshold { warning: 3.0, critical: 1.5 };
        assert!(matches!(settings.validate(), Err(MonitorError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_out_of_range_contamination() {
        let mut settings = Settings::default();
        settings.novelty.contamination = 0.0;
        assert!(settings.validate().is_err());
        settings.novelty.contamination = 0.7;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_wrap_mode_requires_history_cap() {
        let mut settings = Settings::default();
        settings.stream.cursor_mode = CursorMode::Wrap;
        assert!(matches!(settings.validate(), Err(MonitorError::InvalidConfig(_))));

        settings.stream.history_capacity = Some(0);
        assert!(settings.validate().is_err());

        settings.stream.history_capacity = Some(500);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_twilio_requires_credentials() {
        let mut settings = Settings::default();
        settings.notification.provider = NotifierProvider::Twilio;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_target_number_fallback() {
        let mut notification = NotificationConfig::default();
        notification.target_numbers.insert("default".into(), "+100".into());
        notification.target_numbers.insert("2".into(), "+200".into());

        assert_eq!(notification.target_for(BatchId::new(2).unwrap()), Some("+200"));
        assert_eq!(notification.target_for(BatchId::new(3).unwrap()), Some("+100"));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[stream]\ninterval_ms = 250\ncursor_mode = \"wrap\"\nhistory_capacity = 100\n\n[thresholds.ph]\nwarning = 0.2\ncritical = 0.4\n"
        )
        .unwrap();

        let settings = load_settings_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.stream.interval_ms, 250);
        assert_eq!(settings.stream.cursor_mode, CursorMode::Wrap);
        assert_eq!(settings.thresholds.ph.warning, 0.2);
        assert_eq!(settings.thresholds.temperature.critical, 3.5);
        assert_eq!(settings.novelty.trees, 100);
    }
}
