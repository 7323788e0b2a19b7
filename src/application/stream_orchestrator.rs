// Stream orchestrator - Tick-driven batch cursors, history, alerts and fan-out
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::alert_state::AlertStateMachine;
use crate::application::broadcaster::Broadcaster;
use crate::application::comparator::Comparator;
use crate::application::history::HistoryStore;
use crate::application::sample_source::SampleSource;
use crate::domain::batch::{BatchId, BatchProfile, BatchStatus};
use crate::domain::error::MonitorError;
use crate::domain::report::{ComparisonReport, DataPoint, ResultEnvelope};
use crate::infrastructure::config::CursorMode;

/// Lifecycle of a batch cursor, as seen from outside the tick loop.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    Idle,
    Streaming,
    Exhausted,
}

enum CursorState {
    Idle,
    Streaming {
        profile: Arc<BatchProfile>,
        position: usize,
    },
    Exhausted,
}

struct BatchCursor {
    batch_id: BatchId,
    state: CursorState,
}

#[cfg(test)]
impl BatchCursor {
    fn phase(&self) -> CursorPhase {
        match self.state {
            CursorState::Idle => CursorPhase::Idle,
            CursorState::Streaming { .. } => CursorPhase::Streaming,
            CursorState::Exhausted => CursorPhase::Exhausted,
        }
    }
}

pub struct StreamOrchestrator {
    cursors: Vec<BatchCursor>,
    source: Arc<dyn SampleSource>,
    comparator: Arc<Comparator>,
    history: HistoryStore,
    alerts: AlertStateMachine<BatchStatus>,
    broadcaster: Arc<dyn Broadcaster>,
    mode: CursorMode,
    interval: Duration,
}

impl StreamOrchestrator {
    pub fn new(
        source: Arc<dyn SampleSource>,
        comparator: Arc<Comparator>,
        history: HistoryStore,
        alerts: AlertStateMachine<BatchStatus>,
        broadcaster: Arc<dyn Broadcaster>,
        mode: CursorMode,
        interval: Duration,
    ) -> Self {
        let cursors = BatchId::all()
            .map(|batch_id| BatchCursor {
                batch_id,
                state: CursorState::Idle,
            })
            .collect();

        Self {
            cursors,
            source,
            comparator,
            history,
            alerts,
            broadcaster,
            mode,
            interval,
        }
    }

    #[cfg(test)]
    pub fn phase(&self, batch_id: BatchId) -> Option<CursorPhase> {
        self.cursors
            .iter()
            .find(|c| c.batch_id == batch_id)
            .map(BatchCursor::phase)
    }

    /// True once every batch is exhausted.
    pub fn is_finished(&self) -> bool {
        self.cursors
            .iter()
            .all(|c| matches!(c.state, CursorState::Exhausted))
    }

    /// Advance every batch by one sample, in batch order.
    ///
    /// Results are appended to history and checked for alerts per batch, then
    /// published together once all batches have been processed.
    pub async fn tick(&mut self) -> Result<Vec<ResultEnvelope>, MonitorError> {
        if self.comparator.reference().is_none() {
            return Err(MonitorError::ReferenceUnavailable);
        }

        let mut results = Vec::with_capacity(self.cursors.len());

        for i in 0..self.cursors.len() {
            if matches!(self.cursors[i].state, CursorState::Idle) {
                let batch_id = self.cursors[i].batch_id;
                self.cursors[i].state = self.load(batch_id).await;
            }

            let cursor = &mut self.cursors[i];
            let CursorState::Streaming { profile, position } = &mut cursor.state else {
                continue;
            };

            let index = *position;
            let Some(sample) = profile.series.get(index).copied() else {
                cursor.state = CursorState::Exhausted;
                continue;
            };
            let total_samples = profile.series.len();
            let data_point = DataPoint {
                batch_id: cursor.batch_id,
                target_status: profile.target_status,
                expected_quality_score: profile.expected_quality_score,
                description: profile.description.clone(),
                timestamp: sample.timestamp,
                ph: sample.ph,
                temperature: sample.temperature,
                co2: sample.co2,
                sample_index: index,
                total_samples,
            };

            *position += 1;
            if *position >= total_samples {
                match self.mode {
                    CursorMode::Wrap => *position = 0,
                    CursorMode::Halt => {
                        tracing::info!(
                            batch = %cursor.batch_id,
                            samples = total_samples,
                            "Batch exhausted"
                        );
                        cursor.state = CursorState::Exhausted;
                    }
                }
            }

            let comparison = self.comparator.compare_point(cursor.batch_id, index, &sample)?;
            let envelope = ResultEnvelope {
                batch_id: cursor.batch_id,
                data_point,
                comparison,
                produced_at: Utc::now(),
            };

            self.history.append(envelope.clone());
            self.check_alert(&envelope.comparison);
            results.push(envelope);
        }

        if !results.is_empty() {
            self.broadcaster.publish(&results).await;
        }

        Ok(results)
    }

    async fn load(&self, batch_id: BatchId) -> CursorState {
        match self.source.load_profile(batch_id).await {
            Ok(profile) if profile.series.is_empty() => {
                tracing::warn!(batch = %batch_id, "Batch profile has no samples");
                CursorState::Exhausted
            }
            Ok(profile) => {
                tracing::info!(
                    batch = %batch_id,
                    samples = profile.series.len(),
                    target = %profile.target_status,
                    "Batch streaming started"
                );
                CursorState::Streaming {
                    profile: Arc::new(profile),
                    position: 0,
                }
            }
            Err(e) => {
                tracing::error!(batch = %batch_id, error = %e, "Failed to load batch profile");
                CursorState::Exhausted
            }
        }
    }

    fn check_alert(&mut self, comparison: &ComparisonReport) {
        let current = comparison.status.overall;
        if let Some(previous) = self.alerts.check(comparison.batch_id, current) {
            let details = format!(
                "pH: {:.3} | Temp: {:.2} | CO2: {:.3}",
                comparison.actual.ph, comparison.actual.temperature, comparison.actual.co2
            );
            self.alerts.notify(comparison.batch_id, current, previous, details);
        }
    }

    /// Tick on a fixed interval until every batch is exhausted or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            mode = ?self.mode,
            "Stream orchestrator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stream orchestrator cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(results) => {
                    tracing::debug!(results = results.len(), "Tick complete");
                }
                Err(MonitorError::ReferenceUnavailable) => {
                    tracing::error!("Reference series unavailable, streaming stopped");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Tick failed");
                }
            }

            if self.is_finished() {
                tracing::info!("All batches exhausted, streaming stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alert_state::{run_alert_worker, AlertDispatcher};
    use crate::application::alert_state::tests::RecordingNotifier;
    use crate::application::comparator::tests::golden;
    use crate::application::notifier::AlertRequest;
    use crate::application::reference_model::ReferenceModel;
    use crate::domain::batch::ParameterStatus;
    use crate::domain::series::{series_from, Series};
    use crate::infrastructure::config::Settings;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct MapSource {
        profiles: HashMap<u8, Series>,
    }

    #[async_trait]
    impl SampleSource for MapSource {
        async fn load_profile(&self, batch_id: BatchId) -> anyhow::Result<BatchProfile> {
            let series = self
                .profiles
                .get(&batch_id.get())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no profile for batch {}", batch_id))?;
            Ok(BatchProfile {
                series,
                target_status: BatchStatus::Perfect,
                expected_quality_score: 98.0,
                description: "test".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingBroadcaster {
        ticks: Mutex<Vec<Vec<ResultEnvelope>>>,
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn publish(&self, envelopes: &[ResultEnvelope]) {
            self.ticks.lock().unwrap().push(envelopes.to_vec());
        }
    }

    struct Harness {
        orchestrator: StreamOrchestrator,
        history: HistoryStore,
        broadcaster: Arc<RecordingBroadcaster>,
        alerts: mpsc::Receiver<AlertRequest>,
    }

    fn harness(
        reference: Option<Series>,
        profiles: HashMap<u8, Series>,
        mode: CursorMode,
    ) -> Harness {
        harness_with_capacity(reference, profiles, mode, None)
    }

    fn harness_with_capacity(
        reference: Option<Series>,
        profiles: HashMap<u8, Series>,
        mode: CursorMode,
        history_capacity: Option<usize>,
    ) -> Harness {
        let settings = Settings::default();
        let model = reference.map(|s| Arc::new(ReferenceModel::new(s, &settings.novelty).unwrap()));
        let comparator = Arc::new(Comparator::new(model, &settings));
        let history = HistoryStore::new(history_capacity);
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (dispatcher, alerts) = AlertDispatcher::channel(16);

        let orchestrator = StreamOrchestrator::new(
            Arc::new(MapSource { profiles }),
            comparator,
            history.clone(),
            AlertStateMachine::new(dispatcher),
            broadcaster.clone(),
            mode,
            Duration::from_millis(5),
        );

        Harness { orchestrator, history, broadcaster, alerts }
    }

    fn three_point(ph: [f64; 3]) -> Series {
        series_from(&[0.0, 0.5, 1.0], &ph, &[18.0, 18.2, 18.5], &[0.1, 0.3, 0.6])
    }

    fn drain(rx: &mut mpsc::Receiver<AlertRequest>) -> Vec<AlertRequest> {
        let mut out = Vec::new();
        while let Ok(alert) = rx.try_recv() {
            out.push(alert);
        }
        out
    }

    #[tokio::test]
    async fn test_identical_series_end_to_end() {
        let reference = three_point([5.5, 5.47, 5.44]);
        let profiles = HashMap::from([(1, reference.clone())]);
        let mut h = harness(Some(reference), profiles, CursorMode::Halt);

        for tick in 0..3 {
            let results = h.orchestrator.tick().await.unwrap();
            assert_eq!(results.len(), 1, "tick {}", tick);
            let comparison = &results[0].comparison;
            assert!((comparison.quality_score - 100.0).abs() < 1e-9);
            assert_eq!(comparison.status.overall, BatchStatus::Perfect);
            assert_eq!(comparison.parameter_status, ParameterStatus::Normal);
        }

        assert!(drain(&mut h.alerts).is_empty());
        assert_eq!(h.history.len(BatchId::new(1).unwrap()), 3);
        assert!(h.orchestrator.is_finished());
        assert!(h.orchestrator.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_ph_excursion_fires_one_alert() {
        let reference = three_point([5.5, 5.47, 5.44]);
        let generated = three_point([5.5, 5.47 + 0.8, 5.44]);
        let profiles = HashMap::from([(1, generated)]);
        let mut h = harness(Some(reference), profiles, CursorMode::Halt);

        let first = h.orchestrator.tick().await.unwrap();
        assert_eq!(first[0].comparison.status.overall, BatchStatus::Perfect);
        assert!(drain(&mut h.alerts).is_empty());

        let second = h.orchestrator.tick().await.unwrap();
        let comparison = &second[0].comparison;
        assert_eq!(comparison.status.ph, ParameterStatus::Critical);
        assert_eq!(comparison.parameter_status, ParameterStatus::Critical);
        assert_eq!(comparison.status.overall, BatchStatus::Failed);

        let alerts = drain(&mut h.alerts);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].previous_status, "perfect");
        assert_eq!(alerts[0].current_status, "failed");
        assert!(alerts[0].details.starts_with("pH: 6.270"));
    }

    #[tokio::test]
    async fn test_result_count_tracks_live_batches() {
        let reference = golden(10);
        let profiles = HashMap::from([
            (1, golden(2)),
            (2, golden(4)),
            (3, golden(3)),
            // batch 4 has no profile and is exhausted on load
        ]);
        let mut h = harness(Some(reference), profiles, CursorMode::Halt);

        let mut counts = Vec::new();
        loop {
            let results = h.orchestrator.tick().await.unwrap();
            counts.push(results.len());
            if results.is_empty() {
                break;
            }
        }

        assert_eq!(counts, vec![3, 3, 2, 1, 0]);
        assert_eq!(
            h.orchestrator.phase(BatchId::new(4).unwrap()),
            Some(CursorPhase::Exhausted)
        );
        // Empty ticks are not published
        assert_eq!(h.broadcaster.ticks.lock().unwrap().len(), 4);

        // Batches within a tick are published together, in order
        let first = &h.broadcaster.ticks.lock().unwrap()[0];
        let ids: Vec<u8> = first.iter().map(|e| e.batch_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_wrap_mode_restarts_cursor() {
        let reference = golden(10);
        let profiles = HashMap::from([(2, golden(2))]);
        let mut h = harness(Some(reference), profiles, CursorMode::Wrap);

        let mut indices = Vec::new();
        for _ in 0..5 {
            let results = h.orchestrator.tick().await.unwrap();
            indices.push(results[0].comparison.sample_index);
        }
        assert_eq!(indices, vec![0, 1, 0, 1, 0]);
        assert_eq!(h.orchestrator.phase(BatchId::new(2).unwrap()), Some(CursorPhase::Streaming));
        assert!(!h.orchestrator.is_finished());
    }

    #[tokio::test]
    async fn test_wrap_mode_history_stays_within_capacity() {
        let reference = golden(10);
        let profiles = HashMap::from([(1, golden(2))]);
        let mut h = harness_with_capacity(Some(reference), profiles, CursorMode::Wrap, Some(50));

        for _ in 0..5000 {
            h.orchestrator.tick().await.unwrap();
        }

        let history = h.history.get_history(BatchId::new(1).unwrap());
        assert_eq!(history.len(), 50);
        // Newest entries are kept
        assert_eq!(history[49].comparison.sample_index, 1);
        assert_eq!(history[48].comparison.sample_index, 0);
    }

    #[tokio::test]
    async fn test_missing_reference_does_not_consume_samples() {
        let profiles = HashMap::from([(1, golden(3))]);
        let mut h = harness(None, profiles, CursorMode::Halt);

        assert!(matches!(h.orchestrator.tick().await, Err(MonitorError::ReferenceUnavailable)));
        assert_eq!(h.orchestrator.phase(BatchId::new(1).unwrap()), Some(CursorPhase::Idle));
        assert!(h.history.get_history(BatchId::new(1).unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_exhausted() {
        let reference = golden(10);
        let profiles = HashMap::from([(1, golden(3)), (3, golden(2))]);
        let h = harness(Some(reference), profiles, CursorMode::Halt);
        let history = h.history.clone();

        tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(history.len(BatchId::new(1).unwrap()), 3);
        assert_eq!(history.len(BatchId::new(3).unwrap()), 2);
    }

    #[tokio::test]
    async fn test_run_honours_cancellation() {
        let reference = golden(10);
        let profiles = HashMap::from([(1, golden(2))]);
        let h = harness(Some(reference), profiles, CursorMode::Wrap);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(h.orchestrator.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(h.history.len(BatchId::new(1).unwrap()) > 0);
    }

    #[tokio::test]
    async fn test_degraded_start_alerts_through_worker() {
        let reference = three_point([5.5, 5.47, 5.44]);
        let profiles = HashMap::from([(2, three_point([6.5, 6.47, 6.44]))]);
        let settings = Settings::default();
        let model = Arc::new(ReferenceModel::new(reference, &settings.novelty).unwrap());
        let (dispatcher, rx) = AlertDispatcher::channel(4);
        let notifier = Arc::new(RecordingNotifier::default());
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_alert_worker(
            rx,
            notifier.clone(),
            Duration::from_secs(1),
            cancel.clone(),
        ));

        let mut orchestrator = StreamOrchestrator::new(
            Arc::new(MapSource { profiles }),
            Arc::new(Comparator::new(Some(model), &settings)),
            HistoryStore::new(None),
            AlertStateMachine::new(dispatcher),
            Arc::new(RecordingBroadcaster::default()),
            CursorMode::Halt,
            Duration::from_millis(5),
        );
        for _ in 0..3 {
            orchestrator.tick().await.unwrap();
        }
        drop(orchestrator);
        tokio::time::timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].previous_status, "unknown");
        assert_eq!(sent[0].batch_id.get(), 2);
    }
}
