// History store - Per-batch result log shared between the tick loop and readers
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::batch::BatchId;
use crate::domain::report::ResultEnvelope;

/// Thread-safe, append-only per-batch history.
///
/// Readers get copies, so a reader never observes a half-applied append.
#[derive(Clone, Default)]
pub struct HistoryStore {
    inner: Arc<RwLock<HistoryInner>>,
}

#[derive(Default)]
struct HistoryInner {
    logs: HashMap<BatchId, VecDeque<ResultEnvelope>>,
    /// Oldest entries are evicted past this length; unbounded when `None`.
    capacity: Option<usize>,
}

impl HistoryStore {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HistoryInner {
                logs: HashMap::new(),
                capacity: capacity.filter(|c| *c > 0),
            })),
        }
    }

    pub fn append(&self, envelope: ResultEnvelope) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let capacity = inner.capacity;
        let log = inner.logs.entry(envelope.batch_id).or_default();
        log.push_back(envelope);
        if let Some(cap) = capacity {
            while log.len() > cap {
                log.pop_front();
            }
        }
    }

    /// Full retained history in append order; empty if the batch has no data.
    pub fn get_history(&self, batch_id: BatchId) -> Vec<ResultEnvelope> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .logs
            .get(&batch_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, batch_id: BatchId) -> Option<ResultEnvelope> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.logs.get(&batch_id)?.back().cloned()
    }

    /// Latest envelope of every batch that has data, in batch order.
    pub fn latest_all(&self) -> Vec<ResultEnvelope> {
        BatchId::all().filter_map(|id| self.latest(id)).collect()
    }

    #[cfg(test)]
    pub fn len(&self, batch_id: BatchId) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.logs.get(&batch_id).map(VecDeque::len).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::batch::{BatchStatus, ParameterStatus};
    use crate::domain::report::{ComparisonReport, DataPoint, TickStatus};
    use crate::domain::series::Reading;
    use chrono::Utc;

    pub(crate) fn envelope(
        batch: u8,
        index: usize,
        quality: f64,
        status: BatchStatus,
    ) -> ResultEnvelope {
        let batch_id = BatchId::new(batch as i64).unwrap();
        let actual = Reading::new(5.5, 18.0, 0.5);
        ResultEnvelope {
            batch_id,
            data_point: DataPoint {
                batch_id,
                target_status: BatchStatus::Perfect,
                expected_quality_score: 98.0,
                description: String::new(),
                timestamp: index as f64 * 0.5,
                ph: actual.ph,
                temperature: actual.temperature,
                co2: actual.co2,
                sample_index: index,
                total_samples: 100,
            },
            comparison: ComparisonReport {
                batch_id,
                sample_index: index,
                timestamp: index as f64 * 0.5,
                actual,
                ideal: actual,
                deviations: Reading::default(),
                status: TickStatus {
                    ph: ParameterStatus::Normal,
                    temperature: ParameterStatus::Normal,
                    co2: ParameterStatus::Normal,
                    overall: status,
                },
                parameter_status: ParameterStatus::Normal,
                quality_score: quality,
            },
            produced_at: Utc::now(),
        }
    }

    fn id(n: i64) -> BatchId {
        BatchId::new(n).unwrap()
    }

    #[test]
    fn test_empty_history_is_explicit() {
        let store = HistoryStore::new(None);
        assert!(store.get_history(id(1)).is_empty());
        assert!(store.latest(id(1)).is_none());
        assert_eq!(store.len(id(1)), 0);
    }

    #[test]
    fn test_unbounded_keeps_everything_in_order() {
        let store = HistoryStore::new(None);
        for i in 0..200 {
            store.append(envelope(2, i, 99.0, BatchStatus::Perfect));
        }
        let history = store.get_history(id(2));
        assert_eq!(history.len(), 200);
        assert_eq!(history[0].comparison.sample_index, 0);
        assert_eq!(history[199].comparison.sample_index, 199);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = HistoryStore::new(Some(3));
        for i in 0..5 {
            store.append(envelope(1, i, 99.0, BatchStatus::Perfect));
        }
        let indices: Vec<usize> = store
            .get_history(id(1))
            .iter()
            .map(|e| e.comparison.sample_index)
            .collect();
        assert_eq!(indices, vec![2, 3, 4]);
    }

    #[test]
    fn test_latest_per_batch() {
        let store = HistoryStore::new(None);
        for i in 0..10 {
            store.append(envelope(3, i, 99.0, BatchStatus::Perfect));
        }
        store.append(envelope(1, 0, 50.0, BatchStatus::Failed));

        assert_eq!(store.latest(id(3)).unwrap().comparison.sample_index, 9);

        let latest: Vec<u8> = store.latest_all().iter().map(|e| e.batch_id.get()).collect();
        assert_eq!(latest, vec![1, 3]);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = HistoryStore::new(None);
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.append(envelope(4, i, 99.0, BatchStatus::Perfect));
                }
            })
        };

        for _ in 0..50 {
            let snapshot = store.get_history(id(4));
            // Every snapshot is a contiguous prefix
            for (expected, e) in snapshot.iter().enumerate() {
                assert_eq!(e.comparison.sample_index, expected);
            }
        }
        writer.join().unwrap();
        assert_eq!(store.len(id(4)), 500);
    }
}
