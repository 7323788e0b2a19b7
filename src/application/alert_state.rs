// Alert state machine - Status-change detection and bounded, detached delivery
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::notifier::{AlertNotifier, AlertRequest};
use crate::domain::batch::{AlertLevel, BatchId};

/// Status a batch had before a reported transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousStatus<S> {
    /// First observation of a batch that started degraded.
    Unknown,
    Known(S),
}

impl<S: fmt::Display> fmt::Display for PreviousStatus<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviousStatus::Unknown => f.write_str("unknown"),
            PreviousStatus::Known(status) => status.fmt(f),
        }
    }
}

/// Per-batch `Unseen -> Known(status)` tracker.
///
/// Every genuine transition is reported; there is no cooldown.
pub struct AlertStateMachine<S: AlertLevel> {
    last_status: HashMap<BatchId, S>,
    dispatcher: AlertDispatcher,
}

impl<S: AlertLevel> AlertStateMachine<S> {
    pub fn new(dispatcher: AlertDispatcher) -> Self {
        Self {
            last_status: HashMap::new(),
            dispatcher,
        }
    }

    /// Record `current` and return the previous status if this is a transition.
    pub fn check(&mut self, batch_id: BatchId, current: S) -> Option<PreviousStatus<S>> {
        match self.last_status.insert(batch_id, current) {
            None if current.is_degraded() => Some(PreviousStatus::Unknown),
            None => None,
            Some(previous) if previous != current => Some(PreviousStatus::Known(previous)),
            Some(_) => None,
        }
    }

    /// Queue a notification without waiting for delivery.
    pub fn notify(
        &self,
        batch_id: BatchId,
        current: S,
        previous: PreviousStatus<S>,
        details: String,
    ) -> bool {
        tracing::info!(
            batch = %batch_id,
            previous = %previous,
            current = %current,
            "Batch status changed"
        );

        self.dispatcher.dispatch(AlertRequest {
            batch_id,
            current_status: current.to_string(),
            previous_status: previous.to_string(),
            details,
            raised_at: Utc::now(),
        })
    }

    #[cfg(test)]
    pub fn last_status(&self, batch_id: BatchId) -> Option<S> {
        self.last_status.get(&batch_id).copied()
    }

    #[cfg(test)]
    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }
}

/// Producer side of the bounded alert queue.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    sender: Option<mpsc::Sender<AlertRequest>>,
    dropped: Arc<AtomicU64>,
}

impl AlertDispatcher {
    /// Dispatcher plus the receiver to hand to [`run_alert_worker`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AlertRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            sender: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (dispatcher, rx)
    }

    /// Tracks transitions but delivers nothing.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without blocking. Returns false if the alert was not queued.
    pub fn dispatch(&self, alert: AlertRequest) -> bool {
        let Some(sender) = &self.sender else {
            tracing::debug!(batch = %alert.batch_id, "Notifications disabled, alert skipped");
            return false;
        };

        match sender.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(batch = %alert.batch_id, dropped, "Alert queue full, alert dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(batch = %alert.batch_id, "Alert worker stopped, alert dropped");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain the alert queue until it closes or `cancel` fires.
///
/// Each delivery is bounded by `send_timeout`; failures are logged and the
/// next alert is processed.
pub async fn run_alert_worker(
    mut rx: mpsc::Receiver<AlertRequest>,
    notifier: Arc<dyn AlertNotifier>,
    send_timeout: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(channel = notifier.name(), "Alert worker started");

    loop {
        let alert = tokio::select! {
            _ = cancel.cancelled() => break,
            alert = rx.recv() => match alert {
                Some(alert) => alert,
                None => break,
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(batch = %alert.batch_id, "Shutdown during alert delivery");
                break;
            }
            result = tokio::time::timeout(send_timeout, notifier.send_alert(&alert)) => match result {
                Ok(Ok(())) => {
                    tracing::debug!(
                        channel = notifier.name(),
                        batch = %alert.batch_id,
                        "Alert delivered"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        channel = notifier.name(),
                        batch = %alert.batch_id,
                        error = %e,
                        "Failed to send alert"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        channel = notifier.name(),
                        batch = %alert.batch_id,
                        timeout_secs = send_timeout.as_secs_f64(),
                        "Alert delivery timed out"
                    );
                }
            },
        }
    }

    tracing::info!(channel = notifier.name(), "Alert worker stopped");
}
