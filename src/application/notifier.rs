// Notification channel trait for status-change alerts
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::batch::BatchId;

/// One status transition to deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRequest {
    pub batch_id: BatchId,
    pub current_status: String,
    /// `unknown` when the batch started in a degraded state.
    pub previous_status: String,
    pub details: String,
    pub raised_at: DateTime<Utc>,
}

impl AlertRequest {
    pub fn message_body(&self) -> String {
        format!(
            "FermentIQ Alert: Batch #{} status changed.\nOld: {}\nNew: {} {}\nDetails: {}",
            self.batch_id,
            self.previous_status,
            self.current_status.to_uppercase(),
            status_marker(&self.current_status),
            self.details
        )
    }
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "perfect" => "✅",
        "acceptable" => "👌",
        "concerning" => "⚠️",
        "failed" => "❌",
        "critical" => "🚨",
        _ => "ℹ️",
    }
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Channel name for logs
    fn name(&self) -> &str;

    /// Deliver one alert. Errors are logged by the caller and never retried.
    async fn send_alert(&self, alert: &AlertRequest) -> anyhow::Result<()>;
}
