// Alert notifiers - Console simulation and Twilio SMS delivery
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::application::notifier::{AlertNotifier, AlertRequest};
use crate::infrastructure::config::{NotificationConfig, NotifierProvider, TwilioConfig};

/// Logs the SMS it would have sent.
pub struct ConsoleNotifier {
    notification: NotificationConfig,
}

impl ConsoleNotifier {
    pub fn new(notification: NotificationConfig) -> Self {
        Self { notification }
    }
}

#[async_trait]
impl AlertNotifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_alert(&self, alert: &AlertRequest) -> anyhow::Result<()> {
        tracing::info!(
            to = self.notification.target_for(alert.batch_id).unwrap_or("<unset>"),
            batch = %alert.batch_id,
            body = %alert.message_body(),
            "SMS simulation"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

/// Sends alerts through the Twilio Messages API.
pub struct TwilioNotifier {
    client: reqwest::Client,
    config: TwilioConfig,
    notification: NotificationConfig,
}

impl TwilioNotifier {
    pub fn new(config: TwilioConfig, notification: NotificationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(notification.send_timeout())
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            config,
            notification,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl AlertNotifier for TwilioNotifier {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn send_alert(&self, alert: &AlertRequest) -> anyhow::Result<()> {
        let to = self
            .notification
            .target_for(alert.batch_id)
            .with_context(|| format!("no target number for batch {}", alert.batch_id))?;

        let body = alert.message_body();
        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body.as_str()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .context("sending SMS request")?
            .error_for_status()
            .context("SMS provider rejected request")?;

        let message: TwilioMessage = response.json().await.context("decoding SMS response")?;
        tracing::info!(to, batch = %alert.batch_id, sid = %message.sid, "SMS sent");
        Ok(())
    }
}

/// Build the configured notifier.
pub fn build_notifier(config: &NotificationConfig) -> anyhow::Result<Arc<dyn AlertNotifier>> {
    match config.provider {
        NotifierProvider::Console => Ok(Arc::new(ConsoleNotifier::new(config.clone()))),
        NotifierProvider::Twilio => {
            let twilio = config
                .twilio
                .clone()
                .context("twilio provider selected without [notification.twilio] settings")?;
            Ok(Arc::new(TwilioNotifier::new(twilio, config.clone())?))
        }
    }
}
