//! Notification channels.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::error::StepError;
use crate::ports::{Channel, Notification, Notifier};

/// Posts notifications as JSON to one webhook per channel.
pub struct WebhookNotifier {
    client: Client,
    success_url: String,
    failure_url: String,
}

impl WebhookNotifier {
    pub fn new(
        success_url: impl Into<String>,
        failure_url: impl Into<String>,
    ) -> Result<Self, StepError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| StepError::Notify(e.to_string()))?;
        Ok(Self {
            client,
            success_url: success_url.into(),
            failure_url: failure_url.into(),
        })
    }

    fn url_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Success => &self.success_url,
            Channel::Failure => &self.failure_url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), StepError> {
        let url = self.url_for(notification.channel());
        let response = self
            .client
            .post(url)
            .json(&json!({
                "kind": notification.kind(),
                "message": notification,
            }))
            .send()
            .await
            .map_err(|e| StepError::Notify(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StepError::Notify(format!(
                "{url} answered with status {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the log. Used when no webhooks are configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), StepError> {
        let message = serde_json::to_string(notification)?;
        match notification.channel() {
            Channel::Success => info!(kind = notification.kind(), %message, "job notification"),
            Channel::Failure => warn!(kind = notification.kind(), %message, "job notification"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::JobSummary;
    use crate::workflow::{JobContext, JobHandle};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary() -> JobSummary {
        JobSummary {
            game_id: "g1".into(),
            job_handle: JobHandle::new("job-1"),
        }
    }

    async fn notifier(server: &MockServer) -> WebhookNotifier {
        WebhookNotifier::new(
            format!("{}/success", server.uri()),
            format!("{}/failure", server.uri()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn success_goes_to_success_hook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/success"))
            .and(body_partial_json(json!({
                "kind": "succeeded",
                "message": {"detail": {"gameId": "g1", "jobHandle": "job-1"}}
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server)
            .await
            .notify(&Notification::Succeeded(summary()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_and_failure_go_to_failure_hook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/failure"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = notifier(&server).await;
        notifier
            .notify(&Notification::Stopped(summary()))
            .await
            .unwrap();
        notifier
            .notify(&Notification::Failed(Box::new(JobContext::new("g1", "j1"))))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_delivery_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = notifier(&server)
            .await
            .notify(&Notification::Succeeded(summary()))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Notify(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier
            .notify(&Notification::Stopped(summary()))
            .await
            .unwrap();
    }
}
