//! Generic JSON webhook dispatcher

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::NotifierConfig;
use crate::io::{HttpClient, HttpRequest};
use crate::notifier::NotificationDispatcher;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts `{destination, subject, body, content}` to a configured URL.
/// `content` carries subject and body together for chat services that only
/// render a single text field.
pub struct WebhookDispatcher {
    url: String,
    headers: Vec<(String, String)>,
    bearer_token: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("url", &self.url)
            .finish()
    }
}

impl WebhookDispatcher {
    /// Fails unless `config` is a webhook notifier
    pub fn new(config: &NotifierConfig, http: Arc<dyn HttpClient>) -> crate::Result<Self> {
        let NotifierConfig::Webhook {
            url,
            headers,
            bearer_token,
        } = config
        else {
            return Err(crate::SlotwatchError::Config(format!(
                "webhook dispatcher cannot use a '{}' notifier config",
                config.type_name()
            )));
        };

        Ok(Self {
            url: url.clone(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bearer_token: bearer_token.clone(),
            http,
        })
    }

    fn request(&self, destination: &str, subject: &str, body: &str) -> HttpRequest {
        let payload = json!({
            "destination": destination,
            "subject": subject,
            "body": body,
            "content": format!("**{}**\n{}", subject, body),
        });

        let mut request = HttpRequest::post(&self.url)
            .with_json(payload)
            .with_timeout(WEBHOOK_TIMEOUT);
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        if let Some(token) = &self.bearer_token {
            request = request.with_header("Authorization", format!("Bearer {}", token));
        }
        request
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    fn type_name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, destination: &str, subject: &str, body: &str) -> crate::Result<()> {
        tracing::debug!("Posting webhook notification to {}", self.url);

        let response = self
            .http
            .execute(&self.request(destination, subject, body))
            .await?;

        if !response.is_success() {
            return Err(crate::SlotwatchError::Notifier(format!(
                "Webhook returned status {}: {}",
                response.status, response.body
            )));
        }
        Ok(())
    }
}
