//! Pushover notification client

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::NotifierConfig;
use crate::io::{HttpClient, HttpRequest};
use crate::notifier::NotificationDispatcher;

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover notification sender
pub struct PushoverDispatcher {
    api_token: String,
    user_key: String,
    default_title: String,
    default_priority: i8,
    default_sound: String,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for PushoverDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushoverDispatcher")
            .field("default_title", &self.default_title)
            .finish()
    }
}

impl PushoverDispatcher {
    /// Fails unless `config` is a pushover notifier
    pub fn new(config: &NotifierConfig, http: Arc<dyn HttpClient>) -> crate::Result<Self> {
        let NotifierConfig::Pushover {
            api_token,
            user_key,
            default_title,
            default_priority,
            default_sound,
        } = config
        else {
            return Err(crate::SlotwatchError::Config(format!(
                "pushover dispatcher cannot use a '{}' notifier config",
                config.type_name()
            )));
        };

        tracing::debug!("Created PushoverDispatcher with title '{}'", default_title);

        Ok(Self {
            api_token: api_token.clone(),
            user_key: user_key.clone(),
            default_title: default_title.clone(),
            default_priority: *default_priority,
            default_sound: default_sound.clone(),
            http,
        })
    }
}

#[async_trait]
impl NotificationDispatcher for PushoverDispatcher {
    fn type_name(&self) -> &str {
        "pushover"
    }

    /// A non-empty destination overrides the configured user key
    async fn send(&self, destination: &str, subject: &str, body: &str) -> crate::Result<()> {
        let user = if destination.is_empty() {
            &self.user_key
        } else {
            destination
        };
        let title = if subject.is_empty() {
            &self.default_title
        } else {
            subject
        };

        let params = vec![
            ("token".to_string(), self.api_token.clone()),
            ("user".to_string(), user.to_string()),
            ("title".to_string(), title.to_string()),
            ("message".to_string(), body.to_string()),
            ("priority".to_string(), self.default_priority.to_string()),
            ("sound".to_string(), self.default_sound.clone()),
        ];

        tracing::debug!(
            "Sending Pushover notification: title='{}', priority={}",
            title,
            self.default_priority
        );

        let request = HttpRequest::post(PUSHOVER_API_URL).with_form(params);
        let response = self.http.execute(&request).await?;

        if response.status != 200 {
            return Err(crate::SlotwatchError::Notifier(format!(
                "Pushover API returned status {}: {}",
                response.status, response.body
            )));
        }

        tracing::debug!("Pushover notification sent successfully");
        Ok(())
    }
}
