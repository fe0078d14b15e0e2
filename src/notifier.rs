//! Delivery of extracted codes to a chat webhook.

use crate::config::{RelayConfig, CODE_PLACEHOLDER, DEFAULT_MESSAGE_TEMPLATE};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Delivers a login code somewhere a human will see it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one code. Called at most once per successfully classified message.
    async fn notify(&self, code: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": "..."}` to an incoming-webhook URL (Slack and compatibles).
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    template: String,
}

impl WebhookNotifier {
    /// Creates a notifier with the default message template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebhookClient`] if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::WebhookClient { source })?;

        Ok(Self {
            client,
            url,
            template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
        })
    }

    /// Creates a notifier from the relay configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebhookClient`] if the HTTP client cannot be built.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Ok(Self::new(config.webhook_url().clone(), config.timeouts.webhook)?
            .with_template(config.message_template.clone()))
    }

    /// Replaces the message template. `{code}` is substituted with the code.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Renders the chat message for `code`.
    #[must_use]
    pub fn render(&self, code: &str) -> String {
        self.template.replace(CODE_PLACEHOLDER, code)
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("host", &self.url.host_str())
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(
        name = "WebhookNotifier::notify",
        skip_all,
        fields(host = ?self.url.host_str())
    )]
    async fn notify(&self, code: &str) -> Result<()> {
        let text = self.render(code);

        let response = self
            .client
            .post(self.url.clone())
            .json(&WebhookPayload { text: &text })
            .send()
            .await
            .map_err(|source| Error::WebhookRequest { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::WebhookStatus {
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), "Webhook accepted code");
        Ok(())
    }
}
