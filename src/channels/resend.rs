use async_trait::async_trait;
use serde_json::{json, Value};

use super::{rejected, ChannelError, EmailChannel, EmailMessage};
use crate::config::EmailSettings;

#[derive(Clone)]
pub struct ResendClient {
    http: reqwest::Client,
    base_url: String,
    settings: Option<EmailSettings>,
}

impl ResendClient {
    pub fn new(http: reqwest::Client, settings: Option<EmailSettings>) -> Self {
        Self {
            http,
            base_url: "https://api.resend.com".to_string(),
            settings,
        }
    }
}

#[async_trait]
impl EmailChannel for ResendClient {
    async fn send(&self, message: &EmailMessage) -> Result<String, ChannelError> {
        let settings = self
            .settings
            .as_ref()
            .ok_or(ChannelError::NotConfigured("email provider"))?;
        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&settings.resend_api_key)
            .json(&json!({
                "from": settings.from_address,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await
            .map_err(|err| ChannelError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| ChannelError::Request(err.to_string()))?;
        Ok(payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}
