use async_trait::async_trait;
use serde_json::json;

use super::{rejected, ChannelError, TelegramSender};

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[async_trait]
impl TelegramSender for TelegramClient {
    async fn send_message(
        &self,
        bot_token: &str,
        chat_id: i64,
        text: &str,
    ) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(format!("{}/bot{}/sendMessage", self.base_url, bot_token))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|err| ChannelError::Request(err.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(())
    }
}
