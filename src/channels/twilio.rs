use async_trait::async_trait;
use serde_json::Value;

use super::{rejected, ChannelError, MessagingChannel, WhatsappTemplate};
use crate::actions::config::TwilioSettings;

#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
}

impl TwilioClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, "https://api.twilio.com")
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn create_message(
        &self,
        settings: &TwilioSettings,
        form: &[(&str, String)],
    ) -> Result<String, ChannelError> {
        let response = self
            .http
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.base_url, settings.account_sid
            ))
            .basic_auth(&settings.account_sid, Some(&settings.auth_token))
            .form(form)
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
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[async_trait]
impl MessagingChannel for TwilioClient {
    async fn send_sms(
        &self,
        settings: &TwilioSettings,
        to: &str,
        body: &str,
    ) -> Result<String, ChannelError> {
        let from = settings
            .sms_from
            .as_deref()
            .ok_or(ChannelError::NotConfigured("twilio sms sender"))?;
        self.create_message(
            settings,
            &[
                ("To", to.to_string()),
                ("From", from.to_string()),
                ("Body", body.to_string()),
            ],
        )
        .await
    }

    async fn send_whatsapp(
        &self,
        settings: &TwilioSettings,
        to: &str,
        body: &str,
        template: Option<&WhatsappTemplate>,
    ) -> Result<String, ChannelError> {
        let from = settings
            .whatsapp_from
            .as_deref()
            .ok_or(ChannelError::NotConfigured("twilio whatsapp sender"))?;
        let mut form = vec![
            ("To", whatsapp_address(to)),
            ("From", whatsapp_address(from)),
        ];
        match template {
            Some(template) => {
                form.push(("ContentSid", template.content_sid.clone()));
                form.push(("ContentVariables", template.variables.to_string()));
            }
            None => form.push(("Body", body.to_string())),
        }
        self.create_message(settings, &form).await
    }
}
