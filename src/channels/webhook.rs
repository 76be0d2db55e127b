use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use super::{ChannelError, WebhookChannel};
use crate::actions::config::{WebhookEvent, WebhookSettings};
use crate::now_iso;

pub const SIGNATURE_HEADER: &str = "x-agentdesk-signature";
pub const EVENT_HEADER: &str = "x-agentdesk-event";

#[derive(Clone)]
pub struct HttpWebhookClient {
    http: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

/// `sha256=<hex HMAC-SHA256(secret, body)>`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Constant-time check of a signature header against the raw body.
pub fn verify_signature(secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

pub fn event_body(event: WebhookEvent, data: &Value) -> Value {
    json!({
        "event": event.as_str(),
        "timestamp": now_iso(),
        "data": data,
    })
}

#[async_trait]
impl WebhookChannel for HttpWebhookClient {
    async fn deliver(
        &self,
        settings: &WebhookSettings,
        event: WebhookEvent,
        data: &Value,
    ) -> Result<u16, ChannelError> {
        let body = serde_json::to_vec(&event_body(event, data))
            .map_err(|err| ChannelError::Render(err.to_string()))?;
        let mut request = self
            .http
            .post(&settings.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, event.as_str());
        if let Some(secret) = settings.secret.as_deref().filter(|s| !s.is_empty()) {
            if let Some(signature) = sign(secret, &body) {
                request = request.header(SIGNATURE_HEADER, signature);
            }
        }
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|err| ChannelError::Request(err.to_string()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(super::rejected(response).await);
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn signatures_verify_and_reject_tampering() {
        let body = br#"{"event":"lead.created"}"#;
        let header = sign("whsec", body).unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_signature("whsec", Some(&header), body));
        assert!(!verify_signature("whsec", Some(&header), b"{}"));
        assert!(!verify_signature("other", Some(&header), body));
        assert!(!verify_signature("whsec", None, body));
        assert!(!verify_signature("whsec", Some("sha256=zz"), body));
    }

    #[tokio::test]
    async fn signed_delivery_carries_event_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks")
            .match_header(EVENT_HEADER, "lead.created")
            .match_header(
                SIGNATURE_HEADER,
                Matcher::Regex("^sha256=[0-9a-f]{64}$".to_string()),
            )
            .match_body(Matcher::PartialJson(json!({
                "event": "lead.created",
                "data": { "name": "Dana" }
            })))
            .with_status(204)
            .create_async()
            .await;
        let client = HttpWebhookClient::new(reqwest::Client::new());
        let settings = WebhookSettings {
            url: format!("{}/hooks", server.url()),
            secret: Some("whsec".to_string()),
            events: vec![],
        };
        let status = client
            .deliver(&settings, WebhookEvent::LeadCreated, &json!({ "name": "Dana" }))
            .await
            .unwrap();
        assert_eq!(status, 204);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unsigned_when_no_secret() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks")
            .match_header(SIGNATURE_HEADER, Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;
        let client = HttpWebhookClient::new(reqwest::Client::new());
        let settings = WebhookSettings {
            url: format!("{}/hooks", server.url()),
            secret: None,
            events: vec![],
        };
        client
            .deliver(&settings, WebhookEvent::PdfCreated, &json!({}))
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
