//! Outbound side-effect channels. Each sits behind a trait so the action executor and tests can
//! swap the real HTTP clients for fakes.

pub mod calendar;
pub mod pdf;
pub mod resend;
pub mod telegram;
pub mod twilio;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::config::{CalendarSettings, TwilioSettings, WebhookEvent, WebhookSettings};

pub use calendar::GoogleCalendarClient;
pub use pdf::ChromePdfRenderer;
pub use resend::ResendClient;
pub use telegram::TelegramClient;
pub use twilio::TwilioClient;
pub use webhook::HttpWebhookClient;

/// Twilio error code for a freeform WhatsApp message sent outside the 24-hour session window.
pub const WHATSAPP_WINDOW_ERROR_CODE: &str = "63016";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(String),
    #[error("provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("{0}")]
    Render(String),
}

impl ChannelError {
    pub fn is_whatsapp_window_error(&self) -> bool {
        self.to_string().contains(WHATSAPP_WINDOW_ERROR_CODE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    /// RFC 3339 with offset.
    pub start: String,
    pub end: String,
    pub attendee_email: Option<String>,
}

/// WhatsApp content template plus its positional variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WhatsappTemplate {
    pub content_sid: String,
    pub variables: Value,
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send_sms(
        &self,
        settings: &TwilioSettings,
        to: &str,
        body: &str,
    ) -> Result<String, ChannelError>;

    async fn send_whatsapp(
        &self,
        settings: &TwilioSettings,
        to: &str,
        body: &str,
        template: Option<&WhatsappTemplate>,
    ) -> Result<String, ChannelError>;
}

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<String, ChannelError>;
}

#[async_trait]
pub trait CalendarChannel: Send + Sync {
    async fn create_event(
        &self,
        settings: &CalendarSettings,
        event: &CalendarEvent,
    ) -> Result<String, ChannelError>;
}

#[async_trait]
pub trait WebhookChannel: Send + Sync {
    /// Delivers one event and returns the receiver's HTTP status.
    async fn deliver(
        &self,
        settings: &WebhookSettings,
        event: WebhookEvent,
        data: &Value,
    ) -> Result<u16, ChannelError>;
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Vec<u8>, ChannelError>;
}

#[async_trait]
pub trait TelegramSender: Send + Sync {
    async fn send_message(
        &self,
        bot_token: &str,
        chat_id: i64,
        text: &str,
    ) -> Result<(), ChannelError>;
}

/// Every outbound collaborator, constructed once at boot.
#[derive(Clone)]
pub struct Channels {
    pub messaging: Arc<dyn MessagingChannel>,
    pub email: Arc<dyn EmailChannel>,
    pub calendar: Arc<dyn CalendarChannel>,
    pub webhook: Arc<dyn WebhookChannel>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub telegram: Arc<dyn TelegramSender>,
}

pub(crate) async fn rejected(response: reqwest::Response) -> ChannelError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ChannelError::Rejected { status, body }
}
