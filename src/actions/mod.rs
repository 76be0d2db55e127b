//! Tool-call dispatch. Every invocation is timed and leaves exactly one execution record.

pub mod appointment;
pub mod config;

use std::{path::PathBuf, sync::Arc, time::Instant};

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::{ChannelError, Channels, EmailMessage, WhatsappTemplate};
use crate::error::StoreError;
use crate::llm::ToolSpec;
use crate::now_iso;
use crate::prompting::{render_pdf_html, PdfDocumentContext};
use crate::store::{ActionStore, ConversationStore};
use crate::types::{ActionExecution, Bot, ExecutionStatus, Lead, UsageKind};

use self::config::{
    is_valid_email, normalize_e164, ActionFeatures, BotActionsConfig, ChannelHealth,
    NotificationChannel, TwilioSettings, WebhookEvent,
};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown tool {0}")]
    UnknownTool(String),
    #[error("{0} is not enabled for this bot")]
    Disabled(&'static str),
    #[error("{0} is not configured for this bot")]
    NotConfigured(&'static str),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not store file: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SaveLead,
    ScheduleAppointment,
    SendEmail,
    CreatePdf,
    SendWhatsapp,
    TriggerWebhook,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::SaveLead,
        ActionKind::ScheduleAppointment,
        ActionKind::SendEmail,
        ActionKind::CreatePdf,
        ActionKind::SendWhatsapp,
        ActionKind::TriggerWebhook,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::SaveLead => "save_lead",
            Self::ScheduleAppointment => "schedule_appointment",
            Self::SendEmail => "send_email",
            Self::CreatePdf => "create_pdf",
            Self::SendWhatsapp => "send_whatsapp",
            Self::TriggerWebhook => "trigger_webhook",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tool_name() == name)
    }

    pub fn enabled(self, features: &ActionFeatures) -> bool {
        match self {
            Self::SaveLead => features.lead_collection,
            Self::ScheduleAppointment => features.appointments,
            Self::SendEmail => features.email,
            Self::CreatePdf => features.pdf,
            Self::SendWhatsapp => features.whatsapp,
            Self::TriggerWebhook => features.webhooks,
        }
    }

    pub fn tool_spec(self) -> ToolSpec {
        match self {
            Self::SaveLead => ToolSpec {
                name: self.tool_name(),
                description: "Save the visitor's contact details as a lead for the business.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Full name" },
                        "email": { "type": "string" },
                        "phone": { "type": "string", "description": "Phone in international format" },
                        "notes": { "type": "string", "description": "What the visitor is interested in" }
                    },
                    "required": ["name"]
                }),
            },
            Self::ScheduleAppointment => ToolSpec {
                name: self.tool_name(),
                description: "Book an appointment after the visitor confirmed every detail.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "email": { "type": "string" },
                        "phone": { "type": "string" },
                        "start_time": { "type": "string", "description": "Local date and time, YYYY-MM-DDTHH:MM" },
                        "duration_minutes": { "type": "integer", "default": 30 },
                        "notes": { "type": "string" },
                        "lead_id": { "type": "string" }
                    },
                    "required": ["name", "start_time"]
                }),
            },
            Self::SendEmail => ToolSpec {
                name: self.tool_name(),
                description: "Send an email to the visitor.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "to": { "type": "string" },
                        "subject": { "type": "string" },
                        "body": { "type": "string" }
                    },
                    "required": ["to", "subject", "body"]
                }),
            },
            Self::CreatePdf => ToolSpec {
                name: self.tool_name(),
                description: "Create a PDF document (quote, summary, instructions) and return its link.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "content": { "type": "string" },
                        "email_to": { "type": "string", "description": "Optionally email the link here" }
                    },
                    "required": ["title", "content"]
                }),
            },
            Self::SendWhatsapp => ToolSpec {
                name: self.tool_name(),
                description: "Send a WhatsApp message to the visitor's phone.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "to": { "type": "string", "description": "Phone in international format" },
                        "message": { "type": "string" }
                    },
                    "required": ["to", "message"]
                }),
            },
            Self::TriggerWebhook => ToolSpec {
                name: self.tool_name(),
                description: "Notify the business's systems with structured data from the conversation.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "data": { "type": "object", "description": "Free-form payload" }
                    },
                    "required": ["data"]
                }),
            },
        }
    }
}

/// The tools this bot exposes, in a stable order.
pub fn enabled_tools(features: &ActionFeatures) -> Vec<ToolSpec> {
    ActionKind::ALL
        .into_iter()
        .filter(|kind| kind.enabled(features))
        .map(ActionKind::tool_spec)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub start_time: String,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailInput {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdfInput {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub email_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsappInput {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInput {
    pub data: Value,
}

/// A parsed tool call; one variant per action.
#[derive(Debug, Clone)]
pub enum ActionRequest {
    SaveLead(LeadInput),
    ScheduleAppointment(AppointmentInput),
    SendEmail(EmailInput),
    CreatePdf(PdfInput),
    SendWhatsapp(WhatsappInput),
    TriggerWebhook(WebhookInput),
}

impl ActionRequest {
    pub fn parse(kind: ActionKind, arguments: &Value) -> Result<Self, ActionError> {
        fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, ActionError> {
            serde_json::from_value(value.clone())
                .map_err(|err| ActionError::InvalidArguments(err.to_string()))
        }
        Ok(match kind {
            ActionKind::SaveLead => Self::SaveLead(decode(arguments)?),
            ActionKind::ScheduleAppointment => Self::ScheduleAppointment(decode(arguments)?),
            ActionKind::SendEmail => Self::SendEmail(decode(arguments)?),
            ActionKind::CreatePdf => Self::CreatePdf(decode(arguments)?),
            ActionKind::SendWhatsapp => Self::SendWhatsapp(decode(arguments)?),
            ActionKind::TriggerWebhook => Self::TriggerWebhook(decode(arguments)?),
        })
    }
}

pub struct ActionContext<'a> {
    pub bot: &'a Bot,
    pub chat_id: Option<&'a str>,
    pub config: &'a BotActionsConfig,
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub storage_dir: PathBuf,
    pub public_base_url: String,
}

/// Which Twilio channel ended up carrying a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDelivery {
    pub channel: NotificationChannel,
    pub sid: String,
    pub fell_back: bool,
}

#[derive(Clone)]
pub struct ActionExecutor {
    store: Arc<dyn ActionStore>,
    usage: Arc<dyn ConversationStore>,
    channels: Channels,
    media: MediaSettings,
    default_utc_offset_minutes: i32,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn ActionStore>,
        usage: Arc<dyn ConversationStore>,
        channels: Channels,
        media: MediaSettings,
        default_utc_offset_minutes: i32,
    ) -> Self {
        Self {
            store,
            usage,
            channels,
            media,
            default_utc_offset_minutes,
        }
    }

    /// Runs one tool call and returns `{success, ...fields, error?}`. Never fails.
    pub async fn execute(&self, ctx: &ActionContext<'_>, tool_name: &str, arguments: &str) -> Value {
        let started = Instant::now();
        let input = serde_json::from_str::<Value>(arguments)
            .unwrap_or_else(|_| Value::String(arguments.to_string()));

        let outcome = self.dispatch(ctx, tool_name, &input).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (result, status, error) = match outcome {
            Ok(fields) => {
                let mut result = Map::new();
                result.insert("success".to_string(), Value::Bool(true));
                result.extend(fields);
                (Value::Object(result), ExecutionStatus::Success, None)
            }
            Err(err) => {
                let message = err.to_string();
                (
                    json!({ "success": false, "error": message }),
                    ExecutionStatus::Failed,
                    Some(message),
                )
            }
        };

        let record = ActionExecution {
            id: Uuid::new_v4().to_string(),
            bot_id: ctx.bot.id.clone(),
            chat_id: ctx.chat_id.map(str::to_string),
            action_type: tool_name.to_string(),
            input,
            result: result.clone(),
            status,
            error: error.clone(),
            duration_ms,
            created_at: now_iso(),
        };
        if let Err(err) = self.store.insert_action_log(&record).await {
            warn!(bot_id = %ctx.bot.id, tool = tool_name, error = %err, "could not write action log");
        }
        match &error {
            None => info!(bot_id = %ctx.bot.id, tool = tool_name, duration_ms, "action succeeded"),
            Some(message) => warn!(
                bot_id = %ctx.bot.id,
                tool = tool_name,
                duration_ms,
                error = %message,
                "action failed"
            ),
        }
        result
    }

    async fn dispatch(
        &self,
        ctx: &ActionContext<'_>,
        tool_name: &str,
        input: &Value,
    ) -> Result<Map<String, Value>, ActionError> {
        let kind = ActionKind::from_tool_name(tool_name)
            .ok_or_else(|| ActionError::UnknownTool(tool_name.to_string()))?;
        if !kind.enabled(&ctx.config.features) {
            return Err(ActionError::Disabled(kind.tool_name()));
        }
        match ActionRequest::parse(kind, input)? {
            ActionRequest::SaveLead(input) => self.save_lead(ctx, input).await,
            ActionRequest::ScheduleAppointment(input) => self.schedule_appointment(ctx, input).await,
            ActionRequest::SendEmail(input) => self.send_email(ctx, input).await,
            ActionRequest::CreatePdf(input) => self.create_pdf(ctx, input).await,
            ActionRequest::SendWhatsapp(input) => self.send_whatsapp(ctx, input).await,
            ActionRequest::TriggerWebhook(input) => self.trigger_webhook(ctx, input).await,
        }
    }

    //  Handlers

    async fn save_lead(
        &self,
        ctx: &ActionContext<'_>,
        input: LeadInput,
    ) -> Result<Map<String, Value>, ActionError> {
        let lead = self
            .create_lead(
                &ctx.bot.id,
                &input.name,
                input.email.as_deref(),
                input.phone.as_deref(),
                input.notes.as_deref(),
                "chat",
            )
            .await?;

        if let Some(owner_email) = ctx.config.notification_email.as_deref() {
            let message = EmailMessage {
                to: owner_email.to_string(),
                subject: format!("New lead from {}", ctx.bot.name),
                html: format!(
                    "<p>Name: {}</p><p>Email: {}</p><p>Phone: {}</p><p>{}</p>",
                    escape_html(&lead.name),
                    escape_html(lead.email.as_deref().unwrap_or("-")),
                    escape_html(lead.phone.as_deref().unwrap_or("-")),
                    escape_html(lead.notes.as_deref().unwrap_or(""))
                ),
            };
            if let Err(err) = self.channels.email.send(&message).await {
                warn!(bot_id = %ctx.bot.id, error = %err, "lead notification email failed");
            }
        }

        self.notify_webhook(ctx, WebhookEvent::LeadCreated, json!(lead))
            .await;
        Ok(fields([
            ("leadId", json!(lead.id)),
            ("name", json!(lead.name)),
        ]))
    }

    async fn send_email(
        &self,
        ctx: &ActionContext<'_>,
        input: EmailInput,
    ) -> Result<Map<String, Value>, ActionError> {
        let to = input.to.trim();
        if !is_valid_email(to) {
            return Err(ActionError::Validation(format!("Invalid email address: {to}")));
        }
        if input.subject.trim().is_empty() || input.body.trim().is_empty() {
            return Err(ActionError::Validation(
                "subject and body are required".to_string(),
            ));
        }
        let message_id = self
            .channels
            .email
            .send(&EmailMessage {
                to: to.to_string(),
                subject: input.subject.trim().to_string(),
                html: plain_text_to_html(&input.body),
            })
            .await?;
        self.notify_webhook(
            ctx,
            WebhookEvent::EmailSent,
            json!({ "to": to, "subject": input.subject.trim() }),
        )
        .await;
        Ok(fields([
            ("to", json!(to)),
            ("messageId", json!(message_id)),
        ]))
    }

    async fn create_pdf(
        &self,
        ctx: &ActionContext<'_>,
        input: PdfInput,
    ) -> Result<Map<String, Value>, ActionError> {
        if input.title.trim().is_empty() || input.content.trim().is_empty() {
            return Err(ActionError::Validation(
                "title and content are required".to_string(),
            ));
        }
        let generated_at = now_iso();
        let html = render_pdf_html(&PdfDocumentContext {
            title: input.title.trim(),
            content: input.content.trim(),
            business_name: ctx.config.business_name.as_deref(),
            language: ctx.bot.language,
            generated_at: &generated_at,
        })
        .map_err(|err| ActionError::Channel(ChannelError::Render(err.to_string())))?;
        let bytes = self.channels.pdf.render(&html).await?;

        let file_name = format!("{}.pdf", Uuid::new_v4());
        tokio::fs::create_dir_all(&self.media.storage_dir)
            .await
            .map_err(|err| ActionError::Io(err.to_string()))?;
        tokio::fs::write(self.media.storage_dir.join(&file_name), &bytes)
            .await
            .map_err(|err| ActionError::Io(err.to_string()))?;
        let url = format!("{}/api/media/{}", self.media.public_base_url, file_name);

        let mut emailed = false;
        if let Some(email_to) = input.email_to.as_deref().map(str::trim) {
            if is_valid_email(email_to) {
                let message = EmailMessage {
                    to: email_to.to_string(),
                    subject: input.title.trim().to_string(),
                    html: format!(
                        "<p>{}</p><p><a href=\"{url}\">{url}</a></p>",
                        escape_html(input.title.trim())
                    ),
                };
                match self.channels.email.send(&message).await {
                    Ok(_) => emailed = true,
                    Err(err) => {
                        warn!(bot_id = %ctx.bot.id, error = %err, "pdf link email failed")
                    }
                }
            }
        }

        self.notify_webhook(
            ctx,
            WebhookEvent::PdfCreated,
            json!({ "url": url, "title": input.title.trim() }),
        )
        .await;
        Ok(fields([
            ("url", json!(url)),
            ("fileName", json!(file_name)),
            ("emailed", json!(emailed)),
        ]))
    }

    async fn send_whatsapp(
        &self,
        ctx: &ActionContext<'_>,
        input: WhatsappInput,
    ) -> Result<Map<String, Value>, ActionError> {
        let twilio = ctx
            .config
            .twilio
            .as_ref()
            .ok_or(ActionError::NotConfigured("twilio"))?;
        let to = normalize_e164(&input.to)
            .ok_or_else(|| ActionError::Validation(format!("Invalid phone number: {}", input.to)))?;
        if input.message.trim().is_empty() {
            return Err(ActionError::Validation("message is required".to_string()));
        }
        let delivery = self
            .deliver_text(
                &ctx.bot.id,
                twilio,
                true,
                ctx.config.features.sms,
                &to,
                input.message.trim(),
                None,
            )
            .await?;
        self.notify_webhook(
            ctx,
            WebhookEvent::WhatsappSent,
            json!({ "to": to, "channel": delivery.channel.key() }),
        )
        .await;
        Ok(fields([
            ("to", json!(to)),
            ("channel", json!(delivery.channel.key())),
            ("fallback", json!(delivery.fell_back)),
            ("sid", json!(delivery.sid)),
        ]))
    }

    async fn trigger_webhook(
        &self,
        ctx: &ActionContext<'_>,
        input: WebhookInput,
    ) -> Result<Map<String, Value>, ActionError> {
        let webhook = ctx
            .config
            .webhook
            .as_ref()
            .ok_or(ActionError::NotConfigured("webhook"))?;
        let data = json!({
            "botId": ctx.bot.id,
            "chatId": ctx.chat_id,
            "payload": input.data,
        });
        let status = self
            .channels
            .webhook
            .deliver(webhook, WebhookEvent::WebhookTriggered, &data)
            .await?;
        Ok(fields([("status", json!(status))]))
    }

    //  Shared steps

    pub(crate) async fn create_lead(
        &self,
        bot_id: &str,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
        notes: Option<&str>,
        source: &str,
    ) -> Result<Lead, ActionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ActionError::Validation("name is required".to_string()));
        }
        let email = email.map(str::trim).filter(|email| !email.is_empty());
        if let Some(email) = email {
            if !is_valid_email(email) {
                return Err(ActionError::Validation(format!(
                    "Invalid email address: {email}"
                )));
            }
        }
        let phone = match phone.map(str::trim).filter(|phone| !phone.is_empty()) {
            Some(raw) => Some(normalize_e164(raw).ok_or_else(|| {
                ActionError::Validation(format!("Invalid phone number: {raw}"))
            })?),
            None => None,
        };
        let lead = Lead {
            id: Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
            phone,
            notes: notes
                .map(str::trim)
                .filter(|notes| !notes.is_empty())
                .map(str::to_string),
            source: source.to_string(),
            created_at: now_iso(),
        };
        self.store.insert_lead(&lead).await?;
        Ok(lead)
    }

    /// WhatsApp first when preferred; SMS on a session-window rejection or when SMS is allowed.
    /// Usage counters move only on confirmed sends.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn deliver_text(
        &self,
        bot_id: &str,
        twilio: &TwilioSettings,
        prefer_whatsapp: bool,
        allow_sms: bool,
        to: &str,
        body: &str,
        template: Option<&WhatsappTemplate>,
    ) -> Result<MessageDelivery, ChannelError> {
        if prefer_whatsapp && twilio.whatsapp_from.is_some() {
            let result = self
                .channels
                .messaging
                .send_whatsapp(twilio, to, body, template)
                .await;
            self.record_health(bot_id, NotificationChannel::Whatsapp, &result)
                .await;
            match result {
                Ok(sid) => {
                    self.count_usage(bot_id, UsageKind::Whatsapp).await;
                    return Ok(MessageDelivery {
                        channel: NotificationChannel::Whatsapp,
                        sid,
                        fell_back: false,
                    });
                }
                Err(err) => {
                    let window = err.is_whatsapp_window_error();
                    if !(window || allow_sms) || twilio.sms_from.is_none() {
                        return Err(err);
                    }
                    info!(bot_id, window, "whatsapp failed, falling back to sms");
                    return self.deliver_sms(bot_id, twilio, to, body, true).await;
                }
            }
        }
        if allow_sms {
            return self.deliver_sms(bot_id, twilio, to, body, false).await;
        }
        Err(ChannelError::NotConfigured("whatsapp sender"))
    }

    async fn deliver_sms(
        &self,
        bot_id: &str,
        twilio: &TwilioSettings,
        to: &str,
        body: &str,
        fell_back: bool,
    ) -> Result<MessageDelivery, ChannelError> {
        let result = self.channels.messaging.send_sms(twilio, to, body).await;
        self.record_health(bot_id, NotificationChannel::Sms, &result)
            .await;
        let sid = result?;
        self.count_usage(bot_id, UsageKind::Sms).await;
        Ok(MessageDelivery {
            channel: NotificationChannel::Sms,
            sid,
            fell_back,
        })
    }

    pub(crate) async fn record_health<T>(
        &self,
        bot_id: &str,
        channel: NotificationChannel,
        result: &Result<T, ChannelError>,
    ) {
        let summary = result.as_ref().map(|_| ()).map_err(ToString::to_string);
        let health = ChannelHealth::from_result(&summary, now_iso());
        if let Err(err) = self
            .store
            .record_channel_health(bot_id, channel, &health)
            .await
        {
            warn!(bot_id, channel = channel.key(), error = %err, "could not record channel health");
        }
    }

    async fn count_usage(&self, bot_id: &str, kind: UsageKind) {
        if let Err(err) = self.usage.increment_usage(bot_id, kind).await {
            warn!(bot_id, kind = kind.as_str(), error = %err, "usage counter update failed");
        }
    }

    /// Fires a tenant webhook for `event` when subscribed. Failures are logged only.
    async fn notify_webhook(&self, ctx: &ActionContext<'_>, event: WebhookEvent, data: Value) {
        if !ctx.config.features.webhooks {
            return;
        }
        let Some(webhook) = ctx.config.webhook.as_ref() else {
            return;
        };
        if !webhook.wants(event) {
            return;
        }
        if let Err(err) = self.channels.webhook.deliver(webhook, event, &data).await {
            warn!(bot_id = %ctx.bot.id, event = event.as_str(), error = %err, "webhook delivery failed");
        }
    }
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub(crate) fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn plain_text_to_html(text: &str) -> String {
    text.trim()
        .split("\n\n")
        .map(|paragraph| format!("<p>{}</p>", escape_html(paragraph).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_list_follows_feature_flags() {
        let features = ActionFeatures {
            lead_collection: true,
            webhooks: true,
            ..ActionFeatures::default()
        };
        let names = enabled_tools(&features)
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["save_lead", "trigger_webhook"]);
        assert!(enabled_tools(&ActionFeatures::default()).is_empty());
    }

    #[test]
    fn tool_names_round_trip_to_kinds() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_tool_name(kind.tool_name()), Some(kind));
        }
        assert_eq!(ActionKind::from_tool_name("delete_everything"), None);
    }

    #[test]
    fn malformed_arguments_are_typed_errors() {
        let err = ActionRequest::parse(ActionKind::SendEmail, &json!({ "to": "a@b.co" }))
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(_)));
    }

    #[test]
    fn plain_text_email_bodies_are_escaped() {
        let html = plain_text_to_html("Hi <b>Dana</b>\nline two\n\nBye");
        assert_eq!(html, "<p>Hi &lt;b&gt;Dana&lt;/b&gt;<br>line two</p><p>Bye</p>");
    }
}
