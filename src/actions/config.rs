use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which tools a tenant exposes to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionFeatures {
    pub lead_collection: bool,
    pub appointments: bool,
    pub email: bool,
    pub pdf: bool,
    pub whatsapp: bool,
    pub sms: bool,
    pub webhooks: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSettings {
    pub calendar_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(default)]
    pub sms_from: Option<String>,
    #[serde(default)]
    pub whatsapp_from: Option<String>,
    /// Content template used for appointment confirmations; templates are not bound to the
    /// 24-hour customer-service window, freeform messages are.
    #[serde(default)]
    pub whatsapp_template_sid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "lead.created")]
    LeadCreated,
    #[serde(rename = "appointment.created")]
    AppointmentCreated,
    #[serde(rename = "email.sent")]
    EmailSent,
    #[serde(rename = "pdf.created")]
    PdfCreated,
    #[serde(rename = "whatsapp.sent")]
    WhatsappSent,
    #[serde(rename = "webhook.triggered")]
    WebhookTriggered,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeadCreated => "lead.created",
            Self::AppointmentCreated => "appointment.created",
            Self::EmailSent => "email.sent",
            Self::PdfCreated => "pdf.created",
            Self::WhatsappSent => "whatsapp.sent",
            Self::WebhookTriggered => "webhook.triggered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    /// Subscribed events; empty means every event.
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

impl WebhookSettings {
    pub fn wants(&self, event: WebhookEvent) -> bool {
        self.events.is_empty() || self.events.contains(&event)
    }
}

/// Per-bot action configuration, validated once when saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotActionsConfig {
    #[serde(default)]
    pub features: ActionFeatures,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub notification_email: Option<String>,
    #[serde(default)]
    pub calendar: Option<CalendarSettings>,
    #[serde(default)]
    pub twilio: Option<TwilioSettings>,
    #[serde(default)]
    pub webhook: Option<WebhookSettings>,
    /// Fixed offset applied to timezone-less appointment times.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    pub field: &'static str,
    pub message: String,
}

impl BotActionsConfig {
    pub fn validate(&self) -> Result<(), ConfigViolation> {
        if let Some(email) = self.notification_email.as_deref() {
            if !is_valid_email(email) {
                return Err(violation("notificationEmail", format!("invalid email: {email}")));
            }
        }
        if let Some(calendar) = &self.calendar {
            if calendar.calendar_id.trim().is_empty() || calendar.access_token.trim().is_empty() {
                return Err(violation(
                    "calendar",
                    "calendarId and accessToken are required",
                ));
            }
        }
        if let Some(twilio) = &self.twilio {
            if twilio.account_sid.trim().is_empty() || twilio.auth_token.trim().is_empty() {
                return Err(violation("twilio", "accountSid and authToken are required"));
            }
            for (field, number) in [
                ("twilio.smsFrom", twilio.sms_from.as_deref()),
                ("twilio.whatsappFrom", twilio.whatsapp_from.as_deref()),
            ] {
                if let Some(number) = number {
                    if normalize_e164(number).is_none() {
                        return Err(violation(field, format!("Invalid phone number: {number}")));
                    }
                }
            }
        }
        if (self.features.sms || self.features.whatsapp) && self.twilio.is_none() {
            return Err(violation(
                "twilio",
                "SMS/WhatsApp features require Twilio credentials",
            ));
        }
        if let Some(webhook) = &self.webhook {
            match url::Url::parse(&webhook.url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => return Err(violation("webhook.url", format!("invalid URL: {}", webhook.url))),
            }
        }
        if let Some(offset) = self.utc_offset_minutes {
            if offset.abs() > 14 * 60 {
                return Err(violation("utcOffsetMinutes", "offset must be within +/-14h"));
            }
        }
        Ok(())
    }
}

fn violation(field: &'static str, message: impl Into<String>) -> ConfigViolation {
    ConfigViolation {
        field,
        message: message.into(),
    }
}

pub fn is_valid_email(value: &str) -> bool {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .map(|re| re.is_match(value.trim()))
        .unwrap_or(false)
}

/// Normalizes a phone number to E.164 (`+` followed by 8-15 digits). Numbers written with a
/// leading `00` international prefix are accepted.
pub fn normalize_e164(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("whatsapp:").unwrap_or(trimmed);
    let has_plus = trimmed.starts_with('+');
    let mut digits = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if !has_plus {
        digits = digits.strip_prefix("00")?.to_string();
    }
    if digits.len() < 8 || digits.len() > 15 || digits.starts_with('0') {
        return None;
    }
    Some(format!("+{digits}"))
}

/// Health of one notification channel, replaced as a whole on every attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelHealth {
    #[default]
    NeverAttempted,
    Healthy {
        at: String,
    },
    Unhealthy {
        reason: String,
        at: String,
    },
}

impl ChannelHealth {
    pub fn from_result<T>(result: &Result<T, String>, at: String) -> Self {
        match result {
            Ok(_) => Self::Healthy { at },
            Err(reason) => Self::Unhealthy {
                reason: reason.clone(),
                at,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Calendar,
    Email,
    Sms,
    Whatsapp,
}

impl NotificationChannel {
    pub fn key(self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelHealthBoard {
    pub calendar: ChannelHealth,
    pub email: ChannelHealth,
    pub sms: ChannelHealth,
    pub whatsapp: ChannelHealth,
}

impl ChannelHealthBoard {
    pub fn get(&self, channel: NotificationChannel) -> &ChannelHealth {
        match channel {
            NotificationChannel::Calendar => &self.calendar,
            NotificationChannel::Email => &self.email,
            NotificationChannel::Sms => &self.sms,
            NotificationChannel::Whatsapp => &self.whatsapp,
        }
    }

    pub fn set(&mut self, channel: NotificationChannel, health: ChannelHealth) {
        match channel {
            NotificationChannel::Calendar => self.calendar = health,
            NotificationChannel::Email => self.email = health,
            NotificationChannel::Sms => self.sms = health,
            NotificationChannel::Whatsapp => self.whatsapp = health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_normalization() {
        assert_eq!(normalize_e164("+972 50-123-4567").as_deref(), Some("+972501234567"));
        assert_eq!(normalize_e164("00447911123456").as_deref(), Some("+447911123456"));
        assert_eq!(normalize_e164("whatsapp:+14155550100").as_deref(), Some("+14155550100"));
        assert_eq!(normalize_e164("050-123-4567"), None);
        assert_eq!(normalize_e164("+12"), None);
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("dana@example.co.il"));
        assert!(!is_valid_email("dana@example"));
        assert!(!is_valid_email("dana example@x.com"));
    }

    #[test]
    fn messaging_features_need_twilio() {
        let config = BotActionsConfig {
            features: ActionFeatures {
                sms: true,
                ..ActionFeatures::default()
            },
            ..BotActionsConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "twilio");
    }

    #[test]
    fn webhook_subscriptions_default_to_everything() {
        let mut hook = WebhookSettings {
            url: "https://hooks.example.com".to_string(),
            secret: None,
            events: vec![],
        };
        assert!(hook.wants(WebhookEvent::PdfCreated));
        hook.events = vec![WebhookEvent::LeadCreated];
        assert!(!hook.wants(WebhookEvent::PdfCreated));
    }

    #[test]
    fn health_serializes_as_tagged_state() {
        let health = ChannelHealth::Unhealthy {
            reason: "401".to_string(),
            at: "2026-01-01T00:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["state"], "unhealthy");
        let board: ChannelHealthBoard = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(board.get(NotificationChannel::Sms), &ChannelHealth::NeverAttempted);
    }
}
