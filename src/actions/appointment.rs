use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::config::{BotActionsConfig, NotificationChannel, WebhookEvent};
use super::{escape_html, fields, ActionContext, ActionError, ActionExecutor, AppointmentInput};
use crate::channels::{CalendarEvent, ChannelError, EmailMessage, WhatsappTemplate};
use crate::now_iso;
use crate::types::{Appointment, AppointmentStatus, Bot, BotLanguage};

const DEFAULT_DURATION_MINUTES: i32 = 30;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses a start time. Values without an offset are read in the tenant's fixed offset.
pub fn normalize_start_time(
    raw: &str,
    offset_minutes: i32,
) -> Result<DateTime<FixedOffset>, ActionError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed);
    }
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .ok_or_else(|| ActionError::Validation(format!("invalid UTC offset {offset_minutes}")))?;
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .ok_or_else(|| ActionError::Validation(format!("Invalid start time: {raw}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Skipped,
    Sent { channel: NotificationChannel },
    Failed { channel: NotificationChannel, reason: String },
}

impl ChannelOutcome {
    fn from_result<T>(channel: NotificationChannel, result: &Result<T, ChannelError>) -> Self {
        match result {
            Ok(_) => Self::Sent { channel },
            Err(err) => Self::Failed {
                channel,
                reason: err.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome of each independent notification attempt for one appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub calendar: ChannelOutcome,
    pub email: ChannelOutcome,
    pub messaging: ChannelOutcome,
}

impl NotificationReport {
    /// Confirmed only when every applicable channel went through.
    pub fn status(&self) -> AppointmentStatus {
        if [&self.calendar, &self.email, &self.messaging]
            .iter()
            .any(|outcome| outcome.is_failed())
        {
            AppointmentStatus::Pending
        } else {
            AppointmentStatus::Confirmed
        }
    }
}

impl ActionExecutor {
    fn offset_for(&self, config: &BotActionsConfig) -> i32 {
        config
            .utc_offset_minutes
            .unwrap_or(self.default_utc_offset_minutes)
    }

    pub(super) async fn schedule_appointment(
        &self,
        ctx: &ActionContext<'_>,
        input: AppointmentInput,
    ) -> Result<Map<String, Value>, ActionError> {
        let start = normalize_start_time(&input.start_time, self.offset_for(ctx.config))?;
        let duration_minutes = input
            .duration_minutes
            .unwrap_or(DEFAULT_DURATION_MINUTES)
            .clamp(5, 480);

        let existing_lead = match input.lead_id.as_deref() {
            Some(lead_id) => self.store.get_lead(&ctx.bot.id, lead_id).await?,
            None => None,
        };
        let lead = match existing_lead {
            Some(lead) => lead,
            None => {
                self.create_lead(
                    &ctx.bot.id,
                    &input.name,
                    input.email.as_deref(),
                    input.phone.as_deref(),
                    input.notes.as_deref(),
                    "appointment",
                )
                .await?
            }
        };

        let now = now_iso();
        let mut appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            bot_id: ctx.bot.id.clone(),
            lead_id: Some(lead.id.clone()),
            attendee_name: lead.name.clone(),
            attendee_email: lead.email.clone(),
            attendee_phone: lead.phone.clone(),
            start_time: start.to_rfc3339(),
            duration_minutes,
            notes: input
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|notes| !notes.is_empty())
                .map(str::to_string),
            status: AppointmentStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_appointment(&appointment).await?;

        let report = self.notify_appointment(ctx.bot, ctx.config, &appointment).await;
        appointment.status = report.status();
        if appointment.status == AppointmentStatus::Confirmed {
            self.store
                .set_appointment_status(&ctx.bot.id, &appointment.id, appointment.status)
                .await?;
        }
        info!(
            bot_id = %ctx.bot.id,
            appointment_id = %appointment.id,
            status = appointment.status.as_str(),
            "appointment booked"
        );

        self.notify_webhook(ctx, WebhookEvent::AppointmentCreated, json!(appointment))
            .await;
        Ok(fields([
            ("appointmentId", json!(appointment.id)),
            ("leadId", json!(lead.id)),
            ("startTime", json!(appointment.start_time)),
            ("status", json!(appointment.status.as_str())),
            ("notifications", json!(report)),
        ]))
    }

    /// Re-runs the notification fan-out for an existing appointment.
    pub async fn renotify_appointment(
        &self,
        bot: &Bot,
        appointment_id: &str,
    ) -> Result<(Appointment, NotificationReport), ActionError> {
        let config = self
            .store
            .actions_config(&bot.id)
            .await?
            .unwrap_or_default();
        let mut appointment = self
            .store
            .get_appointment(&bot.id, appointment_id)
            .await?
            .ok_or(ActionError::NotFound("appointment"))?;
        let report = self.notify_appointment(bot, &config, &appointment).await;
        if report.status() == AppointmentStatus::Confirmed
            && appointment.status != AppointmentStatus::Confirmed
        {
            self.store
                .set_appointment_status(&bot.id, &appointment.id, AppointmentStatus::Confirmed)
                .await?;
            appointment.status = AppointmentStatus::Confirmed;
        }
        Ok((appointment, report))
    }

    /// Attempts calendar, email and phone notifications independently of each other.
    pub(crate) async fn notify_appointment(
        &self,
        bot: &Bot,
        config: &BotActionsConfig,
        appointment: &Appointment,
    ) -> NotificationReport {
        let start = DateTime::parse_from_rfc3339(&appointment.start_time).ok();
        let local_start = start.map(|start| {
            let offset = FixedOffset::east_opt(self.offset_for(config) * 60)
                .unwrap_or_else(|| *start.offset());
            start.with_timezone(&offset)
        });
        let when = local_start
            .map(|start| start.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| appointment.start_time.clone());
        let business = config.business_name.as_deref().unwrap_or(&bot.name);

        let calendar = match (&config.calendar, start) {
            (Some(settings), Some(start)) => {
                let event = CalendarEvent {
                    summary: format!("{} - {}", business, appointment.attendee_name),
                    description: appointment.notes.clone().unwrap_or_default(),
                    start: start.to_rfc3339(),
                    end: (start + Duration::minutes(i64::from(appointment.duration_minutes)))
                        .to_rfc3339(),
                    attendee_email: appointment.attendee_email.clone(),
                };
                let result = self.channels.calendar.create_event(settings, &event).await;
                self.record_health(&bot.id, NotificationChannel::Calendar, &result)
                    .await;
                ChannelOutcome::from_result(NotificationChannel::Calendar, &result)
            }
            _ => ChannelOutcome::Skipped,
        };

        let email = match appointment.attendee_email.as_deref() {
            Some(to) => {
                let message = confirmation_email(bot.language, business, to, appointment, &when);
                let result = self.channels.email.send(&message).await;
                self.record_health(&bot.id, NotificationChannel::Email, &result)
                    .await;
                ChannelOutcome::from_result(NotificationChannel::Email, &result)
            }
            None => ChannelOutcome::Skipped,
        };

        let phone_enabled = config.features.whatsapp || config.features.sms;
        let messaging = match (appointment.attendee_phone.as_deref(), &config.twilio) {
            (Some(phone), Some(twilio)) if phone_enabled => {
                let body = confirmation_text(bot.language, business, &appointment.attendee_name, &when);
                let template = twilio.whatsapp_template_sid.as_ref().map(|content_sid| {
                    let (date, time) = when.split_once(' ').unwrap_or((when.as_str(), ""));
                    WhatsappTemplate {
                        content_sid: content_sid.clone(),
                        variables: json!({
                            "1": appointment.attendee_name,
                            "2": date,
                            "3": time,
                        }),
                    }
                });
                match self
                    .deliver_text(
                        &bot.id,
                        twilio,
                        config.features.whatsapp,
                        config.features.sms,
                        phone,
                        &body,
                        template.as_ref(),
                    )
                    .await
                {
                    Ok(delivery) => ChannelOutcome::Sent {
                        channel: delivery.channel,
                    },
                    Err(err) => {
                        warn!(bot_id = %bot.id, appointment_id = %appointment.id, error = %err, "phone confirmation failed");
                        ChannelOutcome::Failed {
                            channel: if config.features.whatsapp {
                                NotificationChannel::Whatsapp
                            } else {
                                NotificationChannel::Sms
                            },
                            reason: err.to_string(),
                        }
                    }
                }
            }
            _ => ChannelOutcome::Skipped,
        };

        NotificationReport {
            calendar,
            email,
            messaging,
        }
    }
}

fn confirmation_email(
    language: BotLanguage,
    business: &str,
    to: &str,
    appointment: &Appointment,
    when: &str,
) -> EmailMessage {
    let name = escape_html(&appointment.attendee_name);
    let business_html = escape_html(business);
    let (subject, html) = match language {
        BotLanguage::He => (
            format!("אישור פגישה - {business}"),
            format!(
                "<div dir=\"rtl\"><p>שלום {name},</p><p>הפגישה שלך עם {business_html} נקבעה ל-{when} ({} דקות).</p></div>",
                appointment.duration_minutes
            ),
        ),
        BotLanguage::En => (
            format!("Appointment confirmation - {business}"),
            format!(
                "<p>Hi {name},</p><p>Your appointment with {business_html} is booked for {when} ({} minutes).</p>",
                appointment.duration_minutes
            ),
        ),
    };
    EmailMessage {
        to: to.to_string(),
        subject,
        html,
    }
}

fn confirmation_text(language: BotLanguage, business: &str, name: &str, when: &str) -> String {
    match language {
        BotLanguage::He => format!("שלום {name}, הפגישה שלך עם {business} נקבעה ל-{when}."),
        BotLanguage::En => {
            format!("Hi {name}, your appointment with {business} is booked for {when}.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_times_take_the_tenant_offset() {
        let start = normalize_start_time("2026-04-02T10:30", 120).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-04-02T10:30:00+02:00");
    }

    #[test]
    fn explicit_offsets_are_kept() {
        let start = normalize_start_time("2026-04-02T10:30:00Z", 120).unwrap();
        assert_eq!(start.offset().local_minus_utc(), 0);
        assert!(normalize_start_time("next tuesday", 120).is_err());
    }

    #[test]
    fn any_failed_channel_keeps_the_appointment_pending() {
        let mut report = NotificationReport {
            calendar: ChannelOutcome::Skipped,
            email: ChannelOutcome::Sent {
                channel: NotificationChannel::Email,
            },
            messaging: ChannelOutcome::Sent {
                channel: NotificationChannel::Sms,
            },
        };
        assert_eq!(report.status(), AppointmentStatus::Confirmed);
        report.calendar = ChannelOutcome::Failed {
            channel: NotificationChannel::Calendar,
            reason: "401".to_string(),
        };
        assert_eq!(report.status(), AppointmentStatus::Pending);
    }
}
