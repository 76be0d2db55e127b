//! Tool execution against recording channel fakes.

mod common;

use std::sync::atomic::Ordering;

use agentdesk_server::{
    actions::{
        config::{
            ActionFeatures, BotActionsConfig, CalendarSettings, ChannelHealth, TwilioSettings,
            WebhookEvent, WebhookSettings,
        },
        ActionContext,
    },
    channels::ChannelError,
    store::{ActionStore, ConversationStore},
    types::{AppointmentStatus, Bot, BotLanguage, ExecutionStatus, UsageKind},
};
use common::{Harness, RecordingMessaging};
use serde_json::{json, Value};

fn twilio() -> TwilioSettings {
    TwilioSettings {
        account_sid: "AC123".to_string(),
        auth_token: "secret".to_string(),
        sms_from: Some("+15005550006".to_string()),
        whatsapp_from: Some("+14155238886".to_string()),
        whatsapp_template_sid: Some("HX0001".to_string()),
    }
}

fn booking_config() -> BotActionsConfig {
    BotActionsConfig {
        features: ActionFeatures {
            appointments: true,
            whatsapp: true,
            ..ActionFeatures::default()
        },
        business_name: Some("Harbor Dental".to_string()),
        twilio: Some(twilio()),
        ..BotActionsConfig::default()
    }
}

async fn run(harness: &Harness, bot: &Bot, config: &BotActionsConfig, tool: &str, args: Value) -> Value {
    let ctx = ActionContext {
        bot,
        chat_id: None,
        config,
    };
    harness
        .state
        .executor
        .execute(&ctx, tool, &args.to_string())
        .await
}

#[tokio::test]
async fn whatsapp_window_rejection_falls_back_to_sms() {
    let harness = Harness::with_messaging(RecordingMessaging::whatsapp_window_closed());
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let config = booking_config();

    let result = run(
        &harness,
        &bot,
        &config,
        "schedule_appointment",
        json!({
            "name": "Dana Levi",
            "phone": "+972501234567",
            "start_time": "2026-04-02T10:30",
        }),
    )
    .await;

    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "confirmed");
    assert_eq!(result["startTime"], "2026-04-02T10:30:00+02:00");
    assert_eq!(result["notifications"]["messaging"]["outcome"], "sent");
    assert_eq!(result["notifications"]["messaging"]["channel"], "sms");
    assert_eq!(result["notifications"]["calendar"]["outcome"], "skipped");

    let sent = harness.messaging.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "sms");
    assert_eq!(sent[0].to, "+972501234567");
    assert!(sent[0].body.contains("2026-04-02 10:30"));

    assert_eq!(harness.store.usage_count(&bot.id, UsageKind::Sms).await.unwrap(), 1);
    assert_eq!(
        harness
            .store
            .usage_count(&bot.id, UsageKind::Whatsapp)
            .await
            .unwrap(),
        0
    );
    let health = harness.store.channel_health(&bot.id).await.unwrap();
    assert!(matches!(health.whatsapp, ChannelHealth::Unhealthy { .. }));
    assert!(matches!(health.sms, ChannelHealth::Healthy { .. }));

    let appointments = harness.store.list_appointments(&bot.id).await.unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn appointment_stays_pending_when_the_sms_fallback_also_fails() {
    let messaging = RecordingMessaging {
        sms_error: Some(ChannelError::Rejected {
            status: 400,
            body: "unverified number".to_string(),
        }),
        ..RecordingMessaging::whatsapp_window_closed()
    };
    let harness = Harness::with_messaging(messaging);
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;

    let result = run(
        &harness,
        &bot,
        &booking_config(),
        "schedule_appointment",
        json!({
            "name": "Dana Levi",
            "phone": "+972501234567",
            "start_time": "2026-04-02 10:30",
        }),
    )
    .await;

    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "pending");
    assert_eq!(result["notifications"]["messaging"]["outcome"], "failed");
    let appointments = harness.store.list_appointments(&bot.id).await.unwrap();
    assert_eq!(appointments[0].status, AppointmentStatus::Pending);
    assert_eq!(harness.store.usage_count(&bot.id, UsageKind::Sms).await.unwrap(), 0);
}

#[tokio::test]
async fn confirmed_booking_notifies_every_configured_channel() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let config = BotActionsConfig {
        calendar: Some(CalendarSettings {
            calendar_id: "primary".to_string(),
            access_token: "ya29.token".to_string(),
        }),
        utc_offset_minutes: Some(180),
        ..booking_config()
    };

    let result = run(
        &harness,
        &bot,
        &config,
        "schedule_appointment",
        json!({
            "name": "Dana Levi",
            "email": "dana@example.com",
            "phone": "+972501234567",
            "start_time": "2026-05-01 09:00",
            "duration_minutes": 45,
        }),
    )
    .await;

    assert_eq!(result["status"], "confirmed");
    assert_eq!(result["startTime"], "2026-05-01T09:00:00+03:00");

    let events = harness.calendar.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].start, "2026-05-01T09:00:00+03:00");
    assert_eq!(events[0].end, "2026-05-01T09:45:00+03:00");
    assert_eq!(events[0].attendee_email.as_deref(), Some("dana@example.com"));

    let emails = harness.email.sent();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "dana@example.com");

    let sent = harness.messaging.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "whatsapp");
    assert_eq!(sent[0].template_sid.as_deref(), Some("HX0001"));
    assert_eq!(
        harness
            .store
            .usage_count(&bot.id, UsageKind::Whatsapp)
            .await
            .unwrap(),
        1
    );

    let leads = harness.store.list_leads(&bot.id).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].source, "appointment");
}

#[tokio::test]
async fn renotify_upgrades_a_pending_appointment() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::He).await;
    let config = BotActionsConfig {
        features: ActionFeatures {
            appointments: true,
            ..ActionFeatures::default()
        },
        ..BotActionsConfig::default()
    };
    harness
        .store
        .save_actions_config(&bot.id, &config)
        .await
        .unwrap();

    harness.email.failing.store(true, Ordering::SeqCst);
    let result = run(
        &harness,
        &bot,
        &config,
        "schedule_appointment",
        json!({
            "name": "דנה",
            "email": "dana@example.com",
            "start_time": "2026-04-02T10:30:00+02:00",
        }),
    )
    .await;
    assert_eq!(result["status"], "pending");
    let appointment_id = result["appointmentId"].as_str().unwrap().to_string();

    harness.email.failing.store(false, Ordering::SeqCst);
    let (appointment, report) = harness
        .state
        .executor
        .renotify_appointment(&bot, &appointment_id)
        .await
        .unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(report.status(), AppointmentStatus::Confirmed);

    let emails = harness.email.sent();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].subject.starts_with("אישור פגישה"));
    assert!(emails[0].html.contains("dir=\"rtl\""));

    let stored = harness
        .store
        .get_appointment(&bot.id, &appointment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn send_whatsapp_reports_the_channel_that_carried_the_message() {
    let harness = Harness::with_messaging(RecordingMessaging::whatsapp_window_closed());
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;

    let result = run(
        &harness,
        &bot,
        &booking_config(),
        "send_whatsapp",
        json!({ "to": "00972 50 123 4567", "message": "Your order is ready" }),
    )
    .await;

    assert_eq!(result["success"], true);
    assert_eq!(result["to"], "+972501234567");
    assert_eq!(result["channel"], "sms");
    assert_eq!(result["fallback"], true);
}

#[tokio::test]
async fn invalid_phone_numbers_are_rejected_before_sending() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;

    let result = run(
        &harness,
        &bot,
        &booking_config(),
        "send_whatsapp",
        json!({ "to": "050-123", "message": "hello" }),
    )
    .await;

    assert_eq!(result["success"], false);
    assert!(result["error"]
        .as_str()
        .unwrap()
        .contains("Invalid phone number"));
    assert!(harness.messaging.sent().is_empty());
}

#[tokio::test]
async fn disabled_tools_fail_and_are_logged() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;

    let result = run(
        &harness,
        &bot,
        &BotActionsConfig::default(),
        "send_email",
        json!({ "to": "dana@example.com", "subject": "Hi", "body": "Hello" }),
    )
    .await;

    assert_eq!(result["success"], false);
    assert!(harness.email.sent().is_empty());
    let logs = harness.store.list_action_logs(&bot.id, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action_type, "send_email");
    assert_eq!(logs[0].status, ExecutionStatus::Failed);
    assert!(logs[0].error.is_some());
}

#[tokio::test]
async fn leads_notify_the_owner_and_subscribed_webhooks() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let config = BotActionsConfig {
        features: ActionFeatures {
            lead_collection: true,
            webhooks: true,
            ..ActionFeatures::default()
        },
        notification_email: Some("owner@harbor.example".to_string()),
        webhook: Some(WebhookSettings {
            url: "https://hooks.example.com/agentdesk".to_string(),
            secret: Some("whsec".to_string()),
            events: vec![WebhookEvent::LeadCreated],
        }),
        ..BotActionsConfig::default()
    };

    let result = run(
        &harness,
        &bot,
        &config,
        "save_lead",
        json!({ "name": "<Dana>", "email": "dana@example.com" }),
    )
    .await;

    assert_eq!(result["success"], true);
    let emails = harness.email.sent();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "owner@harbor.example");
    assert!(emails[0].html.contains("&lt;Dana&gt;"));

    let deliveries = harness.webhook.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, WebhookEvent::LeadCreated);
    assert_eq!(deliveries[0].1["email"], "dana@example.com");

    let logs = harness.store.list_action_logs(&bot.id, 10).await.unwrap();
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert_eq!(logs[0].input["name"], "<Dana>");
}

#[tokio::test]
async fn pdfs_are_stored_under_the_media_directory() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let config = BotActionsConfig {
        features: ActionFeatures {
            pdf: true,
            ..ActionFeatures::default()
        },
        ..BotActionsConfig::default()
    };

    let result = run(
        &harness,
        &bot,
        &config,
        "create_pdf",
        json!({
            "title": "Treatment quote",
            "content": "Cleaning: 300\nWhitening: 900",
            "email_to": "dana@example.com",
        }),
    )
    .await;

    assert_eq!(result["success"], true);
    assert_eq!(result["emailed"], true);
    let file_name = result["fileName"].as_str().unwrap();
    assert!(file_name.ends_with(".pdf"));
    assert_eq!(
        result["url"],
        format!("http://localhost:4000/api/media/{file_name}")
    );
    let bytes = tokio::fs::read(harness.config.media_storage_dir.join(file_name))
        .await
        .unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn unknown_tools_never_panic() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;

    let config = BotActionsConfig::default();
    let ctx = ActionContext {
        bot: &bot,
        chat_id: Some("chat-1"),
        config: &config,
    };
    let result = harness
        .state
        .executor
        .execute(&ctx, "drop_tables", "not json at all")
        .await;
    assert_eq!(result["success"], false);

    let logs = harness.store.list_action_logs(&bot.id, 10).await.unwrap();
    assert_eq!(logs[0].input, json!("not json at all"));
}
