use async_trait::async_trait;
use serde_json::{json, Value};

use super::{rejected, CalendarChannel, CalendarEvent, ChannelError};
use crate::actions::config::CalendarSettings;

/// Google Calendar v3 events API.
#[derive(Clone)]
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: "https://www.googleapis.com/calendar/v3".to_string(),
        }
    }
}

#[async_trait]
impl CalendarChannel for GoogleCalendarClient {
    async fn create_event(
        &self,
        settings: &CalendarSettings,
        event: &CalendarEvent,
    ) -> Result<String, ChannelError> {
        let mut body = json!({
            "summary": event.summary,
            "description": event.description,
            "start": { "dateTime": event.start },
            "end": { "dateTime": event.end },
        });
        if let Some(email) = &event.attendee_email {
            body["attendees"] = json!([{ "email": email }]);
        }
        let response = self
            .http
            .post(format!(
                "{}/calendars/{}/events",
                self.base_url,
                url::form_urlencoded::byte_serialize(settings.calendar_id.as_bytes())
                    .collect::<String>()
            ))
            .bearer_auth(&settings.access_token)
            .json(&body)
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
