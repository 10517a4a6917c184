use crate::domain::models::CalendarAlarmEvent;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const KEY_KIND: &str = "qa_kind";
const KIND_ALARM: &str = "alarm";
const ALARM_TIME_ZONE: &str = "UTC";
const REMINDER_METHOD: &str = "popup";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// Present for all-day events, which never represent an alarm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventReminders {
    #[serde(rename = "useDefault")]
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<CalendarEventReminders>,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

/// Builds a zero-length event whose only reminder fires at the event start.
pub fn encode_alarm_event(time: DateTime<Utc>, title: &str) -> CalendarEvent {
    let instant = CalendarEventDateTime {
        date_time: Some(time.to_rfc3339()),
        date: None,
        time_zone: Some(ALARM_TIME_ZONE.to_string()),
    };
    let mut private = HashMap::new();
    private.insert(KEY_KIND.to_string(), KIND_ALARM.to_string());

    CalendarEvent {
        id: None,
        summary: Some(title.to_string()),
        status: Some("confirmed".to_string()),
        start: instant.clone(),
        end: instant,
        reminders: Some(CalendarEventReminders {
            use_default: false,
            overrides: vec![ReminderOverride {
                method: REMINDER_METHOD.to_string(),
                minutes: 0,
            }],
        }),
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    }
}

/// Maps a listed event to an alarm event. Cancelled, untimed, and id-less
/// events yield `None`.
pub fn decode_alarm_event(event: &CalendarEvent) -> Result<Option<CalendarAlarmEvent>, InfraError> {
    let Some(event_id) = event
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let is_cancelled = event
        .status
        .as_deref()
        .map(|status| status.eq_ignore_ascii_case("cancelled"))
        .unwrap_or(false);
    if is_cancelled {
        return Ok(None);
    }

    let Some(raw_start) = event.start.date_time.as_deref() else {
        return Ok(None);
    };
    let time = parse_rfc3339_utc(raw_start, "start.dateTime")?;

    Ok(Some(CalendarAlarmEvent {
        event_id: event_id.to_string(),
        time,
    }))
}

pub fn is_alarm_tagged(event: &CalendarEvent) -> bool {
    event
        .extended_properties
        .as_ref()
        .and_then(|properties| properties.private.get(KEY_KIND))
        .map(|kind| kind == KIND_ALARM)
        .unwrap_or(false)
}

fn parse_rfc3339_utc(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::Http(format!("invalid event {field_name} '{value}': {error}"))
        })
}
