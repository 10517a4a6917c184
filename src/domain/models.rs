use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlarmOrigin {
    /// Persisted in the alarm store; `id` is the store record id.
    Store,
    /// Reconstructed from the calendar only; `id` is the calendar event id.
    Calendar,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alarm {
    pub id: String,
    pub event_id: Option<String>,
    pub time: DateTime<Utc>,
    pub is_on: bool,
    pub owner_id: String,
    pub origin: AlarmOrigin,
}

impl Alarm {
    pub fn from_calendar_event(event: &CalendarAlarmEvent, owner_id: &str) -> Self {
        Self {
            id: event.event_id.clone(),
            event_id: Some(event.event_id.clone()),
            time: event.time,
            // An event's existence is the only signal the calendar carries.
            is_on: true,
            owner_id: owner_id.to_string(),
            origin: AlarmOrigin::Calendar,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.origin == AlarmOrigin::Store
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "alarm.id")?;
        validate_non_empty(&self.owner_id, "alarm.owner_id")?;
        if let Some(event_id) = self.event_id.as_deref() {
            validate_non_empty(event_id, "alarm.event_id")?;
        }
        if self.origin == AlarmOrigin::Calendar && self.event_id.as_deref() != Some(self.id.as_str())
        {
            return Err("alarm.id must equal alarm.event_id for calendar alarms".to_string());
        }
        Ok(())
    }

    /// `HH:MM` label in the given zone, as shown in the alarm list.
    pub fn display_label(&self, time_zone: Tz) -> String {
        self.time.with_timezone(&time_zone).format("%H:%M").to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarAlarmEvent {
    pub event_id: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: String,
    pub session_token: String,
}

impl UserSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.user_id, "session.user_id")?;
        validate_non_empty(&self.session_token, "session.session_token")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CalendarToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrphanKind {
    CalendarEvent,
    StoreRecord,
}

impl OrphanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CalendarEvent => "calendar_event",
            Self::StoreRecord => "store_record",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "calendar_event" => Some(Self::CalendarEvent),
            "store_record" => Some(Self::StoreRecord),
            _ => None,
        }
    }
}

/// An artifact left in one system after a multi-step operation stopped
/// part way through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Orphan {
    pub id: String,
    pub kind: OrphanKind,
    pub external_id: String,
    pub owner_id: String,
    pub time: DateTime<Utc>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl Orphan {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "orphan.id")?;
        validate_non_empty(&self.external_id, "orphan.external_id")?;
        validate_non_empty(&self.owner_id, "orphan.owner_id")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
