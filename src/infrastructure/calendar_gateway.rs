use crate::domain::error::AlarmError;
use crate::domain::models::{CalendarAlarmEvent, PermissionStatus};
use crate::infrastructure::calendar_client::{CalendarApiClient, ListEventsRequest};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{decode_alarm_event, encode_alarm_event, is_alarm_tagged};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_EVENT_TITLE: &str = "Alarm";
const TOKEN_LEEWAY_SECONDS: i64 = 30;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Device calendar seen as a store of single-fire alarm events.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn ensure_permission(&self) -> Result<PermissionStatus, AlarmError>;

    async fn create_alarm_event(&self, time: DateTime<Utc>) -> Result<String, AlarmError>;

    /// Events starting in `[from, to)`, in calendar order.
    async fn list_upcoming_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarAlarmEvent>, AlarmError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), AlarmError>;
}

fn calendar_error(error: InfraError) -> AlarmError {
    if matches!(error.http_status(), Some(401 | 403)) {
        return AlarmError::PermissionDenied;
    }
    match error {
        InfraError::Http(message) => AlarmError::CalendarUnavailable(message),
        other => AlarmError::Infra(other),
    }
}

pub struct HttpCalendarGateway<C, S>
where
    C: CalendarApiClient + ?Sized,
    S: CredentialStore + ?Sized,
{
    client: Arc<C>,
    credentials: Arc<S>,
    event_title: String,
    tagged_only: bool,
    primary_calendar_id: Mutex<Option<String>>,
    now_provider: NowProvider,
}

impl<C, S> HttpCalendarGateway<C, S>
where
    C: CalendarApiClient + ?Sized,
    S: CredentialStore + ?Sized,
{
    pub fn new(client: Arc<C>, credentials: Arc<S>) -> Self {
        Self {
            client,
            credentials,
            event_title: DEFAULT_EVENT_TITLE.to_string(),
            tagged_only: false,
            primary_calendar_id: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_event_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.event_title = title.trim().to_string();
        }
        self
    }

    /// Restrict listing to events this app created.
    pub fn with_tagged_only(mut self, tagged_only: bool) -> Self {
        self.tagged_only = tagged_only;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn access_token(&self) -> Result<String, AlarmError> {
        let token = self.credentials.load_calendar_token()?;
        match token {
            Some(token) if token.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS) => {
                Ok(token.access_token)
            }
            _ => Err(AlarmError::PermissionDenied),
        }
    }

    fn cached_calendar_id(&self) -> Result<Option<String>, AlarmError> {
        let cached = self.primary_calendar_id.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("primary calendar lock poisoned: {error}"))
        })?;
        Ok(cached.clone())
    }

    async fn primary_calendar(&self, access_token: &str) -> Result<String, AlarmError> {
        if let Some(calendar_id) = self.cached_calendar_id()? {
            return Ok(calendar_id);
        }

        let calendars = self
            .client
            .list_calendars(access_token)
            .await
            .map_err(calendar_error)?;
        let primary = calendars
            .into_iter()
            .find(|calendar| calendar.primary)
            .ok_or(AlarmError::NoPrimaryCalendar)?;

        let mut cached = self.primary_calendar_id.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("primary calendar lock poisoned: {error}"))
        })?;
        *cached = Some(primary.id.clone());
        Ok(primary.id)
    }
}

#[async_trait]
impl<C, S> CalendarGateway for HttpCalendarGateway<C, S>
where
    C: CalendarApiClient + ?Sized,
    S: CredentialStore + ?Sized,
{
    async fn ensure_permission(&self) -> Result<PermissionStatus, AlarmError> {
        match self.access_token() {
            Ok(_) => Ok(PermissionStatus::Granted),
            Err(AlarmError::PermissionDenied) => Ok(PermissionStatus::Denied),
            Err(error) => Err(error),
        }
    }

    async fn create_alarm_event(&self, time: DateTime<Utc>) -> Result<String, AlarmError> {
        let access_token = self.access_token()?;
        let calendar_id = self.primary_calendar(&access_token).await?;
        let event = encode_alarm_event(time, &self.event_title);
        self.client
            .create_event(&access_token, &calendar_id, &event)
            .await
            .map_err(calendar_error)
    }

    async fn list_upcoming_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarAlarmEvent>, AlarmError> {
        if to <= from {
            return Ok(Vec::new());
        }
        let access_token = self.access_token()?;
        let calendar_id = self.primary_calendar(&access_token).await?;
        let events = self
            .client
            .list_events(
                &access_token,
                &calendar_id,
                ListEventsRequest {
                    time_min: from,
                    time_max: to,
                },
            )
            .await
            .map_err(calendar_error)?;

        let mut upcoming = Vec::with_capacity(events.len());
        for event in events {
            if self.tagged_only && !is_alarm_tagged(&event) {
                continue;
            }
            let Some(decoded) = decode_alarm_event(&event).map_err(calendar_error)? else {
                continue;
            };
            if decoded.time >= from && decoded.time < to {
                upcoming.push(decoded);
            }
        }
        Ok(upcoming)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), AlarmError> {
        let access_token = self.access_token()?;
        let calendar_id = self.primary_calendar(&access_token).await?;
        self.client
            .delete_event(&access_token, &calendar_id, event_id)
            .await
            .map_err(calendar_error)
    }
}

/// Calendar kept in process memory, for tests and offline runs.
#[derive(Debug)]
pub struct InMemoryCalendarGateway {
    permission: Mutex<PermissionStatus>,
    has_primary_calendar: bool,
    events: Mutex<Vec<CalendarAlarmEvent>>,
    next_id: AtomicU64,
}

impl Default for InMemoryCalendarGateway {
    fn default() -> Self {
        Self {
            permission: Mutex::new(PermissionStatus::Granted),
            has_primary_calendar: true,
            events: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryCalendarGateway {
    pub fn with_events(events: Vec<CalendarAlarmEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Self::default()
        }
    }

    pub fn without_primary_calendar() -> Self {
        Self {
            has_primary_calendar: false,
            ..Self::default()
        }
    }

    pub fn set_permission(&self, status: PermissionStatus) -> Result<(), AlarmError> {
        *self.lock_permission()? = status;
        Ok(())
    }

    pub fn events(&self) -> Result<Vec<CalendarAlarmEvent>, AlarmError> {
        Ok(self.lock_events()?.clone())
    }

    fn lock_permission(&self) -> Result<std::sync::MutexGuard<'_, PermissionStatus>, AlarmError> {
        self.permission.lock().map_err(|error| {
            AlarmError::Infra(InfraError::InvalidConfig(format!(
                "calendar permission lock poisoned: {error}"
            )))
        })
    }

    fn lock_events(&self) -> Result<std::sync::MutexGuard<'_, Vec<CalendarAlarmEvent>>, AlarmError> {
        self.events.lock().map_err(|error| {
            AlarmError::Infra(InfraError::InvalidConfig(format!(
                "calendar events lock poisoned: {error}"
            )))
        })
    }

    fn require_access(&self) -> Result<(), AlarmError> {
        if !self.lock_permission()?.is_granted() {
            return Err(AlarmError::PermissionDenied);
        }
        if !self.has_primary_calendar {
            return Err(AlarmError::NoPrimaryCalendar);
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarGateway for InMemoryCalendarGateway {
    async fn ensure_permission(&self) -> Result<PermissionStatus, AlarmError> {
        Ok(*self.lock_permission()?)
    }

    async fn create_alarm_event(&self, time: DateTime<Utc>) -> Result<String, AlarmError> {
        self.require_access()?;
        let event_id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_events()?.push(CalendarAlarmEvent {
            event_id: event_id.clone(),
            time,
        });
        Ok(event_id)
    }

    async fn list_upcoming_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarAlarmEvent>, AlarmError> {
        self.require_access()?;
        Ok(self
            .lock_events()?
            .iter()
            .filter(|event| event.time >= from && event.time < to)
            .cloned()
            .collect())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), AlarmError> {
        self.require_access()?;
        self.lock_events()?.retain(|event| event.event_id != event_id);
        Ok(())
    }
}
