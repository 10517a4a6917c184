use crate::infrastructure::error::InfraError;
use thiserror::Error;

/// Failures surfaced by the alarm lifecycle and its collaborators.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("calendar permission not granted")]
    PermissionDenied,
    #[error("no primary calendar is available")]
    NoPrimaryCalendar,
    #[error("alarm store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("calendar unavailable: {0}")]
    CalendarUnavailable(String),
    #[error("alarm index {index} is out of range for {len} alarms")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("alarm manager has not been initialized for a user")]
    NotInitialized,
    #[error("calendar event {event_id} was created but the alarm could not be saved: {reason}")]
    OrphanedEvent { event_id: String, reason: String },
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AlarmError {
    /// Errors the UI reports as a warning while keeping the app usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Infra(_))
    }
}
