pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::alarm_lifecycle::{AlarmLifecycleManager, DeleteOutcome, ReconcileReport};
pub use application::commands::{
    AlarmView, AlarmsResponse, AppState, PendingConfirmationView, ReconcileResponse,
    cancel_pending, confirm_pending, dismiss_pending, initialize_alarms,
    list_alarms, reconcile_orphans, request_delete_alarm,
    request_discard_changes, schedule_alarm, toggle_alarm,
};
pub use domain::confirmation::{ConfirmationAction, ConfirmationFlow, ConfirmationState};
pub use domain::error::AlarmError;
pub use domain::models::{Alarm, AlarmOrigin, Notification, NotificationLevel};
pub use infrastructure::error::InfraError;
