use crate::application::alarm_lifecycle::{
    AlarmLifecycleManager, DeleteOutcome, PERMISSION_DENIED_MESSAGE,
};
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::domain::confirmation::{
    ConfirmationAction, ConfirmationError, ConfirmationFlow, Resolution,
};
use crate::domain::error::AlarmError;
use crate::domain::models::{Alarm, AlarmOrigin, Notification, NotificationLevel};
use crate::infrastructure::alarm_store::{AlarmStore, InMemoryAlarmStore};
use crate::infrastructure::calendar_client::ReqwestCalendarApiClient;
use crate::infrastructure::calendar_gateway::{CalendarGateway, HttpCalendarGateway};
use crate::infrastructure::config::AppSettings;
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::orphan_ledger::{OrphanLedger, SqliteOrphanLedger};
use crate::infrastructure::parse_alarm_store::{ParseAlarmStore, ParseStoreConfig};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SCHEDULED_MESSAGE: &str = "Alarm has been set.";

type AlarmManager = AlarmLifecycleManager<dyn CalendarGateway, dyn AlarmStore, dyn OrphanLedger>;

/// What a resolved confirmation asks the command layer to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCommand {
    DeleteAlarm { alarm_id: String },
    DiscardChanges { subject: String },
    Nothing,
}

struct Session {
    manager: AlarmManager,
    confirmation: ConfirmationFlow<PendingCommand>,
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    time_zone: Tz,
    credentials: Arc<dyn CredentialStore>,
    session: tokio::sync::Mutex<Session>,
    log_guard: Mutex<()>,
}

impl AppState {
    /// Bootstraps `workspace_root` and wires the HTTP calendar gateway, the
    /// Parse store (or an in-memory store when none is configured) and the
    /// keyring credential store. Settings may be overridden from the process
    /// environment.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::from_lookup(workspace_root, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(workspace_root: PathBuf, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bootstrap = bootstrap_workspace(&workspace_root, lookup)?;
        let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringCredentialStore::default());

        let client = ReqwestCalendarApiClient::with_base_url(&bootstrap.settings.calendar.api_base)?;
        let calendar: Arc<dyn CalendarGateway> = Arc::new(
            HttpCalendarGateway::new(Arc::new(client), Arc::clone(&credentials))
                .with_event_title(bootstrap.settings.calendar.event_title.clone())
                .with_tagged_only(bootstrap.settings.calendar.tagged_only),
        );

        let mut offline_store = false;
        let store: Arc<dyn AlarmStore> = match (
            bootstrap.settings.store.server_url.clone(),
            bootstrap.settings.store.application_id.clone(),
        ) {
            (Some(server_url), Some(application_id)) => Arc::new(ParseAlarmStore::new(
                ParseStoreConfig {
                    server_url,
                    application_id,
                    rest_api_key: bootstrap.settings.store.rest_api_key.clone(),
                },
                Arc::clone(&credentials),
            )?),
            _ => {
                offline_store = true;
                Arc::new(InMemoryAlarmStore::default())
            }
        };

        let state = Self::from_bootstrap(bootstrap, calendar, store, credentials);
        if offline_store {
            state.log_info("bootstrap", "alarm store is not configured; using in-memory store");
        }
        Ok(state)
    }

    /// Bootstraps `workspace_root` but uses the given calendar, store and
    /// credentials instead of the configured ones.
    pub fn with_components(
        workspace_root: PathBuf,
        calendar: Arc<dyn CalendarGateway>,
        store: Arc<dyn AlarmStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root, |_| None)?;
        Ok(Self::from_bootstrap(bootstrap, calendar, store, credentials))
    }

    fn from_bootstrap(
        bootstrap: BootstrapResult,
        calendar: Arc<dyn CalendarGateway>,
        store: Arc<dyn AlarmStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let BootstrapResult {
            config_dir,
            logs_dir,
            database_path,
            settings: AppSettings {
                time_zone,
                lifecycle,
                ..
            },
            ..
        } = bootstrap;
        let ledger: Arc<dyn OrphanLedger> = Arc::new(SqliteOrphanLedger::new(&database_path));
        let manager = AlarmLifecycleManager::new(calendar, store, ledger).with_settings(lifecycle);

        Self {
            config_dir,
            database_path,
            logs_dir,
            time_zone,
            credentials,
            session: tokio::sync::Mutex::new(Session {
                manager,
                confirmation: ConfirmationFlow::new(),
            }),
            log_guard: Mutex::new(()),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_warning(&self, command: &str, message: &str) {
        self.append_log("warning", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn alarm_views(&self, alarms: &[Alarm]) -> Vec<AlarmView> {
        alarms
            .iter()
            .map(|alarm| AlarmView {
                id: alarm.id.clone(),
                event_id: alarm.event_id.clone(),
                time: alarm.time.to_rfc3339(),
                label: alarm.display_label(self.time_zone),
                is_on: alarm.is_on,
                origin: alarm.origin,
            })
            .collect()
    }

    fn response(&self, session: &Session, notifications: Vec<Notification>) -> AlarmsResponse {
        AlarmsResponse {
            owner_id: session.manager.owner_id().map(ToOwned::to_owned),
            alarms: self.alarm_views(session.manager.alarms()),
            pending: session
                .confirmation
                .pending_action()
                .map(PendingConfirmationView::from_action),
            notifications,
        }
    }

    /// Turns a recoverable failure into a notification and logs it.
    /// Infrastructure failures are returned to the caller.
    fn notify(&self, command: &str, error: AlarmError) -> Result<Notification, InfraError> {
        let notification = match error {
            AlarmError::Infra(inner) => return Err(inner),
            AlarmError::PermissionDenied => Notification::warning(PERMISSION_DENIED_MESSAGE),
            AlarmError::NotInitialized | AlarmError::IndexOutOfRange { .. } => {
                Notification::warning(error.to_string())
            }
            other => Notification::error(other.to_string()),
        };
        if notification.level == NotificationLevel::Error {
            self.log_error(command, &notification.message);
        } else {
            self.log_warning(command, &notification.message);
        }
        Ok(notification)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AlarmView {
    pub id: String,
    pub event_id: Option<String>,
    pub time: String,
    pub label: String,
    pub is_on: bool,
    pub origin: AlarmOrigin,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingConfirmationView {
    pub action: ConfirmationAction,
    pub title: String,
    pub message: String,
}

impl PendingConfirmationView {
    fn from_action(action: &ConfirmationAction) -> Self {
        Self {
            action: action.clone(),
            title: action.title().to_string(),
            message: action.message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AlarmsResponse {
    pub owner_id: Option<String>,
    pub alarms: Vec<AlarmView>,
    pub pending: Option<PendingConfirmationView>,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileResponse {
    pub resolved: usize,
    pub remaining: usize,
    pub notifications: Vec<Notification>,
}

fn parse_alarm_time(raw: &str) -> Result<DateTime<Utc>, InfraError> {
    let value = raw.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid alarm time '{value}': {error}")))
}

/// Binds the alarm list to `owner_id`, or to the signed-in user when absent.
pub async fn initialize_alarms(
    state: &AppState,
    owner_id: Option<String>,
) -> Result<AlarmsResponse, InfraError> {
    let owner_id = match owner_id.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => value,
        _ => match state.credentials.load_session()? {
            Some(session) => session.user_id,
            None => {
                return Err(InfraError::InvalidConfig(
                    "no signed-in user; owner_id is required".to_string(),
                ));
            }
        },
    };

    let mut session = state.session.lock().await;
    // a confirmation for the previous owner must not survive the rebind
    let _ = session.confirmation.cancel();
    let notifications = match session.manager.initialize(&owner_id).await {
        Ok(warnings) => {
            for warning in &warnings {
                state.log_warning("initialize_alarms", &warning.message);
            }
            state.log_info(
                "initialize_alarms",
                &format!(
                    "loaded owner_id={owner_id} alarms={}",
                    session.manager.alarms().len()
                ),
            );
            warnings
        }
        Err(error) => vec![state.notify("initialize_alarms", error)?],
    };
    Ok(state.response(&session, notifications))
}

pub async fn schedule_alarm(state: &AppState, time: String) -> Result<AlarmsResponse, InfraError> {
    let time = parse_alarm_time(&time)?;
    let mut session = state.session.lock().await;
    let notification = match session.manager.schedule_alarm(time).await {
        Ok(alarm) => {
            state.log_info(
                "schedule_alarm",
                &format!("scheduled alarm_id={} time={}", alarm.id, alarm.time.to_rfc3339()),
            );
            Notification::info(SCHEDULED_MESSAGE)
        }
        Err(error) => state.notify("schedule_alarm", error)?,
    };
    Ok(state.response(&session, vec![notification]))
}

pub async fn toggle_alarm(state: &AppState, index: usize) -> Result<AlarmsResponse, InfraError> {
    let mut session = state.session.lock().await;
    let notifications = match session.manager.toggle_alarm(index).await {
        Ok(alarm) => {
            state.log_info(
                "toggle_alarm",
                &format!("alarm_id={} is_on={}", alarm.id, alarm.is_on),
            );
            Vec::new()
        }
        Err(error) => vec![state.notify("toggle_alarm", error)?],
    };
    Ok(state.response(&session, notifications))
}

/// Starts the delete confirmation. Nothing is removed until
/// [`confirm_pending`] runs.
pub async fn request_delete_alarm(
    state: &AppState,
    alarm_id: String,
) -> Result<AlarmsResponse, InfraError> {
    let mut session = state.session.lock().await;
    let Some(alarm) = session
        .manager
        .alarms()
        .iter()
        .find(|alarm| alarm.id == alarm_id)
        .cloned()
    else {
        let notification = Notification::warning(format!("Alarm {alarm_id} no longer exists."));
        state.log_warning("request_delete_alarm", &notification.message);
        return Ok(state.response(&session, vec![notification]));
    };

    let action = ConfirmationAction::DeleteAlarm {
        alarm_id: alarm.id.clone(),
        label: alarm.display_label(state.time_zone),
    };
    let target = alarm.id.clone();
    let notifications = match session.confirmation.begin(
        action,
        move || PendingCommand::DeleteAlarm { alarm_id: target },
        || PendingCommand::Nothing,
    ) {
        Ok(()) => Vec::new(),
        Err(error) => {
            state.log_warning("request_delete_alarm", &error.to_string());
            vec![Notification::warning(error.to_string())]
        }
    };
    Ok(state.response(&session, notifications))
}

pub async fn request_discard_changes(
    state: &AppState,
    subject: String,
) -> Result<AlarmsResponse, InfraError> {
    let subject = subject.trim().to_string();
    if subject.is_empty() {
        return Err(InfraError::InvalidConfig("subject must not be empty".to_string()));
    }
    let mut session = state.session.lock().await;
    let confirmed_subject = subject.clone();
    let notifications = match session.confirmation.begin(
        ConfirmationAction::DiscardChanges { subject },
        move || PendingCommand::DiscardChanges {
            subject: confirmed_subject,
        },
        || PendingCommand::Nothing,
    ) {
        Ok(()) => Vec::new(),
        Err(error) => {
            state.log_warning("request_discard_changes", &error.to_string());
            vec![Notification::warning(error.to_string())]
        }
    };
    Ok(state.response(&session, notifications))
}

pub async fn confirm_pending(state: &AppState) -> Result<AlarmsResponse, InfraError> {
    resolve_pending(state, "confirm_pending", Resolution::Confirmed).await
}

pub async fn cancel_pending(state: &AppState) -> Result<AlarmsResponse, InfraError> {
    resolve_pending(state, "cancel_pending", Resolution::Cancelled).await
}

pub async fn dismiss_pending(state: &AppState) -> Result<AlarmsResponse, InfraError> {
    resolve_pending(state, "dismiss_pending", Resolution::Dismissed).await
}

async fn resolve_pending(
    state: &AppState,
    command: &str,
    resolution: Resolution,
) -> Result<AlarmsResponse, InfraError> {
    let mut session = state.session.lock().await;
    let next = match session.confirmation.resolve(resolution) {
        Ok(next) => next,
        Err(error @ ConfirmationError::NothingPending) => {
            state.log_warning(command, &error.to_string());
            return Ok(state.response(&session, vec![Notification::warning(error.to_string())]));
        }
        Err(error) => return Err(InfraError::InvalidConfig(error.to_string())),
    };

    let notifications = match next {
        PendingCommand::Nothing => {
            state.log_info(command, "confirmation closed without action");
            Vec::new()
        }
        PendingCommand::DiscardChanges { subject } => {
            state.log_info(command, &format!("discarded changes to {subject}"));
            vec![Notification::info(format!("Changes to {subject} were discarded."))]
        }
        PendingCommand::DeleteAlarm { alarm_id } => {
            match session.manager.delete_alarm(&alarm_id).await {
                Ok(DeleteOutcome::Deleted { alarm, warnings }) => {
                    state.log_info(command, &format!("deleted alarm_id={}", alarm.id));
                    for warning in &warnings {
                        state.log_warning(command, &warning.message);
                    }
                    warnings
                }
                Ok(DeleteOutcome::NotFound) => {
                    state.log_info(command, &format!("alarm_id={alarm_id} already removed"));
                    Vec::new()
                }
                Err(error) => vec![state.notify(command, error)?],
            }
        }
    };
    Ok(state.response(&session, notifications))
}

pub async fn list_alarms(state: &AppState) -> Result<AlarmsResponse, InfraError> {
    let session = state.session.lock().await;
    Ok(state.response(&session, Vec::new()))
}

pub async fn reconcile_orphans(state: &AppState) -> Result<ReconcileResponse, InfraError> {
    let mut session = state.session.lock().await;
    let report = match session.manager.reconcile_orphans().await {
        Ok(report) => report,
        Err(error) => {
            let notification = state.notify("reconcile_orphans", error)?;
            return Ok(ReconcileResponse {
                resolved: 0,
                remaining: 0,
                notifications: vec![notification],
            });
        }
    };

    let mut notifications = Vec::new();
    if !report.remaining.is_empty() {
        let message = format!(
            "{} leftover alarm item(s) could not be cleaned up yet.",
            report.remaining.len()
        );
        state.log_warning("reconcile_orphans", &message);
        notifications.push(Notification::warning(message));
    }
    state.log_info(
        "reconcile_orphans",
        &format!(
            "resolved={} remaining={}",
            report.resolved.len(),
            report.remaining.len()
        ),
    );
    Ok(ReconcileResponse {
        resolved: report.resolved.len(),
        remaining: report.remaining.len(),
        notifications,
    })
}
