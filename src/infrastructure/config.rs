use crate::infrastructure::calendar_client::DEFAULT_CALENDAR_API_BASE;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const CALENDAR_JSON: &str = "calendar.json";
const STORE_JSON: &str = "store.json";
const LIFECYCLE_JSON: &str = "lifecycle.json";

const DEFAULT_EVENT_TITLE: &str = "Alarm";
const DEFAULT_LOOKAHEAD_DAYS: u32 = 30;
const DEFAULT_CALL_TIMEOUT_SECONDS: u64 = 10;

const STORE_URL_KEYS: &[&str] = &["QUIZALARM_STORE_URL", "PARSE_SERVER_URL"];
const APP_ID_KEYS: &[&str] = &["QUIZALARM_APP_ID", "PARSE_APPLICATION_ID"];
const REST_KEY_KEYS: &[&str] = &["QUIZALARM_REST_KEY", "PARSE_REST_API_KEY"];

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarSettings {
    pub api_base: String,
    pub event_title: String,
    pub tagged_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub server_url: Option<String>,
    pub application_id: Option<String>,
    pub rest_api_key: Option<String>,
}

impl StoreSettings {
    /// Both the server URL and the application id are present.
    pub fn is_remote_configured(&self) -> bool {
        self.server_url.is_some() && self.application_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub lookahead_days: u32,
    pub call_timeout: Duration,
    pub persist_toggles: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECONDS),
            persist_toggles: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub time_zone: Tz,
    pub calendar: CalendarSettings,
    pub store: StoreSettings,
    pub lifecycle: LifecycleSettings,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "QuizAlarm",
                "timezone": "UTC"
            }),
        ),
        (
            CALENDAR_JSON,
            serde_json::json!({
                "schema": 1,
                "apiBase": DEFAULT_CALENDAR_API_BASE,
                "eventTitle": DEFAULT_EVENT_TITLE,
                "taggedOnly": false
            }),
        ),
        (
            STORE_JSON,
            serde_json::json!({
                "schema": 1,
                "serverUrl": null,
                "applicationId": null,
                "restApiKey": null
            }),
        ),
        (
            LIFECYCLE_JSON,
            serde_json::json!({
                "schema": 1,
                "lookaheadDays": DEFAULT_LOOKAHEAD_DAYS,
                "callTimeoutSeconds": DEFAULT_CALL_TIMEOUT_SECONDS,
                "persistToggles": true
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn non_empty_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

pub fn read_time_zone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let Some(name) = non_empty_str(&app, "timezone") else {
        return Ok(chrono_tz::UTC);
    };
    name.parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))
}

pub fn read_calendar_settings(config_dir: &Path) -> Result<CalendarSettings, InfraError> {
    let calendar = read_config(&config_dir.join(CALENDAR_JSON))?;
    Ok(CalendarSettings {
        api_base: non_empty_str(&calendar, "apiBase")
            .unwrap_or_else(|| DEFAULT_CALENDAR_API_BASE.to_string()),
        event_title: non_empty_str(&calendar, "eventTitle")
            .unwrap_or_else(|| DEFAULT_EVENT_TITLE.to_string()),
        tagged_only: calendar
            .get("taggedOnly")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    })
}

/// Store settings from `store.json`, with environment values taking
/// precedence over the file.
pub fn read_store_settings<F>(config_dir: &Path, lookup: F) -> Result<StoreSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let store = read_config(&config_dir.join(STORE_JSON))?;
    Ok(StoreSettings {
        server_url: lookup_value(&lookup, STORE_URL_KEYS)
            .or_else(|| non_empty_str(&store, "serverUrl")),
        application_id: lookup_value(&lookup, APP_ID_KEYS)
            .or_else(|| non_empty_str(&store, "applicationId")),
        rest_api_key: lookup_value(&lookup, REST_KEY_KEYS)
            .or_else(|| non_empty_str(&store, "restApiKey")),
    })
}

pub fn read_lifecycle_settings(config_dir: &Path) -> Result<LifecycleSettings, InfraError> {
    let path = config_dir.join(LIFECYCLE_JSON);
    let lifecycle = read_config(&path)?;
    let defaults = LifecycleSettings::default();

    let lookahead_days = match lifecycle.get("lookaheadDays").and_then(serde_json::Value::as_u64) {
        Some(0) => {
            return Err(InfraError::InvalidConfig(format!(
                "lookaheadDays must be > 0 in {}",
                path.display()
            )));
        }
        Some(days) => u32::try_from(days).map_err(|_| {
            InfraError::InvalidConfig(format!("lookaheadDays is too large in {}", path.display()))
        })?,
        None => defaults.lookahead_days,
    };
    let call_timeout = match lifecycle
        .get("callTimeoutSeconds")
        .and_then(serde_json::Value::as_u64)
    {
        Some(0) => {
            return Err(InfraError::InvalidConfig(format!(
                "callTimeoutSeconds must be > 0 in {}",
                path.display()
            )));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => defaults.call_timeout,
    };

    Ok(LifecycleSettings {
        lookahead_days,
        call_timeout,
        persist_toggles: lifecycle
            .get("persistToggles")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.persist_toggles),
    })
}

pub fn load_settings<F>(config_dir: &Path, lookup: F) -> Result<AppSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(AppSettings {
        time_zone: read_time_zone(config_dir)?,
        calendar: read_calendar_settings(config_dir)?,
        store: read_store_settings(config_dir, lookup)?,
        lifecycle: read_lifecycle_settings(config_dir)?,
    })
}
