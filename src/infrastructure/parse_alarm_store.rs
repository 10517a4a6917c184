use crate::domain::error::AlarmError;
use crate::domain::models::{Alarm, AlarmOrigin};
use crate::infrastructure::alarm_store::{AlarmStore, NewAlarmRecord};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::Arc;
use url::Url;

const ALARM_CLASS: &str = "Alarm";
const USER_CLASS: &str = "_User";
/// Parse Server caps a single query at 1000 results.
const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ParseStoreConfig {
    pub server_url: String,
    pub application_id: String,
    pub rest_api_key: Option<String>,
}

/// Alarm records kept in a Parse Server `Alarm` class.
///
/// The session token is read from the credential store on every request, so
/// a sign-in or user switch after construction takes effect immediately.
#[derive(Clone)]
pub struct ParseAlarmStore {
    client: Client,
    server_url: Url,
    application_id: String,
    rest_api_key: Option<String>,
    credentials: Arc<dyn CredentialStore>,
    page_size: usize,
}

#[derive(Debug, serde::Deserialize)]
struct CreateResponse {
    #[serde(rename = "objectId")]
    object_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<AlarmObject>,
}

#[derive(Debug, serde::Deserialize)]
struct PointerObject {
    #[serde(rename = "objectId")]
    object_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct DateObject {
    iso: String,
}

#[derive(Debug, serde::Deserialize)]
struct AlarmObject {
    #[serde(rename = "objectId")]
    object_id: String,
    #[serde(rename = "userId")]
    user_id: Option<PointerObject>,
    time: Option<DateObject>,
    #[serde(rename = "isOn", default)]
    is_on: bool,
    #[serde(rename = "eventId")]
    event_id: Option<String>,
}

impl ParseAlarmStore {
    pub fn new(
        config: ParseStoreConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        if config.application_id.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "parse application id must not be empty".to_string(),
            ));
        }
        let mut normalized = config.server_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let server_url = Url::parse(&normalized).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid parse server url '{}': {error}",
                config.server_url
            ))
        })?;

        Ok(Self {
            client: Client::new(),
            server_url,
            application_id: config.application_id.trim().to_string(),
            rest_api_key: config
                .rest_api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            credentials,
            page_size: LIST_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, LIST_PAGE_SIZE);
        self
    }

    fn endpoint(&self, object_id: Option<&str>) -> Result<Url, AlarmError> {
        let mut url = self.server_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("parse server URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.push("classes");
            path.push(ALARM_CLASS);
            if let Some(object_id) = object_id {
                path.push(object_id);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, AlarmError> {
        let mut request = request.header("X-Parse-Application-Id", &self.application_id);
        if let Some(key) = self.rest_api_key.as_deref() {
            request = request.header("X-Parse-REST-API-Key", key);
        }
        let session = self.credentials.load_session()?;
        if let Some(token) = session
            .as_ref()
            .map(|session| session.session_token.trim())
            .filter(|token| !token.is_empty())
        {
            request = request.header("X-Parse-Session-Token", token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<(StatusCode, String), AlarmError> {
        let response = self.authorized(request)?.send().await.map_err(|error| {
            AlarmError::StoreUnavailable(format!("network error while {action}: {error}"))
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            AlarmError::StoreUnavailable(format!("failed reading response while {action}: {error}"))
        })?;
        Ok((status, body))
    }

    fn status_error(status: StatusCode, body: &str, action: &str) -> AlarmError {
        if body.trim().is_empty() {
            AlarmError::StoreUnavailable(format!("{action} failed: http {}", status.as_u16()))
        } else {
            AlarmError::StoreUnavailable(format!(
                "{action} failed: http {}; body={body}",
                status.as_u16()
            ))
        }
    }

    fn owner_pointer(owner_id: &str) -> serde_json::Value {
        serde_json::json!({
            "__type": "Pointer",
            "className": USER_CLASS,
            "objectId": owner_id,
        })
    }

    fn to_alarm(object: AlarmObject, owner_id: &str) -> Result<Alarm, AlarmError> {
        let raw_time = object.time.map(|time| time.iso).ok_or_else(|| {
            AlarmError::StoreUnavailable(format!("alarm {} has no time", object.object_id))
        })?;
        let time = DateTime::parse_from_rfc3339(&raw_time)
            .map_err(|error| {
                AlarmError::StoreUnavailable(format!(
                    "alarm {} has invalid time '{raw_time}': {error}",
                    object.object_id
                ))
            })?
            .with_timezone(&Utc);

        Ok(Alarm {
            owner_id: object
                .user_id
                .map(|pointer| pointer.object_id)
                .unwrap_or_else(|| owner_id.to_string()),
            id: object.object_id,
            event_id: object
                .event_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            time,
            is_on: object.is_on,
            origin: AlarmOrigin::Store,
        })
    }
}

#[async_trait]
impl AlarmStore for ParseAlarmStore {
    async fn create(&self, record: NewAlarmRecord) -> Result<Alarm, AlarmError> {
        let mut body = serde_json::json!({
            "userId": Self::owner_pointer(&record.owner_id),
            "time": {
                "__type": "Date",
                "iso": record.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            },
            "isOn": record.is_on,
        });
        if let Some(event_id) = record.event_id.as_deref() {
            body["eventId"] = serde_json::Value::String(event_id.to_string());
        }

        let request = self.client.post(self.endpoint(None)?).json(&body);
        let (status, text) = self.send(request, "saving alarm").await?;
        if !status.is_success() {
            return Err(Self::status_error(status, &text, "saving alarm"));
        }
        let created: CreateResponse = serde_json::from_str(&text).map_err(|error| {
            AlarmError::StoreUnavailable(format!("invalid alarm create payload: {error}; body={text}"))
        })?;

        Ok(Alarm {
            id: created.object_id,
            event_id: record.event_id,
            time: record.time,
            is_on: record.is_on,
            owner_id: record.owner_id,
            origin: AlarmOrigin::Store,
        })
    }

    /// Pages through the owner's records with `limit`/`skip` until a short
    /// page comes back.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Alarm>, AlarmError> {
        let filter = serde_json::json!({ "userId": Self::owner_pointer(owner_id) }).to_string();
        let limit = self.page_size.to_string();
        let mut alarms = Vec::new();
        let mut skip = 0usize;

        loop {
            let skip_value = skip.to_string();
            let request = self.client.get(self.endpoint(None)?).query(&[
                ("where", filter.as_str()),
                ("order", "createdAt"),
                ("limit", limit.as_str()),
                ("skip", skip_value.as_str()),
            ]);
            let (status, text) = self.send(request, "listing alarms").await?;
            if !status.is_success() {
                return Err(Self::status_error(status, &text, "listing alarms"));
            }
            let parsed: QueryResponse = serde_json::from_str(&text).map_err(|error| {
                AlarmError::StoreUnavailable(format!("invalid alarm query payload: {error}; body={text}"))
            })?;

            let fetched = parsed.results.len();
            for object in parsed.results {
                alarms.push(Self::to_alarm(object, owner_id)?);
            }
            if fetched < self.page_size {
                break;
            }
            skip += fetched;
        }
        Ok(alarms)
    }

    async fn set_is_on(&self, alarm_id: &str, is_on: bool) -> Result<(), AlarmError> {
        let request = self
            .client
            .put(self.endpoint(Some(alarm_id))?)
            .json(&serde_json::json!({ "isOn": is_on }));
        let (status, text) = self.send(request, "updating alarm").await?;
        if status == StatusCode::NOT_FOUND {
            return Err(AlarmError::NotFound(alarm_id.to_string()));
        }
        if !status.is_success() {
            return Err(Self::status_error(status, &text, "updating alarm"));
        }
        Ok(())
    }

    async fn delete(&self, alarm_id: &str) -> Result<(), AlarmError> {
        let request = self.client.delete(self.endpoint(Some(alarm_id))?);
        let (status, text) = self.send(request, "deleting alarm").await?;
        if status == StatusCode::NOT_FOUND {
            return Err(AlarmError::NotFound(alarm_id.to_string()));
        }
        if !status.is_success() {
            return Err(Self::status_error(status, &text, "deleting alarm"));
        }
        Ok(())
    }
}
