use crate::domain::models::{CalendarToken, UserSession};
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Mutex;

const SESSION_ACCOUNT: &str = "session";
const CALENDAR_TOKEN_ACCOUNT: &str = "calendar-token";

pub trait CredentialStore: Send + Sync {
    fn save_session(&self, session: &UserSession) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<UserSession>, InfraError>;
    fn save_calendar_token(&self, token: &CalendarToken) -> Result<(), InfraError>;
    fn load_calendar_token(&self) -> Result<Option<CalendarToken>, InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, account)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn save<T: Serialize>(&self, account: &str, value: &T) -> Result<(), InfraError> {
        let payload =
            serde_json::to_string(value).map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry(account)?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load<T: DeserializeOwned>(&self, account: &str) -> Result<Option<T>, InfraError> {
        let payload = match self.entry(account)?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };
        let value = serde_json::from_str::<T>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(value))
    }

    fn delete(&self, account: &str) -> Result<(), InfraError> {
        match self.entry(account)?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("quizalarm")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_session(&self, session: &UserSession) -> Result<(), InfraError> {
        session.validate().map_err(InfraError::Credential)?;
        self.save(SESSION_ACCOUNT, session)
    }

    fn load_session(&self) -> Result<Option<UserSession>, InfraError> {
        self.load(SESSION_ACCOUNT)
    }

    fn save_calendar_token(&self, token: &CalendarToken) -> Result<(), InfraError> {
        self.save(CALENDAR_TOKEN_ACCOUNT, token)
    }

    fn load_calendar_token(&self) -> Result<Option<CalendarToken>, InfraError> {
        self.load(CALENDAR_TOKEN_ACCOUNT)
    }

    fn clear(&self) -> Result<(), InfraError> {
        self.delete(SESSION_ACCOUNT)?;
        self.delete(CALENDAR_TOKEN_ACCOUNT)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    session: Mutex<Option<UserSession>>,
    calendar_token: Mutex<Option<CalendarToken>>,
}

impl InMemoryCredentialStore {
    pub fn with_credentials(session: Option<UserSession>, calendar_token: Option<CalendarToken>) -> Self {
        Self {
            session: Mutex::new(session),
            calendar_token: Mutex::new(calendar_token),
        }
    }
}

fn poisoned(error: impl std::fmt::Display) -> InfraError {
    InfraError::Credential(format!("in-memory lock poisoned: {error}"))
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_session(&self, session: &UserSession) -> Result<(), InfraError> {
        session.validate().map_err(InfraError::Credential)?;
        *self.session.lock().map_err(poisoned)? = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<UserSession>, InfraError> {
        Ok(self.session.lock().map_err(poisoned)?.clone())
    }

    fn save_calendar_token(&self, token: &CalendarToken) -> Result<(), InfraError> {
        *self.calendar_token.lock().map_err(poisoned)? = Some(token.clone());
        Ok(())
    }

    fn load_calendar_token(&self) -> Result<Option<CalendarToken>, InfraError> {
        Ok(self.calendar_token.lock().map_err(poisoned)?.clone())
    }

    fn clear(&self) -> Result<(), InfraError> {
        *self.session.lock().map_err(poisoned)? = None;
        *self.calendar_token.lock().map_err(poisoned)? = None;
        Ok(())
    }
}
