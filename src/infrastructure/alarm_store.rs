use crate::domain::error::AlarmError;
use crate::domain::models::{Alarm, AlarmOrigin};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlarmRecord {
    pub owner_id: String,
    pub time: DateTime<Utc>,
    pub is_on: bool,
    pub event_id: Option<String>,
}

/// Remote persistence of alarms, always scoped to one owner.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn create(&self, record: NewAlarmRecord) -> Result<Alarm, AlarmError>;

    /// Records owned by `owner_id`, oldest first.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Alarm>, AlarmError>;

    async fn set_is_on(&self, alarm_id: &str, is_on: bool) -> Result<(), AlarmError>;

    async fn delete(&self, alarm_id: &str) -> Result<(), AlarmError>;
}

#[derive(Debug)]
pub struct InMemoryAlarmStore {
    records: Mutex<Vec<Alarm>>,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl Default for InMemoryAlarmStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryAlarmStore {
    pub fn with_records(records: Vec<Alarm>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Simulates a backend outage; every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn records(&self) -> Result<Vec<Alarm>, AlarmError> {
        Ok(self.lock_records()?.clone())
    }

    fn lock_records(&self) -> Result<MutexGuard<'_, Vec<Alarm>>, AlarmError> {
        self.records.lock().map_err(|error| {
            AlarmError::Infra(InfraError::InvalidConfig(format!(
                "alarm store lock poisoned: {error}"
            )))
        })
    }

    fn require_available(&self) -> Result<(), AlarmError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AlarmError::StoreUnavailable("in-memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn create(&self, record: NewAlarmRecord) -> Result<Alarm, AlarmError> {
        self.require_available()?;
        let alarm = Alarm {
            id: format!("rec-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            event_id: record.event_id,
            time: record.time,
            is_on: record.is_on,
            owner_id: record.owner_id,
            origin: AlarmOrigin::Store,
        };
        self.lock_records()?.push(alarm.clone());
        Ok(alarm)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Alarm>, AlarmError> {
        self.require_available()?;
        Ok(self
            .lock_records()?
            .iter()
            .filter(|alarm| alarm.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn set_is_on(&self, alarm_id: &str, is_on: bool) -> Result<(), AlarmError> {
        self.require_available()?;
        let mut records = self.lock_records()?;
        let record = records
            .iter_mut()
            .find(|alarm| alarm.id == alarm_id)
            .ok_or_else(|| AlarmError::NotFound(alarm_id.to_string()))?;
        record.is_on = is_on;
        Ok(())
    }

    async fn delete(&self, alarm_id: &str) -> Result<(), AlarmError> {
        self.require_available()?;
        let mut records = self.lock_records()?;
        let before = records.len();
        records.retain(|alarm| alarm.id != alarm_id);
        if records.len() == before {
            return Err(AlarmError::NotFound(alarm_id.to_string()));
        }
        Ok(())
    }
}
