use crate::domain::models::{Orphan, OrphanKind};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Durable list of artifacts waiting to be cleaned up.
pub trait OrphanLedger: Send + Sync {
    fn record(&self, orphan: &Orphan) -> Result<(), InfraError>;
    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Orphan>, InfraError>;
    fn remove(&self, orphan_id: &str) -> Result<(), InfraError>;
}

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteOrphanLedger {
    db_path: PathBuf,
}

impl SqliteOrphanLedger {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

fn parse_timestamp(raw: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid orphans.{field_name} '{raw}': {error}"))
        })
}

impl OrphanLedger for SqliteOrphanLedger {
    fn record(&self, orphan: &Orphan) -> Result<(), InfraError> {
        orphan.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO orphans (id, kind, external_id, owner_id, alarm_time, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               reason = excluded.reason,
               recorded_at = excluded.recorded_at",
            params![
                orphan.id,
                orphan.kind.as_str(),
                orphan.external_id,
                orphan.owner_id,
                orphan.time.to_rfc3339(),
                orphan.reason,
                orphan.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Orphan>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, kind, external_id, owner_id, alarm_time, reason, recorded_at
             FROM orphans WHERE owner_id = ?1 ORDER BY recorded_at, id",
        )?;
        let rows = statement.query_map(params![owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut orphans = Vec::new();
        for row in rows {
            let (id, kind, external_id, owner_id, alarm_time, reason, recorded_at) = row?;
            let kind = OrphanKind::parse(&kind).ok_or_else(|| {
                InfraError::InvalidConfig(format!("invalid orphans.kind '{kind}'"))
            })?;
            orphans.push(Orphan {
                id,
                kind,
                external_id,
                owner_id,
                time: parse_timestamp(&alarm_time, "alarm_time")?,
                reason,
                recorded_at: parse_timestamp(&recorded_at, "recorded_at")?,
            });
        }
        Ok(orphans)
    }

    fn remove(&self, orphan_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM orphans WHERE id = ?1", params![orphan_id])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrphanLedger {
    orphans: Mutex<Vec<Orphan>>,
}

fn poisoned(error: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("orphan ledger lock poisoned: {error}"))
}

impl OrphanLedger for InMemoryOrphanLedger {
    fn record(&self, orphan: &Orphan) -> Result<(), InfraError> {
        orphan.validate().map_err(InfraError::InvalidConfig)?;
        let mut orphans = self.orphans.lock().map_err(poisoned)?;
        orphans.retain(|existing| existing.id != orphan.id);
        orphans.push(orphan.clone());
        Ok(())
    }

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Orphan>, InfraError> {
        let orphans = self.orphans.lock().map_err(poisoned)?;
        Ok(orphans
            .iter()
            .filter(|orphan| orphan.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn remove(&self, orphan_id: &str) -> Result<(), InfraError> {
        self.orphans
            .lock()
            .map_err(poisoned)?
            .retain(|orphan| orphan.id != orphan_id);
        Ok(())
    }
}
