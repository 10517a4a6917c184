use crate::domain::error::AlarmError;
use crate::domain::models::{Alarm, AlarmOrigin, Notification, Orphan, OrphanKind, PermissionStatus};
use crate::infrastructure::alarm_store::{AlarmStore, NewAlarmRecord};
use crate::infrastructure::calendar_gateway::CalendarGateway;
use crate::infrastructure::config::LifecycleSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::orphan_ledger::OrphanLedger;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub const PERMISSION_DENIED_MESSAGE: &str = "Calendar permission not granted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted {
        alarm: Alarm,
        warnings: Vec<Notification>,
    },
    /// No alarm with that id was held; nothing changed.
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resolved: Vec<String>,
    pub remaining: Vec<Orphan>,
}

async fn calendar_call<T, F>(timeout: std::time::Duration, call: F) -> Result<T, AlarmError>
where
    F: Future<Output = Result<T, AlarmError>>,
{
    tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
        Err(AlarmError::CalendarUnavailable(format!(
            "calendar call timed out after {}ms",
            timeout.as_millis()
        )))
    })
}

async fn store_call<T, F>(timeout: std::time::Duration, call: F) -> Result<T, AlarmError>
where
    F: Future<Output = Result<T, AlarmError>>,
{
    tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
        Err(AlarmError::StoreUnavailable(format!(
            "store call timed out after {}ms",
            timeout.as_millis()
        )))
    })
}

/// Keeps the user's alarm list consistent with the calendar and the alarm
/// store. Display order is insertion order.
pub struct AlarmLifecycleManager<G, S, L>
where
    G: CalendarGateway + ?Sized,
    S: AlarmStore + ?Sized,
    L: OrphanLedger + ?Sized,
{
    calendar: Arc<G>,
    store: Arc<S>,
    ledger: Arc<L>,
    settings: LifecycleSettings,
    now_provider: NowProvider,
    owner_id: Option<String>,
    alarms: Vec<Alarm>,
    orphan_sequence: u64,
}

impl<G, S, L> AlarmLifecycleManager<G, S, L>
where
    G: CalendarGateway + ?Sized,
    S: AlarmStore + ?Sized,
    L: OrphanLedger + ?Sized,
{
    pub fn new(calendar: Arc<G>, store: Arc<S>, ledger: Arc<L>) -> Self {
        Self {
            calendar,
            store,
            ledger,
            settings: LifecycleSettings::default(),
            now_provider: Arc::new(Utc::now),
            owner_id: None,
            alarms: Vec::new(),
            orphan_sequence: 0,
        }
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn snapshot(&self) -> Vec<Alarm> {
        self.alarms.clone()
    }

    /// Binds the manager to `owner_id` and rebuilds state from the calendar,
    /// enriched with store records that reference the same events.
    ///
    /// Returns non-fatal warnings: a denied permission leaves the list empty
    /// and an unreachable store leaves it calendar-only.
    pub async fn initialize(&mut self, owner_id: &str) -> Result<Vec<Notification>, AlarmError> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(AlarmError::Infra(InfraError::InvalidConfig(
                "owner_id must not be empty".to_string(),
            )));
        }
        self.owner_id = Some(owner_id.to_string());
        self.alarms.clear();

        let timeout = self.settings.call_timeout;
        let mut warnings = Vec::new();
        let permission = calendar_call(timeout, self.calendar.ensure_permission()).await?;
        if !permission.is_granted() {
            warnings.push(Notification::warning(PERMISSION_DENIED_MESSAGE));
            return Ok(warnings);
        }

        let from = (self.now_provider)();
        let to = from + Duration::days(i64::from(self.settings.lookahead_days));
        let events = calendar_call(timeout, self.calendar.list_upcoming_events(from, to)).await?;

        let records = match store_call(timeout, self.store.list_for_owner(owner_id)).await {
            Ok(records) => records,
            Err(error) if error.is_recoverable() => {
                warnings.push(Notification::warning(format!(
                    "Saved alarm settings could not be loaded: {error}"
                )));
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        let by_event: HashMap<&str, &Alarm> = records
            .iter()
            .filter_map(|record| record.event_id.as_deref().map(|event_id| (event_id, record)))
            .collect();

        let mut seen = HashSet::new();
        for event in &events {
            let alarm = match by_event.get(event.event_id.as_str()) {
                Some(record) => Alarm {
                    id: record.id.clone(),
                    event_id: Some(event.event_id.clone()),
                    time: event.time,
                    is_on: record.is_on,
                    owner_id: owner_id.to_string(),
                    origin: AlarmOrigin::Store,
                },
                None => Alarm::from_calendar_event(event, owner_id),
            };
            if seen.insert(alarm.id.clone()) {
                self.alarms.push(alarm);
            }
        }
        Ok(warnings)
    }

    /// Creates the calendar event, then the store record, then appends.
    ///
    /// A store failure after the event exists leaves the event in place,
    /// records it in the orphan ledger and returns `OrphanedEvent`.
    pub async fn schedule_alarm(&mut self, time: DateTime<Utc>) -> Result<Alarm, AlarmError> {
        let owner_id = self.require_owner()?.to_string();
        let timeout = self.settings.call_timeout;

        let permission = calendar_call(timeout, self.calendar.ensure_permission()).await?;
        if permission == PermissionStatus::Denied {
            return Err(AlarmError::PermissionDenied);
        }
        // A timed-out create may still land on the server. No event id is known,
        // so nothing can be recorded; it comes back as a provisional alarm.
        let event_id = tokio::time::timeout(timeout, self.calendar.create_alarm_event(time))
            .await
            .unwrap_or_else(|_| {
                Err(AlarmError::CalendarUnavailable(format!(
                    "calendar did not confirm the new event within {}ms; it may still appear after the next reload",
                    timeout.as_millis()
                )))
            })?;

        let record = NewAlarmRecord {
            owner_id: owner_id.clone(),
            time,
            is_on: true,
            event_id: Some(event_id.clone()),
        };
        let alarm = match store_call(timeout, self.store.create(record)).await {
            Ok(alarm) => alarm,
            Err(error) => {
                let reason =
                    self.track_orphan(OrphanKind::CalendarEvent, &event_id, &owner_id, time, error);
                return Err(AlarmError::OrphanedEvent { event_id, reason });
            }
        };

        self.alarms.retain(|existing| existing.id != alarm.id);
        self.alarms.push(alarm.clone());
        Ok(alarm)
    }

    /// Flips `is_on` for the alarm at `index`. Persisted alarms are written
    /// through to the store when enabled; a failed write restores the old value.
    pub async fn toggle_alarm(&mut self, index: usize) -> Result<Alarm, AlarmError> {
        let len = self.alarms.len();
        let Some(alarm) = self.alarms.get_mut(index) else {
            return Err(AlarmError::IndexOutOfRange { index, len });
        };
        alarm.is_on = !alarm.is_on;
        let is_on = alarm.is_on;
        let write_through = self.settings.persist_toggles && alarm.is_persisted();
        let alarm_id = alarm.id.clone();

        if write_through {
            let timeout = self.settings.call_timeout;
            if let Err(error) = store_call(timeout, self.store.set_is_on(&alarm_id, is_on)).await {
                if let Some(alarm) = self.alarms.iter_mut().find(|alarm| alarm.id == alarm_id) {
                    alarm.is_on = !is_on;
                }
                return Err(error);
            }
        }
        self.alarms
            .iter()
            .find(|alarm| alarm.id == alarm_id)
            .cloned()
            .ok_or(AlarmError::NotFound(alarm_id))
    }

    /// Removes the alarm from memory and deletes its calendar event and
    /// store record. Both deletes are always attempted. External failures are
    /// recorded as orphans and reported as warnings; the alarm stays removed.
    pub async fn delete_alarm(&mut self, alarm_id: &str) -> Result<DeleteOutcome, AlarmError> {
        let owner_id = self.require_owner()?.to_string();
        let Some(position) = self.alarms.iter().position(|alarm| alarm.id == alarm_id) else {
            return Ok(DeleteOutcome::NotFound);
        };
        let alarm = self.alarms.remove(position);
        let timeout = self.settings.call_timeout;
        let mut warnings = Vec::new();

        if let Some(event_id) = alarm.event_id.as_deref() {
            if let Err(error) = calendar_call(timeout, self.calendar.delete_event(event_id)).await {
                let reason =
                    self.track_orphan(OrphanKind::CalendarEvent, event_id, &owner_id, alarm.time, error);
                warnings.push(Notification::warning(format!(
                    "The calendar event could not be removed and will be retried: {reason}"
                )));
            }
        }

        if alarm.is_persisted() {
            match store_call(timeout, self.store.delete(&alarm.id)).await {
                Ok(()) | Err(AlarmError::NotFound(_)) => {}
                Err(error) => {
                    let reason =
                        self.track_orphan(OrphanKind::StoreRecord, &alarm.id, &owner_id, alarm.time, error);
                    warnings.push(Notification::warning(format!(
                        "The saved alarm could not be removed and will be retried: {reason}"
                    )));
                }
            }
        }

        Ok(DeleteOutcome::Deleted { alarm, warnings })
    }

    /// Retries cleanup of every ledger entry owned by the bound user.
    pub async fn reconcile_orphans(&mut self) -> Result<ReconcileReport, AlarmError> {
        let owner_id = self.require_owner()?.to_string();
        let timeout = self.settings.call_timeout;
        let mut report = ReconcileReport::default();

        for orphan in self.ledger.list_for_owner(&owner_id)? {
            let result = match orphan.kind {
                OrphanKind::CalendarEvent => {
                    calendar_call(timeout, self.calendar.delete_event(&orphan.external_id)).await
                }
                OrphanKind::StoreRecord => {
                    match store_call(timeout, self.store.delete(&orphan.external_id)).await {
                        Err(AlarmError::NotFound(_)) => Ok(()),
                        other => other,
                    }
                }
            };

            match result {
                Ok(()) => {
                    self.ledger.remove(&orphan.id)?;
                    if orphan.kind == OrphanKind::CalendarEvent {
                        // A provisional alarm may have been rebuilt from the leftover event.
                        self.alarms.retain(|alarm| {
                            alarm.origin != AlarmOrigin::Calendar
                                || alarm.event_id.as_deref() != Some(orphan.external_id.as_str())
                        });
                    }
                    report.resolved.push(orphan.id);
                }
                Err(error) if error.is_recoverable() => report.remaining.push(orphan),
                Err(error) => return Err(error),
            }
        }
        Ok(report)
    }

    fn require_owner(&self) -> Result<&str, AlarmError> {
        self.owner_id.as_deref().ok_or(AlarmError::NotInitialized)
    }

    /// Records a leftover external object and returns the failure reason,
    /// extended with the ledger error when the entry could not be written.
    fn track_orphan(
        &mut self,
        kind: OrphanKind,
        external_id: &str,
        owner_id: &str,
        time: DateTime<Utc>,
        error: AlarmError,
    ) -> String {
        let reason = error.to_string();
        match self.record_orphan(kind, external_id, owner_id, time, &reason) {
            Ok(()) => reason,
            Err(ledger_error) => format!("{reason}; orphan not recorded: {ledger_error}"),
        }
    }

    fn record_orphan(
        &mut self,
        kind: OrphanKind,
        external_id: &str,
        owner_id: &str,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), AlarmError> {
        let recorded_at = (self.now_provider)();
        self.orphan_sequence += 1;
        let orphan = Orphan {
            id: format!(
                "orphan-{}-{}",
                recorded_at.timestamp_millis(),
                self.orphan_sequence
            ),
            kind,
            external_id: external_id.to_string(),
            owner_id: owner_id.to_string(),
            time,
            reason: reason.to_string(),
            recorded_at,
        };
        self.ledger.record(&orphan)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CalendarAlarmEvent;
    use crate::infrastructure::alarm_store::InMemoryAlarmStore;
    use crate::infrastructure::calendar_gateway::InMemoryCalendarGateway;
    use crate::infrastructure::orphan_ledger::InMemoryOrphanLedger;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Manager =
        AlarmLifecycleManager<InMemoryCalendarGateway, InMemoryAlarmStore, InMemoryOrphanLedger>;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        fixed_time("2026-02-16T00:00:00Z")
    }

    fn event(event_id: &str, time: &str) -> CalendarAlarmEvent {
        CalendarAlarmEvent {
            event_id: event_id.to_string(),
            time: fixed_time(time),
        }
    }

    struct Fixture {
        calendar: Arc<InMemoryCalendarGateway>,
        store: Arc<InMemoryAlarmStore>,
        ledger: Arc<InMemoryOrphanLedger>,
    }

    impl Fixture {
        fn new(calendar: InMemoryCalendarGateway, store: InMemoryAlarmStore) -> Self {
            Self {
                calendar: Arc::new(calendar),
                store: Arc::new(store),
                ledger: Arc::new(InMemoryOrphanLedger::default()),
            }
        }

        fn manager(&self) -> Manager {
            AlarmLifecycleManager::new(
                Arc::clone(&self.calendar),
                Arc::clone(&self.store),
                Arc::clone(&self.ledger),
            )
            .with_now_provider(Arc::new(now))
        }

        async fn initialized(&self) -> Manager {
            let mut manager = self.manager();
            manager.initialize("user1").await.expect("initialize");
            manager
        }

        fn orphans(&self) -> Vec<Orphan> {
            self.ledger.list_for_owner("user1").expect("list orphans")
        }
    }

    fn default_fixture() -> Fixture {
        Fixture::new(InMemoryCalendarGateway::default(), InMemoryAlarmStore::default())
    }

    #[tokio::test]
    async fn initialize_loads_calendar_events_in_order() {
        let fixture = Fixture::new(
            InMemoryCalendarGateway::with_events(vec![
                event("evt-8", "2026-02-16T08:00:00Z"),
                event("evt-9", "2026-02-16T09:00:00Z"),
            ]),
            InMemoryAlarmStore::default(),
        );
        let mut manager = fixture.manager();

        let warnings = manager.initialize("user1").await.expect("initialize");

        assert!(warnings.is_empty());
        assert_eq!(manager.owner_id(), Some("user1"));
        let times: Vec<_> = manager.alarms().iter().map(|alarm| alarm.time).collect();
        assert_eq!(
            times,
            vec![
                fixed_time("2026-02-16T08:00:00Z"),
                fixed_time("2026-02-16T09:00:00Z")
            ]
        );
        assert!(manager.alarms().iter().all(|alarm| alarm.is_on));
    }

    #[tokio::test]
    async fn initialize_only_reads_the_lookahead_window() {
        let fixture = Fixture::new(
            InMemoryCalendarGateway::with_events(vec![
                event("evt-past", "2026-02-15T08:00:00Z"),
                event("evt-soon", "2026-02-20T08:00:00Z"),
                event("evt-far", "2026-04-01T08:00:00Z"),
            ]),
            InMemoryAlarmStore::default(),
        );
        let manager = fixture.initialized().await;

        let ids: Vec<_> = manager.alarms().iter().map(|alarm| alarm.id.as_str()).collect();
        assert_eq!(ids, vec!["evt-soon"]);
    }

    #[tokio::test]
    async fn initialize_merges_store_records_by_event_id() {
        let stored = Alarm {
            id: "rec-7".to_string(),
            event_id: Some("evt-9".to_string()),
            time: fixed_time("2026-02-16T09:00:00Z"),
            is_on: false,
            owner_id: "user1".to_string(),
            origin: AlarmOrigin::Store,
        };
        let fixture = Fixture::new(
            InMemoryCalendarGateway::with_events(vec![
                event("evt-8", "2026-02-16T08:00:00Z"),
                event("evt-9", "2026-02-16T09:00:00Z"),
            ]),
            InMemoryAlarmStore::with_records(vec![stored]),
        );
        let manager = fixture.initialized().await;

        let alarms = manager.alarms();
        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[0].origin, AlarmOrigin::Calendar);
        assert_eq!(alarms[1].id, "rec-7");
        assert_eq!(alarms[1].origin, AlarmOrigin::Store);
        assert!(!alarms[1].is_on);
    }

    #[tokio::test]
    async fn initialize_with_denied_permission_warns_and_stays_empty() {
        let fixture = Fixture::new(
            InMemoryCalendarGateway::with_events(vec![event("evt-8", "2026-02-16T08:00:00Z")]),
            InMemoryAlarmStore::default(),
        );
        fixture
            .calendar
            .set_permission(PermissionStatus::Denied)
            .expect("deny");
        let mut manager = fixture.manager();

        let warnings = manager.initialize("user1").await.expect("initialize");

        assert_eq!(warnings, vec![Notification::warning(PERMISSION_DENIED_MESSAGE)]);
        assert!(manager.alarms().is_empty());
    }

    #[tokio::test]
    async fn initialize_falls_back_to_calendar_when_store_is_down() {
        let fixture = Fixture::new(
            InMemoryCalendarGateway::with_events(vec![event("evt-8", "2026-02-16T08:00:00Z")]),
            InMemoryAlarmStore::default(),
        );
        fixture.store.set_available(false);
        let mut manager = fixture.manager();

        let warnings = manager.initialize("user1").await.expect("initialize");

        assert_eq!(warnings.len(), 1);
        assert_eq!(manager.alarms().len(), 1);
        assert_eq!(manager.alarms()[0].origin, AlarmOrigin::Calendar);
    }

    #[tokio::test]
    async fn initialize_replaces_previous_state() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");

        manager.initialize("user2").await.expect("initialize other user");

        assert_eq!(manager.owner_id(), Some("user2"));
        // user2 sees the calendar event but not user1's store record
        assert_eq!(manager.alarms().len(), 1);
        assert_eq!(manager.alarms()[0].origin, AlarmOrigin::Calendar);
    }

    #[tokio::test]
    async fn operations_require_initialize() {
        let mut manager = default_fixture().manager();
        assert!(matches!(
            manager.schedule_alarm(now()).await,
            Err(AlarmError::NotInitialized)
        ));
        assert!(matches!(
            manager.delete_alarm("rec-1").await,
            Err(AlarmError::NotInitialized)
        ));
        assert!(matches!(
            manager.reconcile_orphans().await,
            Err(AlarmError::NotInitialized)
        ));
        assert!(manager.initialize("  ").await.is_err());
    }

    #[tokio::test]
    async fn schedule_alarm_writes_calendar_then_store() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;

        let alarm = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");

        assert_eq!(alarm.time, fixed_time("2026-02-16T14:30:00Z"));
        assert!(alarm.is_on);
        assert!(alarm.validate().is_ok());
        assert_eq!(manager.alarms(), &[alarm.clone()]);

        let events = fixture.calendar.events().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(alarm.event_id.as_deref(), Some(events[0].event_id.as_str()));
        assert_eq!(fixture.store.records().expect("records"), vec![alarm]);
    }

    #[tokio::test]
    async fn schedule_alarm_without_permission_has_no_side_effects() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        fixture
            .calendar
            .set_permission(PermissionStatus::Denied)
            .expect("deny");

        assert!(matches!(
            manager.schedule_alarm(fixed_time("2026-02-16T14:30:00Z")).await,
            Err(AlarmError::PermissionDenied)
        ));
        assert!(manager.alarms().is_empty());
        assert!(fixture.store.records().expect("records").is_empty());
    }

    #[tokio::test]
    async fn schedule_alarm_calendar_failure_leaves_state_unchanged() {
        let fixture = Fixture::new(
            InMemoryCalendarGateway::without_primary_calendar(),
            InMemoryAlarmStore::default(),
        );
        let mut manager = fixture.manager();
        // listing fails without a primary calendar, so bind the owner on a denied pass
        fixture
            .calendar
            .set_permission(PermissionStatus::Denied)
            .expect("deny");
        manager.initialize("user1").await.expect("initialize");
        fixture
            .calendar
            .set_permission(PermissionStatus::Granted)
            .expect("grant");

        assert!(matches!(
            manager.schedule_alarm(fixed_time("2026-02-16T14:30:00Z")).await,
            Err(AlarmError::NoPrimaryCalendar)
        ));
        assert!(manager.alarms().is_empty());
        assert!(fixture.store.records().expect("records").is_empty());
        assert!(fixture.orphans().is_empty());
    }

    #[tokio::test]
    async fn schedule_alarm_store_failure_records_orphaned_event() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        fixture.store.set_available(false);

        let error = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect_err("store is offline");

        let AlarmError::OrphanedEvent { event_id, .. } = error else {
            panic!("expected orphaned event, got {error:?}");
        };
        assert!(manager.alarms().is_empty());
        assert_eq!(fixture.calendar.events().expect("events").len(), 1);

        let orphans = fixture.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, OrphanKind::CalendarEvent);
        assert_eq!(orphans[0].external_id, event_id);
    }

    #[tokio::test]
    async fn reconcile_orphans_deletes_leftover_events() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        fixture.store.set_available(false);
        let _ = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect_err("store is offline");
        fixture.store.set_available(true);

        // the leftover event shows up as a provisional alarm after a reload
        manager.initialize("user1").await.expect("reinitialize");
        assert_eq!(manager.alarms().len(), 1);

        let report = manager.reconcile_orphans().await.expect("reconcile");

        assert_eq!(report.resolved.len(), 1);
        assert!(report.remaining.is_empty());
        assert!(fixture.orphans().is_empty());
        assert!(fixture.calendar.events().expect("events").is_empty());
        assert!(manager.alarms().is_empty());
    }

    #[tokio::test]
    async fn reconcile_orphans_keeps_entries_that_still_fail() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        let alarm = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");
        fixture.store.set_available(false);
        let _ = manager.delete_alarm(&alarm.id).await.expect("delete");

        let report = manager.reconcile_orphans().await.expect("reconcile");
        assert!(report.resolved.is_empty());
        assert_eq!(report.remaining.len(), 1);
        assert_eq!(report.remaining[0].kind, OrphanKind::StoreRecord);

        fixture.store.set_available(true);
        let report = manager.reconcile_orphans().await.expect("reconcile again");
        assert_eq!(report.resolved.len(), 1);
        assert!(fixture.store.records().expect("records").is_empty());
    }

    #[tokio::test]
    async fn toggle_alarm_writes_through_to_store() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");

        let toggled = manager.toggle_alarm(0).await.expect("toggle");

        assert!(!toggled.is_on);
        assert!(!manager.alarms()[0].is_on);
        assert!(!fixture.store.records().expect("records")[0].is_on);
        assert_eq!(fixture.calendar.events().expect("events").len(), 1);
    }

    #[tokio::test]
    async fn toggle_alarm_reverts_when_store_write_fails() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");
        fixture.store.set_available(false);

        assert!(matches!(
            manager.toggle_alarm(0).await,
            Err(AlarmError::StoreUnavailable(_))
        ));
        assert!(manager.alarms()[0].is_on);
    }

    #[tokio::test]
    async fn toggle_alarm_on_provisional_alarm_leaves_calendar_and_store_untouched() {
        let fixture = Fixture::new(
            InMemoryCalendarGateway::with_events(vec![event("evt-8", "2026-02-16T08:00:00Z")]),
            InMemoryAlarmStore::default(),
        );
        let mut manager = fixture.initialized().await;
        fixture.store.set_available(false);

        let toggled = manager.toggle_alarm(0).await.expect("toggle");

        assert!(!toggled.is_on);
        assert_eq!(fixture.calendar.events().expect("events").len(), 1);
        fixture.store.set_available(true);
        assert!(fixture.store.records().expect("records").is_empty());
    }

    #[tokio::test]
    async fn toggle_alarm_without_write_through_stays_local() {
        let fixture = default_fixture();
        let mut manager = fixture
            .manager()
            .with_settings(LifecycleSettings {
                persist_toggles: false,
                ..LifecycleSettings::default()
            });
        manager.initialize("user1").await.expect("initialize");
        manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");

        manager.toggle_alarm(0).await.expect("toggle");

        assert!(!manager.alarms()[0].is_on);
        assert!(fixture.store.records().expect("records")[0].is_on);
    }

    #[tokio::test]
    async fn toggle_alarm_rejects_out_of_range_index() {
        let mut manager = default_fixture().initialized().await;
        assert!(matches!(
            manager.toggle_alarm(0).await,
            Err(AlarmError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[tokio::test]
    async fn delete_alarm_removes_event_and_record() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        let alarm = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");

        let outcome = manager.delete_alarm(&alarm.id).await.expect("delete");

        assert_eq!(
            outcome,
            DeleteOutcome::Deleted {
                alarm,
                warnings: Vec::new()
            }
        );
        assert!(manager.alarms().is_empty());
        assert!(fixture.calendar.events().expect("events").is_empty());
        assert!(fixture.store.records().expect("records").is_empty());
    }

    #[tokio::test]
    async fn delete_alarm_with_unknown_id_is_a_no_op() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");
        let before = manager.snapshot();

        let outcome = manager.delete_alarm("missing").await.expect("delete");

        assert_eq!(outcome, DeleteOutcome::NotFound);
        assert_eq!(manager.snapshot(), before);
    }

    #[tokio::test]
    async fn delete_alarm_records_orphan_when_calendar_delete_fails() {
        let fixture = default_fixture();
        let mut manager = fixture.initialized().await;
        let alarm = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");
        fixture
            .calendar
            .set_permission(PermissionStatus::Denied)
            .expect("deny");

        let outcome = manager.delete_alarm(&alarm.id).await.expect("delete");

        let DeleteOutcome::Deleted { warnings, .. } = outcome else {
            panic!("expected deleted outcome");
        };
        assert_eq!(warnings.len(), 1);
        assert!(manager.alarms().is_empty());
        assert!(fixture.store.records().expect("records").is_empty());
        let orphans = fixture.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, OrphanKind::CalendarEvent);
        assert_eq!(Some(orphans[0].external_id.clone()), alarm.event_id);
    }

    struct FailingOrphanLedger;

    impl OrphanLedger for FailingOrphanLedger {
        fn record(&self, _orphan: &Orphan) -> Result<(), InfraError> {
            Err(InfraError::InvalidConfig("ledger is read-only".to_string()))
        }

        fn list_for_owner(&self, _owner_id: &str) -> Result<Vec<Orphan>, InfraError> {
            Ok(Vec::new())
        }

        fn remove(&self, _orphan_id: &str) -> Result<(), InfraError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delete_alarm_still_deletes_record_when_ledger_fails() {
        let calendar = Arc::new(InMemoryCalendarGateway::default());
        let store = Arc::new(InMemoryAlarmStore::default());
        let mut manager = AlarmLifecycleManager::new(
            Arc::clone(&calendar),
            Arc::clone(&store),
            Arc::new(FailingOrphanLedger),
        )
        .with_now_provider(Arc::new(now));
        manager.initialize("user1").await.expect("initialize");
        let alarm = manager
            .schedule_alarm(fixed_time("2026-02-16T14:30:00Z"))
            .await
            .expect("schedule");
        calendar
            .set_permission(PermissionStatus::Denied)
            .expect("deny");

        let outcome = manager.delete_alarm(&alarm.id).await.expect("delete");

        let DeleteOutcome::Deleted { warnings, .. } = outcome else {
            panic!("expected deleted outcome");
        };
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("orphan not recorded: "));
        assert!(warnings[0].message.contains("ledger is read-only"));
        assert!(manager.alarms().is_empty());
        assert!(store.records().expect("records").is_empty());
    }

    #[derive(Debug, Default)]
    struct HangingCalendarGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CalendarGateway for HangingCalendarGateway {
        async fn ensure_permission(&self) -> Result<PermissionStatus, AlarmError> {
            Ok(PermissionStatus::Granted)
        }

        async fn create_alarm_event(&self, _time: DateTime<Utc>) -> Result<String, AlarmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn list_upcoming_events(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<CalendarAlarmEvent>, AlarmError> {
            Ok(Vec::new())
        }

        async fn delete_event(&self, _event_id: &str) -> Result<(), AlarmError> {
            std::future::pending().await
        }
    }

    fn short_timeout() -> LifecycleSettings {
        LifecycleSettings {
            call_timeout: std::time::Duration::from_millis(20),
            ..LifecycleSettings::default()
        }
    }

    #[tokio::test]
    async fn calendar_timeout_maps_to_calendar_unavailable() {
        let calendar = Arc::new(HangingCalendarGateway::default());
        let mut manager = AlarmLifecycleManager::new(
            Arc::clone(&calendar),
            Arc::new(InMemoryAlarmStore::default()),
            Arc::new(InMemoryOrphanLedger::default()),
        )
        .with_settings(short_timeout());
        manager.initialize("user1").await.expect("initialize");

        match manager.schedule_alarm(now()).await {
            Err(AlarmError::CalendarUnavailable(message)) => {
                assert!(message.contains("may still appear after the next reload"));
            }
            other => panic!("expected calendar unavailable, got {other:?}"),
        }
        assert_eq!(calendar.calls.load(Ordering::SeqCst), 1);
        assert!(manager.alarms().is_empty());
    }

    struct HangingStore;

    #[async_trait]
    impl AlarmStore for HangingStore {
        async fn create(&self, _record: NewAlarmRecord) -> Result<Alarm, AlarmError> {
            std::future::pending().await
        }

        async fn list_for_owner(&self, _owner_id: &str) -> Result<Vec<Alarm>, AlarmError> {
            Ok(Vec::new())
        }

        async fn set_is_on(&self, _alarm_id: &str, _is_on: bool) -> Result<(), AlarmError> {
            std::future::pending().await
        }

        async fn delete(&self, _alarm_id: &str) -> Result<(), AlarmError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn store_timeout_maps_to_store_unavailable_and_orphans_event() {
        let calendar = Arc::new(InMemoryCalendarGateway::default());
        let ledger = Arc::new(InMemoryOrphanLedger::default());
        let mut manager = AlarmLifecycleManager::new(
            Arc::clone(&calendar),
            Arc::new(HangingStore),
            Arc::clone(&ledger),
        )
        .with_settings(short_timeout());
        manager.initialize("user1").await.expect("initialize");

        let error = manager.schedule_alarm(now()).await.expect_err("store hangs");

        match error {
            AlarmError::OrphanedEvent { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected orphaned event, got {other:?}"),
        }
        assert_eq!(ledger.list_for_owner("user1").expect("list").len(), 1);
    }

    fn minute_offsets() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(0i64..(60 * 24 * 30), 0..8)
    }

    // Property: every fully successful schedule adds exactly one alarm at its time
    proptest! {
        #[test]
        fn scheduled_alarms_match_successful_calls(offsets in minute_offsets()) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let fixture = default_fixture();
                let mut manager = fixture.initialized().await;

                let mut expected = Vec::new();
                for offset in &offsets {
                    let time = now() + Duration::minutes(*offset);
                    manager.schedule_alarm(time).await.expect("schedule");
                    expected.push(time);
                }

                let times: Vec<_> = manager.alarms().iter().map(|alarm| alarm.time).collect();
                assert_eq!(times, expected);
                let ids: HashSet<_> = manager.alarms().iter().map(|alarm| alarm.id.clone()).collect();
                assert_eq!(ids.len(), offsets.len());
            });
        }
    }

    // Property: toggling the same alarm twice restores its original state
    proptest! {
        #[test]
        fn toggle_twice_is_identity(count in 1usize..5, pick in 0usize..5, persist in any::<bool>()) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let fixture = default_fixture();
                let mut manager = fixture.manager().with_settings(LifecycleSettings {
                    persist_toggles: persist,
                    ..LifecycleSettings::default()
                });
                manager.initialize("user1").await.expect("initialize");
                for hour in 0..count {
                    manager
                        .schedule_alarm(now() + Duration::hours(hour as i64 + 1))
                        .await
                        .expect("schedule");
                }
                let index = pick % count;
                let before = manager.snapshot();

                manager.toggle_alarm(index).await.expect("first toggle");
                manager.toggle_alarm(index).await.expect("second toggle");

                assert_eq!(manager.snapshot(), before);
            });
        }
    }

    // Property: deleting the same id twice ends in the same state as once
    proptest! {
        #[test]
        fn delete_is_idempotent(count in 1usize..5, pick in 0usize..5) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let fixture = default_fixture();
                let mut manager = fixture.initialized().await;
                for hour in 0..count {
                    manager
                        .schedule_alarm(now() + Duration::hours(hour as i64 + 1))
                        .await
                        .expect("schedule");
                }
                let target = manager.alarms()[pick % count].id.clone();

                manager.delete_alarm(&target).await.expect("first delete");
                let after_once = manager.snapshot();
                let second = manager.delete_alarm(&target).await.expect("second delete");

                assert_eq!(second, DeleteOutcome::NotFound);
                assert_eq!(manager.snapshot(), after_once);
                assert_eq!(after_once.len(), count - 1);
            });
        }
    }
}
