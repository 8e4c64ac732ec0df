pub mod expiry;

pub use expiry::{ExpiryScheduler, ExpiryTicket};

use crate::config::RunConfig;
use crate::core::{
    Activity, Category, HistoryResult, Participant, ParticipantId, Result, RunError, RunId,
    RunRecord, name,
};
use crate::storage::{HistoryLog, NewHistoryRow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Run numbers cycle through `1..=MAX_RUN_NUMBER`.
pub const MAX_RUN_NUMBER: u16 = 1000;

/// Successful join: the updated run plus the free spots remaining.
#[derive(Debug, Clone, Serialize)]
pub struct JoinReceipt {
    pub run: RunRecord,
    pub spots_left: usize,
}

/// A run as listed to one viewer.
///
/// Name and secret are only filled in when the viewer hosts or attends the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    pub id: RunId,
    pub number: u16,
    pub host: String,
    pub category: Category,
    pub activity: Activity,
    pub attendees: Vec<String>,
    pub spots_left: usize,
    pub display_name: Option<String>,
    pub secret: Option<String>,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Run Table
// ============================================================================

/// Active runs keyed by host, with an `attendee -> host` index.
///
/// Both maps are only touched under the registry lock.
struct RunTable {
    by_host: HashMap<ParticipantId, RunRecord>,
    attendee_of: HashMap<ParticipantId, ParticipantId>,
    next_number: u16,
    closed: bool,
}

impl RunTable {
    fn new() -> Self {
        Self {
            by_host: HashMap::new(),
            attendee_of: HashMap::new(),
            next_number: 1,
            closed: false,
        }
    }

    fn take_number(&mut self) -> u16 {
        let number = self.next_number;
        self.next_number = if number >= MAX_RUN_NUMBER { 1 } else { number + 1 };
        number
    }

    fn is_participant(&self, id: ParticipantId) -> bool {
        self.by_host.contains_key(&id) || self.attendee_of.contains_key(&id)
    }

    fn host_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        if self.by_host.contains_key(&id) {
            Some(id)
        } else {
            self.attendee_of.get(&id).copied()
        }
    }

    fn host_mut(&mut self, host: ParticipantId) -> Result<&mut RunRecord> {
        self.by_host.get_mut(&host).ok_or(RunError::NotHost)
    }

    fn remove(&mut self, host: ParticipantId) -> Option<RunRecord> {
        let record = self.by_host.remove(&host)?;
        for attendee in &record.attendees {
            self.attendee_of.remove(&attendee.id);
        }
        Some(record)
    }

    /// Remove the run hosted by `host` only if it is still the run `id`.
    fn remove_if(&mut self, host: ParticipantId, id: RunId) -> Option<RunRecord> {
        match self.by_host.get(&host) {
            Some(record) if record.id == id => self.remove(host),
            _ => None,
        }
    }

    fn drop_attendee(&mut self, host: ParticipantId, id: ParticipantId) -> Option<RunRecord> {
        let record = self.by_host.get_mut(&host)?;
        let position = record.attendees.iter().position(|a| a.id == id)?;
        record.attendees.remove(position);
        self.attendee_of.remove(&id);
        Some(record.clone())
    }

    fn clear(&mut self) {
        self.by_host.clear();
        self.attendee_of.clear();
    }

    fn check_invariants(&self, capacity: usize) {
        if cfg!(debug_assertions) {
            let mut indexed = 0;
            for (host, record) in &self.by_host {
                debug_assert_eq!(*host, record.host.id, "run keyed by wrong host");
                debug_assert!(!record.has_attendee(*host), "host attends own run");
                debug_assert!(record.attendees.len() <= capacity, "run over capacity");
                for attendee in &record.attendees {
                    debug_assert_eq!(self.attendee_of.get(&attendee.id), Some(host));
                    debug_assert!(!self.by_host.contains_key(&attendee.id));
                    indexed += 1;
                }
            }
            debug_assert_eq!(indexed, self.attendee_of.len(), "stale attendee index");
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

struct RegistryInner {
    runs: Mutex<RunTable>,
    expiry: ExpiryScheduler,
    history: Arc<dyn HistoryLog>,
    capacity: usize,
}

impl RegistryInner {
    /// Timer path. Converges with `end` on remove-if-present.
    async fn expire(&self, ticket: ExpiryTicket, run_id: RunId) {
        let mut runs = self.runs.lock().await;
        if ticket.is_cancelled() {
            debug!(host = %ticket.host, "expiry superseded");
            return;
        }
        self.expiry.retire(&ticket);

        match runs.remove_if(ticket.host, run_id) {
            Some(record) => info!(
                host = %record.host.id,
                run = %record.id,
                name = %record.display_name,
                "run expired"
            ),
            None => debug!(host = %ticket.host, run = %run_id, "expired run already gone"),
        }
        runs.check_invariants(self.capacity);
    }
}

/// Authoritative set of open runs.
///
/// Cheap to clone; every clone shares the same table, timers and history.
/// Every operation, lookup and expiry takes the same table lock, and history
/// writes happen while it is held.
#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<RegistryInner>,
}

impl RunRegistry {
    /// Build a registry from `config`. The config is not validated here.
    pub fn new(config: &RunConfig, history: Arc<dyn HistoryLog>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                runs: Mutex::new(RunTable::new()),
                expiry: ExpiryScheduler::new(config.idle_timeout),
                history,
                capacity: config.capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of expiry timers currently armed
    pub fn armed_timers(&self) -> usize {
        self.inner.expiry.armed_count()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a run hosted by `host`.
    pub async fn start(
        &self,
        host: Participant,
        category: Category,
        activity: Activity,
        display_name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<RunRecord> {
        let mut runs = self.inner.runs.lock().await;
        if runs.closed {
            return Err(RunError::Closed);
        }
        if runs.is_participant(host.id) {
            return Err(RunError::HostAlreadyActive);
        }

        let record = RunRecord {
            id: RunId::new(),
            number: runs.take_number(),
            host,
            category,
            activity,
            display_name: display_name.into(),
            secret: secret.into(),
            attendees: Vec::new(),
            started_at: Utc::now(),
        };
        runs.by_host.insert(record.host.id, record.clone());
        self.arm_expiry(record.host.id, record.id);

        let appended = self.inner.history.append_run(history_row(&record)).await;
        log_history_failure("append_run", record.host.id, appended);

        info!(
            host = %record.host.id,
            run = %record.id,
            number = record.number,
            category = %category,
            activity = %activity,
            "run started"
        );
        runs.check_invariants(self.inner.capacity);
        Ok(record)
    }

    /// Close the run hosted by `host` and discard its timer.
    pub async fn end(&self, host: ParticipantId) -> Result<RunRecord> {
        let mut runs = self.inner.runs.lock().await;
        let record = runs.remove(host).ok_or(RunError::NotHost)?;
        self.inner.expiry.disarm(host);

        info!(host = %host, run = %record.id, "run ended");
        runs.check_invariants(self.inner.capacity);
        Ok(record)
    }

    /// Cancel every timer and forget every open run.
    ///
    /// The registry stays closed: later `start` calls fail with `Closed`.
    pub async fn shutdown(&self) {
        let mut runs = self.inner.runs.lock().await;
        runs.closed = true;
        self.inner.expiry.shutdown();
        let open = runs.by_host.len();
        runs.clear();
        info!(open, "registry shut down");
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Add `participant` to the run hosted by `host`.
    pub async fn join(&self, host: ParticipantId, participant: Participant) -> Result<JoinReceipt> {
        let mut runs = self.inner.runs.lock().await;
        if !runs.by_host.contains_key(&host) {
            return Err(RunError::NotFound);
        }
        self.admit(&mut runs, host, participant).await
    }

    /// Host-only join on behalf of `participant`.
    pub async fn add(&self, actor: ParticipantId, participant: Participant) -> Result<JoinReceipt> {
        let mut runs = self.inner.runs.lock().await;
        if !runs.by_host.contains_key(&actor) {
            return Err(RunError::NotHost);
        }
        if participant.id == actor {
            return Err(RunError::SelfTargetInvalid);
        }
        self.admit(&mut runs, actor, participant).await
    }

    /// Remove `participant` from the run hosted by `host`.
    pub async fn leave(&self, host: ParticipantId, participant: ParticipantId) -> Result<RunRecord> {
        let mut runs = self.inner.runs.lock().await;
        if !runs.by_host.contains_key(&host) {
            return Err(RunError::NotFound);
        }
        if participant == host {
            return Err(RunError::SelfTargetInvalid);
        }
        self.dismiss(&mut runs, host, participant, "left").await
    }

    /// Host-only removal of `participant` from the actor's run.
    pub async fn kick(&self, actor: ParticipantId, participant: ParticipantId) -> Result<RunRecord> {
        let mut runs = self.inner.runs.lock().await;
        if !runs.by_host.contains_key(&actor) {
            return Err(RunError::NotHost);
        }
        if participant == actor {
            return Err(RunError::SelfTargetInvalid);
        }
        self.dismiss(&mut runs, actor, participant, "kicked").await
    }

    async fn admit(
        &self,
        runs: &mut RunTable,
        host: ParticipantId,
        participant: Participant,
    ) -> Result<JoinReceipt> {
        if runs.is_participant(participant.id) {
            return Err(RunError::AlreadyInARun);
        }
        let capacity = self.inner.capacity;
        let record = runs.host_mut(host).map_err(|_| RunError::NotFound)?;
        if record.attendees.len() >= capacity {
            return Err(RunError::Full);
        }

        debug!(host = %host, participant = %participant.id, "participant joined");
        let participant_id = participant.id;
        record.attendees.push(participant);
        let record = record.clone();
        runs.attendee_of.insert(participant_id, host);

        self.sync_attendees(&record).await;
        runs.check_invariants(capacity);

        let spots_left = record.spots_left(capacity);
        Ok(JoinReceipt {
            run: record,
            spots_left,
        })
    }

    async fn dismiss(
        &self,
        runs: &mut RunTable,
        host: ParticipantId,
        participant: ParticipantId,
        how: &str,
    ) -> Result<RunRecord> {
        let record = runs
            .drop_attendee(host, participant)
            .ok_or(RunError::NotPresent)?;

        debug!(host = %host, participant = %participant, how, "participant removed");
        self.sync_attendees(&record).await;
        runs.check_invariants(self.inner.capacity);
        Ok(record)
    }

    // ========================================================================
    // Host Operations
    // ========================================================================

    /// Hand the run hosted by `old` to `new`.
    ///
    /// `new` may be an attendee of the same run, in which case it stops being
    /// one. A `new` host busy in any other run is rejected.
    pub async fn transfer_ownership(
        &self,
        old: ParticipantId,
        new: Participant,
    ) -> Result<RunRecord> {
        let mut runs = self.inner.runs.lock().await;
        if !runs.by_host.contains_key(&old) {
            return Err(RunError::NotHost);
        }
        if new.id == old {
            return Err(RunError::SelfTargetInvalid);
        }
        if runs.host_of(new.id).is_some_and(|h| h != old) {
            return Err(RunError::AlreadyInARun);
        }

        let mut record = runs.remove(old).ok_or(RunError::NotHost)?;
        record.attendees.retain(|a| a.id != new.id);
        record.host = new;
        let new_id = record.host.id;
        for attendee in &record.attendees {
            runs.attendee_of.insert(attendee.id, new_id);
        }
        runs.by_host.insert(new_id, record.clone());

        self.inner.expiry.disarm(old);
        self.arm_expiry(new_id, record.id);

        let rehosted = self
            .inner
            .history
            .update_most_recent_host(old, new_id, &record.host.name)
            .await;
        log_history_failure("update_most_recent_host", old, rehosted);
        self.sync_attendees(&record).await;

        info!(old = %old, new = %new_id, run = %record.id, "run ownership transferred");
        runs.check_invariants(self.inner.capacity);
        Ok(record)
    }

    /// Replace the display name and secret of the host's run.
    pub async fn rename(
        &self,
        host: ParticipantId,
        display_name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<RunRecord> {
        let mut runs = self.inner.runs.lock().await;
        let record = runs.host_mut(host)?;
        record.display_name = display_name.into();
        record.secret = secret.into();
        let record = record.clone();

        let renamed = self
            .inner
            .history
            .update_most_recent_name(host, &record.display_name)
            .await;
        log_history_failure("update_most_recent_name", host, renamed);

        debug!(host = %host, name = %record.display_name, "run renamed");
        Ok(record)
    }

    /// Move the host's run on to its next game.
    ///
    /// Derives the next name, restarts the clock and the idle timer, and
    /// records the new game as a fresh history row.
    pub async fn advance_name(&self, host: ParticipantId) -> Result<String> {
        let mut runs = self.inner.runs.lock().await;
        let record = runs.by_host.get_mut(&host).ok_or(RunError::NotFound)?;
        record.display_name = name::next(&record.display_name);
        record.started_at = Utc::now();
        let record = record.clone();

        self.reset_expiry_timer(host, record.id);

        let appended = self.inner.history.append_run(history_row(&record)).await;
        log_history_failure("append_run", host, appended);

        info!(host = %host, name = %record.display_name, "run advanced to next game");
        Ok(record.display_name)
    }

    /// Restart the idle timer of the host's run.
    pub async fn reset_expiry(&self, host: ParticipantId) -> Result<()> {
        let runs = self.inner.runs.lock().await;
        let record = runs.by_host.get(&host).ok_or(RunError::NotHost)?;
        self.reset_expiry_timer(host, record.id);
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// The run `participant` hosts or attends.
    pub async fn find_run_of(&self, participant: ParticipantId) -> Option<RunRecord> {
        let runs = self.inner.runs.lock().await;
        let host = runs.host_of(participant)?;
        runs.by_host.get(&host).cloned()
    }

    pub async fn is_participant(&self, participant: ParticipantId) -> bool {
        self.inner.runs.lock().await.is_participant(participant)
    }

    /// Host of the run `participant` is in, `participant` itself when hosting.
    pub async fn host_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        self.inner.runs.lock().await.host_of(participant)
    }

    /// Every open run, ordered by run number.
    pub async fn runs(&self) -> Vec<RunRecord> {
        let runs = self.inner.runs.lock().await;
        let mut all: Vec<RunRecord> = runs.by_host.values().cloned().collect();
        all.sort_by_key(|r| r.number);
        all
    }

    /// Listing of every open run as seen by `viewer`.
    ///
    /// An anonymous listing (`None`) never shows names or secrets.
    pub async fn view_for(&self, viewer: Option<ParticipantId>) -> Vec<RunView> {
        let capacity = self.inner.capacity;
        self.runs()
            .await
            .into_iter()
            .map(|record| {
                let member = viewer.is_some_and(|v| record.is_member(v));
                RunView {
                    id: record.id,
                    number: record.number,
                    host: record.host.name.clone(),
                    category: record.category,
                    activity: record.activity,
                    attendees: record.attendee_names(),
                    spots_left: record.spots_left(capacity),
                    display_name: member.then(|| record.display_name.clone()),
                    secret: member.then(|| record.secret.clone()),
                    started_at: record.started_at,
                }
            })
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Arm the idle timer of `host` for run `run_id`. Caller holds the table lock.
    fn arm_expiry(&self, host: ParticipantId, run_id: RunId) {
        let registry = Arc::downgrade(&self.inner);
        self.inner
            .expiry
            .arm(host, move |ticket| expire_weak(registry, ticket, run_id));
    }

    /// Replace the idle timer of `host` with a fresh one. Caller holds the table lock.
    fn reset_expiry_timer(&self, host: ParticipantId, run_id: RunId) {
        let registry = Arc::downgrade(&self.inner);
        self.inner
            .expiry
            .reset(host, move |ticket| expire_weak(registry, ticket, run_id));
    }

    async fn sync_attendees(&self, record: &RunRecord) {
        let updated = self
            .inner
            .history
            .update_most_recent_attendees(record.host.id, &record.attendee_names())
            .await;
        log_history_failure("update_most_recent_attendees", record.host.id, updated);
    }
}

/// Timer callback; does nothing once the registry is gone.
async fn expire_weak(registry: Weak<RegistryInner>, ticket: ExpiryTicket, run_id: RunId) {
    if let Some(inner) = registry.upgrade() {
        inner.expire(ticket, run_id).await;
    }
}

fn history_row(record: &RunRecord) -> NewHistoryRow {
    NewHistoryRow {
        host_id: record.host.id,
        host_name: record.host.name.clone(),
        category: record.category,
        activity: record.activity,
        name: record.display_name.clone(),
        attendees: record.attendee_names(),
        started_at: record.started_at,
    }
}

fn log_history_failure<T>(operation: &str, host: ParticipantId, result: HistoryResult<T>) {
    if let Err(err) = result {
        warn!(operation, host = %host, error = %err, "history write failed");
    }
}
