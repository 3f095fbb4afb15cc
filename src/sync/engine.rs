// Generic diff-and-apply engine.
//
// One Reconciler per entity: fetch the scoped remote set, apply every record
// on a bounded pool (create, update, or revive a tombstoned row), then
// soft-delete local rows in the same scope that the remote set no longer has.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::pool::{TaskFailure, WorkerPool};
use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::kintone::fields::DATE_FORMAT;
use crate::kintone::{fetch_all, KintoneApi, KintoneApp, RawRecord, RecordQuery};
use crate::ledger::models::{LocalScope, RecordTable, RowKey, StudentCond, TimeRange, Tombstoned};
use crate::ledger::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEntity {
    Students,
    PointCards,
    DepositRecords,
    ReduceRecords,
    Schedules,
    SettleRecords,
}

impl SyncEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntity::Students => "students",
            SyncEntity::PointCards => "point-cards",
            SyncEntity::DepositRecords => "deposit-records",
            SyncEntity::ReduceRecords => "reduce-records",
            SyncEntity::Schedules => "schedules",
            SyncEntity::SettleRecords => "settle-records",
        }
    }

    /// Remote app the entity mirrors
    pub fn app(&self) -> KintoneApp {
        match self {
            SyncEntity::Students => KintoneApp::Student,
            SyncEntity::PointCards => KintoneApp::PointCard,
            SyncEntity::DepositRecords => KintoneApp::DepositRecord,
            SyncEntity::ReduceRecords => KintoneApp::ReduceRecord,
            SyncEntity::Schedules => KintoneApp::Schedule,
            SyncEntity::SettleRecords => KintoneApp::SemesterSettleRecord,
        }
    }
}

impl fmt::Display for SyncEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncEntity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "students" => Ok(SyncEntity::Students),
            "point-cards" => Ok(SyncEntity::PointCards),
            "deposit-records" => Ok(SyncEntity::DepositRecords),
            "reduce-records" => Ok(SyncEntity::ReduceRecords),
            "schedules" => Ok(SyncEntity::Schedules),
            "settle-records" => Ok(SyncEntity::SettleRecords),
            other => Err(AppError::BadRequest(format!("unknown sync entity: {}", other))),
        }
    }
}

/// Which slice of the data a batch sync covers, on both sides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncScope {
    pub identity: Option<StudentIdentity>,
    pub range: Option<TimeRange>,
}

impl SyncScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn student(identity: StudentIdentity) -> Self {
        Self {
            identity: Some(identity),
            range: None,
        }
    }

    pub fn window(range: TimeRange) -> Self {
        Self {
            identity: None,
            range: Some(range),
        }
    }
}

/// Range bounds as remote date strings
pub(crate) fn date_bounds(range: &TimeRange) -> (String, String) {
    (
        range.start.date_naive().format(DATE_FORMAT).to_string(),
        range.end.date_naive().format(DATE_FORMAT).to_string(),
    )
}

/// Range bounds as remote datetime strings
pub(crate) fn instant_bounds(range: &TimeRange) -> (String, String) {
    let fmt = |at: DateTime<Utc>| at.to_rfc3339_opts(SecondsFormat::Secs, true);
    (
        fmt(range.start.with_timezone(&Utc)),
        fmt(range.end.with_timezone(&Utc)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    /// updated and brought back from a tombstone
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Changed,
    Unchanged,
}

impl Change {
    pub fn from_dirty(dirty: bool) -> Self {
        if dirty {
            Change::Changed
        } else {
            Change::Unchanged
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub record_ref_id: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub entity: SyncEntity,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub restored: usize,
    pub deleted: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn new(entity: SyncEntity) -> Self {
        Self {
            entity,
            fetched: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            restored: 0,
            deleted: 0,
            failures: Vec::new(),
        }
    }

    fn count(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
            ApplyOutcome::Restored => self.restored += 1,
        }
    }

    fn fail(&mut self, record_ref_id: Option<i64>, reason: impl fmt::Display) {
        self.failures.push(SyncFailure {
            record_ref_id,
            reason: reason.to_string(),
        });
    }

    pub fn writes(&self) -> usize {
        self.created + self.updated + self.restored + self.deleted
    }

    fn log(&self) {
        if !self.failures.is_empty() {
            warn!(
                entity = %self.entity,
                failed = self.failures.len(),
                failures = ?self.failures,
                "sync finished with failures"
            );
        }
        info!(
            entity = %self.entity,
            fetched = self.fetched,
            created = self.created,
            updated = self.updated,
            unchanged = self.unchanged,
            restored = self.restored,
            deleted = self.deleted,
            "sync finished"
        );
    }
}

/// Per-entity glue between the remote app and its local table
#[async_trait]
pub trait EntityAdapter: Send + Sync + 'static {
    type Remote: Send + Sync + 'static;
    type Local: Tombstoned + Send + Sync + 'static;

    fn entity(&self) -> SyncEntity;

    fn app(&self) -> KintoneApp;

    fn table(&self) -> RecordTable;

    fn store(&self) -> &dyn LedgerStore;

    fn remote_query(&self, scope: &SyncScope) -> RecordQuery;

    fn decode(&self, raw: &RawRecord) -> AppResult<Self::Remote>;

    fn ref_id(&self, remote: &Self::Remote) -> i64;

    async fn find_local(&self, remote: &Self::Remote) -> AppResult<Option<Self::Local>>;

    async fn create(&self, remote: &Self::Remote) -> AppResult<()>;

    async fn update(&self, local: &Self::Local, remote: &Self::Remote) -> AppResult<Change>;

    async fn reset_tombstone(&self, local: &Self::Local) -> AppResult<u64>;

    async fn list_local_keys(&self, scope: &LocalScope) -> AppResult<Vec<i64>> {
        self.store().list_ref_ids(self.table(), scope).await
    }

    async fn soft_delete(&self, ref_id: i64, _scope: &LocalScope) -> AppResult<u64> {
        self.store().soft_delete(self.table(), RowKey::RefId(ref_id)).await
    }

    /// Runs once after the deletion sweep of a batch sync
    async fn after_sweep(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Update the local twin of `remote` or create it
pub async fn apply<A: EntityAdapter>(adapter: &A, remote: &A::Remote) -> AppResult<ApplyOutcome> {
    match adapter.find_local(remote).await? {
        Some(local) => {
            let change = adapter.update(&local, remote).await?;
            // the remote still has the record, so a tombstone here is stale
            if local.is_tombstoned() && adapter.reset_tombstone(&local).await? > 0 {
                debug!(entity = %adapter.entity(), record_ref_id = adapter.ref_id(remote), "tombstone reset");
                return Ok(ApplyOutcome::Restored);
            }
            Ok(match change {
                Change::Changed => ApplyOutcome::Updated,
                Change::Unchanged => ApplyOutcome::Unchanged,
            })
        }
        None => {
            adapter.create(remote).await?;
            Ok(ApplyOutcome::Created)
        }
    }
}

/// The record names a student that cannot be matched locally
fn is_unresolved(e: &AppError) -> bool {
    matches!(e, AppError::Identity(_) | AppError::NotFound(_))
}

pub struct Reconciler<A: EntityAdapter> {
    adapter: Arc<A>,
    kintone: Arc<dyn KintoneApi>,
    pool: WorkerPool,
    page_limit: usize,
}

impl<A: EntityAdapter> Reconciler<A> {
    pub fn new(adapter: A, kintone: Arc<dyn KintoneApi>, pool: WorkerPool, page_limit: usize) -> Self {
        Self {
            adapter: Arc::new(adapter),
            kintone,
            pool,
            page_limit,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub async fn batch_sync(&self, scope: &SyncScope) -> AppResult<SyncReport> {
        let query = self.adapter.remote_query(scope);
        debug!(entity = %self.adapter.entity(), query = %query, "batch sync started");
        let (records, _total) =
            fetch_all(self.kintone.as_ref(), self.adapter.app(), &query, self.page_limit).await?;
        self.reconcile(records, scope).await
    }

    pub async fn reconcile(&self, records: Vec<Value>, scope: &SyncScope) -> AppResult<SyncReport> {
        let mut report = SyncReport::new(self.adapter.entity());
        report.fetched = records.len();

        let mut seen = HashSet::new();
        let mut decoded = Vec::with_capacity(records.len());
        for value in records {
            let raw = match RawRecord::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    report.fail(None, e);
                    continue;
                }
            };
            match self.adapter.decode(&raw) {
                Ok(remote) => decoded.push(remote),
                Err(e) if is_unresolved(&e) => report.fail(raw.id().ok(), e),
                Err(e) => {
                    // still exists remotely, keep the local row
                    let ref_id = raw.id().ok();
                    seen.extend(ref_id);
                    report.fail(ref_id, e);
                }
            }
        }

        let keys: Vec<i64> = decoded.iter().map(|r| self.adapter.ref_id(r)).collect();
        let adapter = self.adapter.clone();
        let results = self
            .pool
            .run_all(decoded, move |remote| {
                let adapter = adapter.clone();
                async move { apply(adapter.as_ref(), &remote).await }
            })
            .await;

        for (ref_id, result) in keys.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    seen.insert(ref_id);
                    report.count(outcome);
                }
                Err(TaskFailure::Error(e)) if is_unresolved(&e) => report.fail(Some(ref_id), e),
                Err(failure) => {
                    seen.insert(ref_id);
                    report.fail(Some(ref_id), failure);
                }
            }
        }

        match self.local_scope(scope).await? {
            Some(local_scope) => {
                let local_keys = self.adapter.list_local_keys(&local_scope).await?;
                for ref_id in local_keys.into_iter().filter(|id| !seen.contains(id)) {
                    match self.adapter.soft_delete(ref_id, &local_scope).await {
                        Ok(0) => {}
                        Ok(_) => {
                            debug!(entity = %self.adapter.entity(), record_ref_id = ref_id, "soft deleted");
                            report.deleted += 1;
                        }
                        Err(e) => report.fail(Some(ref_id), e),
                    }
                }
            }
            None => debug!(
                entity = %self.adapter.entity(),
                "scoped student has no local row, deletion sweep skipped"
            ),
        }

        if let Err(e) = self.adapter.after_sweep().await {
            report.fail(None, e);
        }

        report.log();
        Ok(report)
    }

    /// Apply a single record without the deletion sweep
    pub async fn apply_one(&self, value: Value) -> AppResult<ApplyOutcome> {
        let raw = RawRecord::from_value(value)?;
        let remote = self.adapter.decode(&raw)?;
        apply(self.adapter.as_ref(), &remote).await
    }

    pub async fn delete_one(&self, ref_id: i64) -> AppResult<u64> {
        self.adapter.soft_delete(ref_id, &LocalScope::default()).await
    }

    async fn local_scope(&self, scope: &SyncScope) -> AppResult<Option<LocalScope>> {
        let mut local = LocalScope {
            range: scope.range,
            ..Default::default()
        };

        if let Some(identity) = &scope.identity {
            if self.adapter.table() == RecordTable::Students {
                local.identity = Some(identity.clone());
            } else {
                match self
                    .adapter
                    .store()
                    .find_student(&StudentCond::active_identity(identity))
                    .await?
                {
                    Some(student) => local.student_id = Some(student.student_id),
                    None => return Ok(None),
                }
            }
        }

        Ok(Some(local))
    }
}
