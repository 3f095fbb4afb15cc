// Schedules fan out: one remote record holds an attendance subtable and every
// attendee gets its own local row under the shared schedule reference id.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::engine::{instant_bounds, Change, EntityAdapter, SyncEntity, SyncScope};
use super::SyncContext;
use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::kintone::fields::ID_FIELD;
use crate::kintone::records::{RemoteSchedule, CLASS_TIME, STUDENT_NAME};
use crate::kintone::{KintoneApp, RawRecord, RecordQuery};
use crate::ledger::models::{LocalScope, RecordTable, RowKey, Schedule, ScheduleView, Tombstoned};
use crate::ledger::LedgerStore;

/// Every local row of one remote schedule
#[derive(Debug, Clone)]
pub struct ScheduleGroup {
    pub rows: Vec<ScheduleView>,
}

// Per-row tombstones are handled while diffing the attendance table, so the
// group itself never asks the engine for a reset.
impl Tombstoned for ScheduleGroup {
    fn is_deleted(&self) -> bool {
        false
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

pub struct ScheduleAdapter {
    ctx: SyncContext,
}

impl ScheduleAdapter {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Bring the local rows of `remote` in line with its attendance table
    async fn sync_rows(&self, remote: &RemoteSchedule, existing: &[ScheduleView]) -> AppResult<Change> {
        let store = &self.ctx.store;
        let mut dirty = false;
        let mut kept: HashSet<i64> = HashSet::new();
        let mut failed = Vec::new();

        for attendee in &remote.attendance {
            let student = match self.ctx.resolve_student(&attendee.identity).await {
                Ok(student) => student,
                Err(e) => {
                    failed.push(format!("{}: {}", attendee.identity, e));
                    continue;
                }
            };
            kept.insert(student.student_id);

            let current = existing.iter().find(|view| view.schedule.student_id == student.student_id);
            match current {
                Some(view) => {
                    let desired = Schedule {
                        record_ref_id: attendee.record_ref_id,
                        teacher_name: remote.teacher_name.clone(),
                        class_type: remote.class_type,
                        class_level: remote.class_level,
                        class_time: remote.class_time,
                        ..view.schedule.clone()
                    };
                    if desired != view.schedule {
                        store.update_schedule(&desired).await?;
                        dirty = true;
                    }
                    if view.is_tombstoned() {
                        store
                            .reset_tombstone(RecordTable::Schedules, RowKey::RecordId(view.schedule.schedule_id))
                            .await?;
                        dirty = true;
                    }
                }
                None => {
                    let now = Utc::now();
                    store
                        .insert_schedule(&Schedule {
                            schedule_id: self.ctx.ids.next_id()?,
                            schedule_ref_id: remote.ref_id,
                            record_ref_id: attendee.record_ref_id,
                            student_id: student.student_id,
                            teacher_name: remote.teacher_name.clone(),
                            class_type: remote.class_type,
                            class_level: remote.class_level,
                            class_time: remote.class_time,
                            is_deleted: false,
                            deleted_at: None,
                            created_at: now,
                            updated_at: now,
                        })
                        .await?;
                    dirty = true;
                }
            }
        }

        // attendees dropped from the table; unresolved names keep their rows
        let listed: HashSet<&StudentIdentity> = remote.attendance.iter().map(|a| &a.identity).collect();
        for view in existing {
            if view.schedule.is_deleted
                || kept.contains(&view.schedule.student_id)
                || listed.contains(&view.identity())
            {
                continue;
            }
            store
                .soft_delete(RecordTable::Schedules, RowKey::RecordId(view.schedule.schedule_id))
                .await?;
            dirty = true;
        }

        if !failed.is_empty() {
            warn!(
                schedule_ref_id = remote.ref_id,
                failed = ?failed,
                "attendance rows could not be matched to students"
            );
            return Err(AppError::InvalidRecord {
                record_ref_id: remote.ref_id.to_string(),
                reason: format!("unresolved attendance: {}", failed.join("; ")),
            });
        }

        Ok(Change::from_dirty(dirty))
    }
}

#[async_trait]
impl EntityAdapter for ScheduleAdapter {
    type Remote = RemoteSchedule;
    type Local = ScheduleGroup;

    fn entity(&self) -> SyncEntity {
        SyncEntity::Schedules
    }

    fn app(&self) -> KintoneApp {
        KintoneApp::Schedule
    }

    fn table(&self) -> RecordTable {
        RecordTable::Schedules
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    fn remote_query(&self, scope: &SyncScope) -> RecordQuery {
        let mut query = RecordQuery::new();
        if let Some(identity) = &scope.identity {
            // subtable fields only support `in`
            query = query.in_list(STUDENT_NAME, [identity.compose()]);
        }
        if let Some(range) = &scope.range {
            let (start, end) = instant_bounds(range);
            query = query.ge(CLASS_TIME, start).le(CLASS_TIME, end);
        }
        query.order_by(ID_FIELD, true)
    }

    fn decode(&self, raw: &RawRecord) -> AppResult<RemoteSchedule> {
        RemoteSchedule::from_raw(raw)
    }

    fn ref_id(&self, remote: &RemoteSchedule) -> i64 {
        remote.ref_id
    }

    async fn find_local(&self, remote: &RemoteSchedule) -> AppResult<Option<ScheduleGroup>> {
        let rows = self.ctx.store.list_schedules_by_ref(remote.ref_id).await?;
        Ok((!rows.is_empty()).then_some(ScheduleGroup { rows }))
    }

    async fn create(&self, remote: &RemoteSchedule) -> AppResult<()> {
        self.sync_rows(remote, &[]).await.map(|_| ())
    }

    async fn update(&self, local: &ScheduleGroup, remote: &RemoteSchedule) -> AppResult<Change> {
        self.sync_rows(remote, &local.rows).await
    }

    async fn reset_tombstone(&self, _local: &ScheduleGroup) -> AppResult<u64> {
        Ok(0)
    }

    async fn soft_delete(&self, ref_id: i64, scope: &LocalScope) -> AppResult<u64> {
        let Some(student_id) = scope.student_id else {
            return self
                .ctx
                .store
                .soft_delete(RecordTable::Schedules, RowKey::RefId(ref_id))
                .await;
        };

        // a student-scoped sweep only drops that student's row
        let mut touched = 0;
        for view in self.ctx.store.list_schedules_by_ref(ref_id).await? {
            if view.schedule.student_id == student_id {
                touched += self
                    .ctx
                    .store
                    .soft_delete(RecordTable::Schedules, RowKey::RecordId(view.schedule.schedule_id))
                    .await?;
            }
        }
        Ok(touched)
    }
}
