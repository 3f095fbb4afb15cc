use async_trait::async_trait;
use chrono::Utc;

use super::engine::{instant_bounds, Change, EntityAdapter, SyncEntity, SyncScope};
use super::SyncContext;
use crate::error::AppResult;
use crate::kintone::fields::ID_FIELD;
use crate::kintone::records::{RemoteReduce, CLASS_TIME, STUDENT_NAME};
use crate::kintone::{KintoneApp, RawRecord, RecordQuery};
use crate::ledger::models::{RecordTable, ReduceRecord, RowKey};
use crate::ledger::LedgerStore;

/// Reduce (attendance) records
pub struct ReduceAdapter {
    ctx: SyncContext,
}

impl ReduceAdapter {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EntityAdapter for ReduceAdapter {
    type Remote = RemoteReduce;
    type Local = ReduceRecord;

    fn entity(&self) -> SyncEntity {
        SyncEntity::ReduceRecords
    }

    fn app(&self) -> KintoneApp {
        KintoneApp::ReduceRecord
    }

    fn table(&self) -> RecordTable {
        RecordTable::ReduceRecords
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    fn remote_query(&self, scope: &SyncScope) -> RecordQuery {
        let mut query = RecordQuery::new();
        if let Some(identity) = &scope.identity {
            query = query.eq(STUDENT_NAME, identity);
        }
        if let Some(range) = &scope.range {
            let (start, end) = instant_bounds(range);
            query = query.ge(CLASS_TIME, start).le(CLASS_TIME, end);
        }
        query.order_by(ID_FIELD, true)
    }

    fn decode(&self, raw: &RawRecord) -> AppResult<RemoteReduce> {
        RemoteReduce::from_raw(raw)
    }

    fn ref_id(&self, remote: &RemoteReduce) -> i64 {
        remote.ref_id
    }

    async fn find_local(&self, remote: &RemoteReduce) -> AppResult<Option<ReduceRecord>> {
        self.ctx.store.find_reduce_record(remote.ref_id).await
    }

    async fn create(&self, remote: &RemoteReduce) -> AppResult<()> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let now = Utc::now();
        let record = ReduceRecord {
            record_id: self.ctx.ids.next_id()?,
            record_ref_id: Some(remote.ref_id),
            student_id: student.student_id,
            class_type: remote.class_type,
            class_level: remote.class_level,
            class_time: remote.class_time,
            teacher_name: remote.teacher_name.clone(),
            reduce_points: remote.reduce_points,
            is_attended: remote.attended,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.insert_reduce_record(&record).await
    }

    async fn update(&self, local: &ReduceRecord, remote: &RemoteReduce) -> AppResult<Change> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let desired = ReduceRecord {
            student_id: student.student_id,
            class_type: remote.class_type,
            class_level: remote.class_level,
            class_time: remote.class_time,
            teacher_name: remote.teacher_name.clone(),
            reduce_points: remote.reduce_points,
            is_attended: remote.attended,
            ..local.clone()
        };
        if desired == *local {
            return Ok(Change::Unchanged);
        }
        self.ctx.store.update_reduce_record(&desired).await?;
        Ok(Change::Changed)
    }

    async fn reset_tombstone(&self, local: &ReduceRecord) -> AppResult<u64> {
        self.ctx
            .store
            .reset_tombstone(self.table(), RowKey::RecordId(local.record_id))
            .await
    }
}
