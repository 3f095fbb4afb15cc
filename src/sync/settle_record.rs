use async_trait::async_trait;
use chrono::Utc;

use super::engine::{date_bounds, Change, EntityAdapter, SyncEntity, SyncScope};
use super::SyncContext;
use crate::error::{AppError, AppResult};
use crate::kintone::fields::ID_FIELD;
use crate::kintone::records::{RemoteSettleRecord, END_TIME, START_TIME, STUDENT_NAME};
use crate::kintone::{KintoneApp, RawRecord, RecordQuery};
use crate::ledger::models::{RecordTable, RowKey, SemesterSettleRecord, TimeRange};
use crate::ledger::LedgerStore;

/// Semester settle records, written remotely by the settlement run
pub struct SettleRecordAdapter {
    ctx: SyncContext,
}

impl SettleRecordAdapter {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    fn period(&self, remote: &RemoteSettleRecord) -> AppResult<TimeRange> {
        TimeRange::from_dates(remote.start_date, remote.end_date, self.ctx.offset).ok_or_else(|| {
            AppError::InvalidRecord {
                record_ref_id: remote.ref_id.to_string(),
                reason: "settle period is not representable".to_string(),
            }
        })
    }
}

#[async_trait]
impl EntityAdapter for SettleRecordAdapter {
    type Remote = RemoteSettleRecord;
    type Local = SemesterSettleRecord;

    fn entity(&self) -> SyncEntity {
        SyncEntity::SettleRecords
    }

    fn app(&self) -> KintoneApp {
        KintoneApp::SemesterSettleRecord
    }

    fn table(&self) -> RecordTable {
        RecordTable::SemesterSettleRecords
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
            let (start, end) = date_bounds(range);
            query = query.ge(START_TIME, start).le(END_TIME, end);
        }
        query.order_by(ID_FIELD, true)
    }

    fn decode(&self, raw: &RawRecord) -> AppResult<RemoteSettleRecord> {
        RemoteSettleRecord::from_raw(raw)
    }

    fn ref_id(&self, remote: &RemoteSettleRecord) -> i64 {
        remote.ref_id
    }

    async fn find_local(&self, remote: &RemoteSettleRecord) -> AppResult<Option<SemesterSettleRecord>> {
        self.ctx.store.find_settle_record(remote.ref_id).await
    }

    async fn create(&self, remote: &RemoteSettleRecord) -> AppResult<()> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let period = self.period(remote)?;
        let now = Utc::now();
        let record = SemesterSettleRecord {
            record_id: self.ctx.ids.next_id()?,
            record_ref_id: Some(remote.ref_id),
            student_id: student.student_id,
            start_time: period.start.with_timezone(&Utc),
            end_time: period.end.with_timezone(&Utc),
            clear_points: remote.clear_points,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.insert_settle_record(&record).await
    }

    async fn update(&self, local: &SemesterSettleRecord, remote: &RemoteSettleRecord) -> AppResult<Change> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let period = self.period(remote)?;
        let desired = SemesterSettleRecord {
            student_id: student.student_id,
            start_time: period.start.with_timezone(&Utc),
            end_time: period.end.with_timezone(&Utc),
            clear_points: remote.clear_points,
            ..local.clone()
        };
        if desired == *local {
            return Ok(Change::Unchanged);
        }
        self.ctx.store.update_settle_record(&desired).await?;
        Ok(Change::Changed)
    }

    async fn reset_tombstone(&self, local: &SemesterSettleRecord) -> AppResult<u64> {
        self.ctx
            .store
            .reset_tombstone(self.table(), RowKey::RecordId(local.record_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kintone::fake::FakeKintone;
    use crate::ledger::memory::MemoryLedger;
    use crate::sync::engine::apply;
    use crate::sync::test_support::{context, seed_student, settle_json};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_dates_map_to_local_day_bounds() {
        let ledger = MemoryLedger::new();
        let fake = FakeKintone::new();
        seed_student(&ledger, 1, "Amy", "0911").await;
        let adapter = SettleRecordAdapter::new(context(&ledger, &fake));

        let remote = adapter
            .decode(&RawRecord::from_value(settle_json(40, "Amy/0911", "2025-03-01", "2025-08-31", 6.0)).unwrap())
            .unwrap();
        apply(&adapter, &remote).await.unwrap();

        let state = ledger.snapshot().await;
        let record = state.settle_records.values().next().unwrap();
        assert_eq!(record.start_time, Utc.with_ymd_and_hms(2025, 2, 28, 16, 0, 0).unwrap());
        assert_eq!(record.end_time, Utc.with_ymd_and_hms(2025, 8, 31, 15, 59, 59).unwrap());
        assert_eq!(record.clear_points, 6.0);
    }
}
