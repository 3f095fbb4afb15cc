use async_trait::async_trait;
use chrono::Utc;

use super::engine::{date_bounds, Change, EntityAdapter, SyncEntity, SyncScope};
use super::SyncContext;
use crate::error::AppResult;
use crate::kintone::fields::ID_FIELD;
use crate::kintone::records::{RemoteDeposit, CHARGING_DATE, STUDENT_NAME};
use crate::kintone::{KintoneApp, RawRecord, RecordQuery};
use crate::ledger::models::{DepositRecord, RecordTable, RowKey};
use crate::ledger::LedgerStore;

/// Deposit (top-up) records
pub struct DepositAdapter {
    ctx: SyncContext,
}

impl DepositAdapter {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    fn apply_remote(&self, base: DepositRecord, remote: &RemoteDeposit, student_id: i64) -> DepositRecord {
        DepositRecord {
            record_ref_id: Some(remote.ref_id),
            student_id,
            charging_date: remote.charging_date,
            charging_method: remote.charging_method.clone(),
            tax_id: remote.tax_id.clone(),
            account_last_five_yards: remote.account_last_five_yards.clone(),
            charging_amount: remote.charging_amount,
            actual_charging_amount: remote.actual_charging_amount,
            teacher_name: remote.teacher_name.clone(),
            deposited_points: remote.deposited_points,
            hit_status: remote.charged,
            ..base
        }
    }
}

#[async_trait]
impl EntityAdapter for DepositAdapter {
    type Remote = RemoteDeposit;
    type Local = DepositRecord;

    fn entity(&self) -> SyncEntity {
        SyncEntity::DepositRecords
    }

    fn app(&self) -> KintoneApp {
        KintoneApp::DepositRecord
    }

    fn table(&self) -> RecordTable {
        RecordTable::DepositRecords
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
            query = query.ge(CHARGING_DATE, start).le(CHARGING_DATE, end);
        }
        query.order_by(ID_FIELD, true)
    }

    fn decode(&self, raw: &RawRecord) -> AppResult<RemoteDeposit> {
        RemoteDeposit::from_raw(raw)
    }

    fn ref_id(&self, remote: &RemoteDeposit) -> i64 {
        remote.ref_id
    }

    async fn find_local(&self, remote: &RemoteDeposit) -> AppResult<Option<DepositRecord>> {
        self.ctx.store.find_deposit_record(remote.ref_id).await
    }

    async fn create(&self, remote: &RemoteDeposit) -> AppResult<()> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let now = Utc::now();
        let blank = DepositRecord {
            record_id: self.ctx.ids.next_id()?,
            record_ref_id: None,
            student_id: student.student_id,
            charging_date: None,
            charging_method: Vec::new(),
            tax_id: String::new(),
            account_last_five_yards: String::new(),
            charging_amount: 0,
            actual_charging_amount: 0,
            teacher_name: String::new(),
            deposited_points: 0,
            hit_status: false,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let record = self.apply_remote(blank, remote, student.student_id);
        self.ctx.store.insert_deposit_record(&record).await
    }

    async fn update(&self, local: &DepositRecord, remote: &RemoteDeposit) -> AppResult<Change> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let desired = self.apply_remote(local.clone(), remote, student.student_id);
        if desired == *local {
            return Ok(Change::Unchanged);
        }
        self.ctx.store.update_deposit_record(&desired).await?;
        Ok(Change::Changed)
    }

    async fn reset_tombstone(&self, local: &DepositRecord) -> AppResult<u64> {
        self.ctx
            .store
            .reset_tombstone(self.table(), RowKey::RecordId(local.record_id))
            .await
    }
}
