use std::collections::HashMap;

use async_trait::async_trait;

use super::models::*;
use crate::error::AppResult;

/// Local store seen by the sync engine and the settlement engine.
///
/// Lookups return `Ok(None)` for "no such row" so callers can tell it apart
/// from I/O failures. Generic tombstone operations take a `RecordTable` and a
/// `RowKey` instead of one method per table.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ========== USERS ==========

    async fn find_user_by_account(&self, account: &str) -> AppResult<Option<User>>;

    async fn insert_user(&self, user: &User) -> AppResult<()>;

    async fn set_user_status(&self, user_id: i64, status: UserStatus) -> AppResult<()>;

    /// Deactivates every active user left without a live student and returns them
    async fn deactivate_users_without_active_student(&self) -> AppResult<Vec<User>>;

    // ========== STUDENTS ==========

    async fn find_student(&self, cond: &StudentCond) -> AppResult<Option<Student>>;

    async fn list_students(&self, cond: &StudentCond) -> AppResult<Vec<Student>>;

    async fn insert_student(&self, student: &Student) -> AppResult<()>;

    async fn update_student(&self, student: &Student) -> AppResult<()>;

    // ========== POINT CARDS ==========

    async fn find_point_card(&self, cond: &PointCardCond) -> AppResult<Option<PointCard>>;

    async fn insert_point_card(&self, card: &PointCard) -> AppResult<()>;

    async fn update_point_card(&self, card: &PointCard) -> AppResult<()>;

    // ========== DEPOSIT RECORDS ==========

    async fn find_deposit_record(&self, record_ref_id: i64) -> AppResult<Option<DepositRecord>>;

    async fn insert_deposit_record(&self, record: &DepositRecord) -> AppResult<()>;

    async fn update_deposit_record(&self, record: &DepositRecord) -> AppResult<()>;

    // ========== REDUCE RECORDS ==========

    async fn find_reduce_record(&self, record_ref_id: i64) -> AppResult<Option<ReduceRecord>>;

    async fn insert_reduce_record(&self, record: &ReduceRecord) -> AppResult<()>;

    async fn update_reduce_record(&self, record: &ReduceRecord) -> AppResult<()>;

    // ========== SCHEDULES ==========

    /// All rows of one remote schedule, tombstoned ones included
    async fn list_schedules_by_ref(&self, schedule_ref_id: i64) -> AppResult<Vec<ScheduleView>>;

    async fn insert_schedule(&self, schedule: &Schedule) -> AppResult<()>;

    async fn update_schedule(&self, schedule: &Schedule) -> AppResult<()>;

    // ========== SEMESTER SETTLE RECORDS ==========

    async fn find_settle_record(&self, record_ref_id: i64) -> AppResult<Option<SemesterSettleRecord>>;

    async fn insert_settle_record(&self, record: &SemesterSettleRecord) -> AppResult<()>;

    async fn update_settle_record(&self, record: &SemesterSettleRecord) -> AppResult<()>;

    // ========== TOMBSTONES ==========

    /// Reference ids of live rows inside `scope`
    async fn list_ref_ids(&self, table: RecordTable, scope: &LocalScope) -> AppResult<Vec<i64>>;

    /// Marks matching live rows deleted, returns the number of rows touched
    async fn soft_delete(&self, table: RecordTable, key: RowKey) -> AppResult<u64>;

    /// Clears the tombstone on matching rows, returns the number of rows touched
    async fn reset_tombstone(&self, table: RecordTable, key: RowKey) -> AppResult<u64>;

    // ========== SETTLEMENT ==========

    async fn begin_settlement(&self) -> AppResult<Box<dyn SettlementTx>>;
}

/// The settlement body's view of the store, bound to one database transaction.
/// Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait SettlementTx: Send {
    async fn settleable_students(&mut self) -> AppResult<Vec<Student>>;

    /// `sum(deposited_points)` per student over live deposits charged inside `range`
    async fn total_deposited_points(
        &mut self,
        student_ids: &[i64],
        range: &TimeRange,
    ) -> AppResult<HashMap<i64, f64>>;

    /// `sum(reduce_points)` per student over live reduce records inside `range`
    async fn total_reduce_points(
        &mut self,
        student_ids: &[i64],
        range: &TimeRange,
    ) -> AppResult<HashMap<i64, f64>>;

    async fn point_cards_for(&mut self, student_ids: &[i64]) -> AppResult<Vec<PointCard>>;

    async fn debit_point_card(&mut self, record_id: i64, points: f64) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
