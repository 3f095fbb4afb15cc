// In-memory LedgerStore for tests.
//
// Mirrors the Postgres repository's semantics closely enough for the sync and
// settlement engines: tombstoned rows stay in place, updates never touch the
// tombstone, and a settlement transaction only becomes visible on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::*;
use super::store::{LedgerStore, SettlementTx};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub users: BTreeMap<i64, User>,
    pub students: BTreeMap<i64, Student>,
    pub point_cards: BTreeMap<i64, PointCard>,
    pub deposits: BTreeMap<i64, DepositRecord>,
    pub reduces: BTreeMap<i64, ReduceRecord>,
    pub schedules: BTreeMap<i64, Schedule>,
    pub settle_records: BTreeMap<i64, SemesterSettleRecord>,
}

/// Uniform view over every synced row type
trait SyncedRow: Send + Sync {
    fn row_id(&self) -> i64;
    fn ref_id(&self) -> Option<i64>;
    fn owner(&self) -> i64;
    fn deleted(&self) -> bool;
    fn in_range(&self, range: &TimeRange) -> bool;
    fn tombstone_mut(&mut self) -> (&mut bool, &mut Option<DateTime<Utc>>);
    fn touch(&mut self, at: DateTime<Utc>);
}

macro_rules! synced_row {
    ($ty:ty, $id:ident, $ref_id:expr, $owner:ident, |$row:ident, $range:ident| $in_range:expr) => {
        impl SyncedRow for $ty {
            fn row_id(&self) -> i64 {
                self.$id
            }

            fn ref_id(&self) -> Option<i64> {
                let f: fn(&Self) -> Option<i64> = $ref_id;
                f(self)
            }

            fn owner(&self) -> i64 {
                self.$owner
            }

            fn deleted(&self) -> bool {
                self.is_deleted
            }

            fn in_range(&self, $range: &TimeRange) -> bool {
                let $row = self;
                $in_range
            }

            fn tombstone_mut(&mut self) -> (&mut bool, &mut Option<DateTime<Utc>>) {
                (&mut self.is_deleted, &mut self.deleted_at)
            }

            fn touch(&mut self, at: DateTime<Utc>) {
                self.updated_at = at;
            }
        }
    };
}

synced_row!(Student, student_id, |s| s.student_ref_id, student_id, |_s, _r| true);
synced_row!(PointCard, record_id, |c| c.record_ref_id, student_id, |_c, _r| true);
synced_row!(DepositRecord, record_id, |d| d.record_ref_id, student_id, |d, r| {
    d.charging_date.map_or(false, |date| r.contains_date(date))
});
synced_row!(ReduceRecord, record_id, |d| d.record_ref_id, student_id, |d, r| {
    d.class_time.map_or(false, |at| r.contains_instant(at))
});
synced_row!(Schedule, schedule_id, |s| Some(s.schedule_ref_id), student_id, |s, r| {
    s.class_time.map_or(false, |at| r.contains_instant(at))
});
synced_row!(SemesterSettleRecord, record_id, |s| s.record_ref_id, student_id, |s, r| {
    s.start_time >= r.start && s.end_time <= r.end
});

impl LedgerState {
    fn rows(&self, table: RecordTable) -> Vec<&dyn SyncedRow> {
        match table {
            RecordTable::Students => self.students.values().map(|r| r as &dyn SyncedRow).collect(),
            RecordTable::PointCards => self.point_cards.values().map(|r| r as &dyn SyncedRow).collect(),
            RecordTable::DepositRecords => self.deposits.values().map(|r| r as &dyn SyncedRow).collect(),
            RecordTable::ReduceRecords => self.reduces.values().map(|r| r as &dyn SyncedRow).collect(),
            RecordTable::Schedules => self.schedules.values().map(|r| r as &dyn SyncedRow).collect(),
            RecordTable::SemesterSettleRecords => {
                self.settle_records.values().map(|r| r as &dyn SyncedRow).collect()
            }
        }
    }

    fn rows_mut(&mut self, table: RecordTable) -> Vec<&mut dyn SyncedRow> {
        match table {
            RecordTable::Students => self.students.values_mut().map(|r| r as &mut dyn SyncedRow).collect(),
            RecordTable::PointCards => {
                self.point_cards.values_mut().map(|r| r as &mut dyn SyncedRow).collect()
            }
            RecordTable::DepositRecords => {
                self.deposits.values_mut().map(|r| r as &mut dyn SyncedRow).collect()
            }
            RecordTable::ReduceRecords => {
                self.reduces.values_mut().map(|r| r as &mut dyn SyncedRow).collect()
            }
            RecordTable::Schedules => self.schedules.values_mut().map(|r| r as &mut dyn SyncedRow).collect(),
            RecordTable::SemesterSettleRecords => {
                self.settle_records.values_mut().map(|r| r as &mut dyn SyncedRow).collect()
            }
        }
    }

    fn student_matches_scope(&self, student_id: i64, scope: &LocalScope) -> bool {
        match &scope.identity {
            Some(identity) => self.students.get(&student_id).map_or(false, |s| {
                s.student_name == identity.student_name && s.parent_phone == identity.parent_phone
            }),
            None => true,
        }
    }
}

fn key_matches(row: &dyn SyncedRow, key: RowKey) -> bool {
    match key {
        RowKey::RecordId(id) => row.row_id() == id,
        RowKey::RefId(id) => row.ref_id() == Some(id),
    }
}

/// Live row first, then lowest id
fn pick<'a, T: Tombstoned + Clone + 'a>(rows: impl Iterator<Item = &'a T>) -> Option<T> {
    let mut found: Vec<&T> = rows.collect();
    found.sort_by_key(|r| r.is_deleted());
    found.first().map(|r| (*r).clone())
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    writes: Arc<AtomicUsize>,
    panic_on_write: Arc<AtomicBool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls that touched at least one row
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.read().await.clone()
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    /// Every following write panics until `stop_panicking`
    pub fn panic_on_write(&self) {
        self.panic_on_write.store(true, Ordering::SeqCst);
    }

    pub fn stop_panicking(&self) {
        self.panic_on_write.store(false, Ordering::SeqCst);
    }

    fn wrote(&self) {
        if self.panic_on_write.load(Ordering::SeqCst) {
            panic!("ledger write refused");
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn find_user_by_account(&self, account: &str) -> AppResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.account == account).cloned())
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.account == user.account) {
            return Err(AppError::Internal(format!("duplicate account {}", user.account)));
        }
        state.users.insert(user.user_id, user.clone());
        self.wrote();
        Ok(())
    }

    async fn set_user_status(&self, user_id: i64, status: UserStatus) -> AppResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        user.status = status;
        user.updated_at = Utc::now();
        self.wrote();
        Ok(())
    }

    async fn deactivate_users_without_active_student(&self) -> AppResult<Vec<User>> {
        let mut state = self.state.write().await;
        let owners: Vec<i64> = state
            .students
            .values()
            .filter(|s| !s.is_deleted)
            .map(|s| s.user_id)
            .collect();

        let now = Utc::now();
        let mut deactivated = Vec::new();
        for user in state.users.values_mut() {
            if user.status != UserStatus::Deactivate && !owners.contains(&user.user_id) {
                user.status = UserStatus::Deactivate;
                user.updated_at = now;
                deactivated.push(user.clone());
            }
        }
        if !deactivated.is_empty() {
            self.wrote();
        }
        Ok(deactivated)
    }

    async fn find_student(&self, cond: &StudentCond) -> AppResult<Option<Student>> {
        let state = self.state.read().await;
        Ok(pick(state.students.values().filter(|s| cond.matches(s))))
    }

    async fn list_students(&self, cond: &StudentCond) -> AppResult<Vec<Student>> {
        let state = self.state.read().await;
        Ok(state.students.values().filter(|s| cond.matches(s)).cloned().collect())
    }

    async fn insert_student(&self, student: &Student) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.students.insert(student.student_id, student.clone());
        self.wrote();
        Ok(())
    }

    async fn update_student(&self, student: &Student) -> AppResult<()> {
        let mut state = self.state.write().await;
        let row = state
            .students
            .get_mut(&student.student_id)
            .ok_or_else(|| AppError::NotFound(format!("student {}", student.student_id)))?;
        *row = Student {
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..student.clone()
        };
        self.wrote();
        Ok(())
    }

    async fn find_point_card(&self, cond: &PointCardCond) -> AppResult<Option<PointCard>> {
        let state = self.state.read().await;
        Ok(pick(state.point_cards.values().filter(|c| cond.matches(c))))
    }

    async fn insert_point_card(&self, card: &PointCard) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.point_cards.insert(card.record_id, card.clone());
        self.wrote();
        Ok(())
    }

    async fn update_point_card(&self, card: &PointCard) -> AppResult<()> {
        let mut state = self.state.write().await;
        let row = state
            .point_cards
            .get_mut(&card.record_id)
            .ok_or_else(|| AppError::NotFound(format!("point card {}", card.record_id)))?;
        *row = PointCard {
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..card.clone()
        };
        self.wrote();
        Ok(())
    }

    async fn find_deposit_record(&self, record_ref_id: i64) -> AppResult<Option<DepositRecord>> {
        let state = self.state.read().await;
        Ok(pick(state.deposits.values().filter(|d| d.record_ref_id == Some(record_ref_id))))
    }

    async fn insert_deposit_record(&self, record: &DepositRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.deposits.insert(record.record_id, record.clone());
        self.wrote();
        Ok(())
    }

    async fn update_deposit_record(&self, record: &DepositRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        let row = state
            .deposits
            .get_mut(&record.record_id)
            .ok_or_else(|| AppError::NotFound(format!("deposit record {}", record.record_id)))?;
        *row = DepositRecord {
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..record.clone()
        };
        self.wrote();
        Ok(())
    }

    async fn find_reduce_record(&self, record_ref_id: i64) -> AppResult<Option<ReduceRecord>> {
        let state = self.state.read().await;
        Ok(pick(state.reduces.values().filter(|r| r.record_ref_id == Some(record_ref_id))))
    }

    async fn insert_reduce_record(&self, record: &ReduceRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.reduces.insert(record.record_id, record.clone());
        self.wrote();
        Ok(())
    }

    async fn update_reduce_record(&self, record: &ReduceRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        let row = state
            .reduces
            .get_mut(&record.record_id)
            .ok_or_else(|| AppError::NotFound(format!("reduce record {}", record.record_id)))?;
        *row = ReduceRecord {
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..record.clone()
        };
        self.wrote();
        Ok(())
    }

    async fn list_schedules_by_ref(&self, schedule_ref_id: i64) -> AppResult<Vec<ScheduleView>> {
        let state = self.state.read().await;
        let views = state
            .schedules
            .values()
            .filter(|s| s.schedule_ref_id == schedule_ref_id)
            .filter_map(|s| {
                state.students.get(&s.student_id).map(|student| ScheduleView {
                    schedule: s.clone(),
                    student_name: student.student_name.clone(),
                    parent_phone: student.parent_phone.clone(),
                })
            })
            .collect();
        Ok(views)
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.schedules.insert(schedule.schedule_id, schedule.clone());
        self.wrote();
        Ok(())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> AppResult<()> {
        let mut state = self.state.write().await;
        let row = state
            .schedules
            .get_mut(&schedule.schedule_id)
            .ok_or_else(|| AppError::NotFound(format!("schedule {}", schedule.schedule_id)))?;
        *row = Schedule {
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..schedule.clone()
        };
        self.wrote();
        Ok(())
    }

    async fn find_settle_record(&self, record_ref_id: i64) -> AppResult<Option<SemesterSettleRecord>> {
        let state = self.state.read().await;
        Ok(pick(
            state
                .settle_records
                .values()
                .filter(|r| r.record_ref_id == Some(record_ref_id)),
        ))
    }

    async fn insert_settle_record(&self, record: &SemesterSettleRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.settle_records.insert(record.record_id, record.clone());
        self.wrote();
        Ok(())
    }

    async fn update_settle_record(&self, record: &SemesterSettleRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        let row = state
            .settle_records
            .get_mut(&record.record_id)
            .ok_or_else(|| AppError::NotFound(format!("settle record {}", record.record_id)))?;
        *row = SemesterSettleRecord {
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..record.clone()
        };
        self.wrote();
        Ok(())
    }

    async fn list_ref_ids(&self, table: RecordTable, scope: &LocalScope) -> AppResult<Vec<i64>> {
        let state = self.state.read().await;
        let mut ids: Vec<i64> = state
            .rows(table)
            .into_iter()
            .filter(|row| !row.deleted())
            .filter(|row| {
                if table == RecordTable::Students {
                    state.student_matches_scope(row.row_id(), scope)
                } else {
                    scope.student_id.map_or(true, |id| row.owner() == id)
                }
            })
            .filter(|row| scope.range.map_or(true, |range| row.in_range(&range)))
            .filter_map(|row| row.ref_id())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn soft_delete(&self, table: RecordTable, key: RowKey) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut touched = 0;
        for row in state.rows_mut(table) {
            if !key_matches(&*row, key) {
                continue;
            }
            let (is_deleted, deleted_at) = row.tombstone_mut();
            if !*is_deleted {
                *is_deleted = true;
                *deleted_at = Some(now);
                row.touch(now);
                touched += 1;
            }
        }
        if touched > 0 {
            self.wrote();
        }
        Ok(touched)
    }

    async fn reset_tombstone(&self, table: RecordTable, key: RowKey) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut touched = 0;
        for row in state.rows_mut(table) {
            if !key_matches(&*row, key) {
                continue;
            }
            let (is_deleted, deleted_at) = row.tombstone_mut();
            if *is_deleted || deleted_at.is_some() {
                *is_deleted = false;
                *deleted_at = None;
                row.touch(now);
                touched += 1;
            }
        }
        if touched > 0 {
            self.wrote();
        }
        Ok(touched)
    }

    async fn begin_settlement(&self) -> AppResult<Box<dyn SettlementTx>> {
        let snapshot = self.state.read().await.clone();
        Ok(Box::new(MemorySettlementTx {
            snapshot,
            debits: Vec::new(),
            shared: self.clone(),
        }))
    }
}

/// Reads from the snapshot taken at begin, buffers debits until commit
struct MemorySettlementTx {
    snapshot: LedgerState,
    debits: Vec<(i64, f64)>,
    shared: MemoryLedger,
}

#[async_trait]
impl SettlementTx for MemorySettlementTx {
    async fn settleable_students(&mut self) -> AppResult<Vec<Student>> {
        let cond = StudentCond::settleable();
        Ok(self.snapshot.students.values().filter(|s| cond.matches(s)).cloned().collect())
    }

    async fn total_deposited_points(
        &mut self,
        student_ids: &[i64],
        range: &TimeRange,
    ) -> AppResult<HashMap<i64, f64>> {
        let mut totals = HashMap::new();
        for d in self.snapshot.deposits.values() {
            if d.is_deleted || !student_ids.contains(&d.student_id) {
                continue;
            }
            if d.charging_date.map_or(false, |date| range.contains_date(date)) {
                *totals.entry(d.student_id).or_insert(0.0) += d.deposited_points as f64;
            }
        }
        Ok(totals)
    }

    async fn total_reduce_points(
        &mut self,
        student_ids: &[i64],
        range: &TimeRange,
    ) -> AppResult<HashMap<i64, f64>> {
        let mut totals = HashMap::new();
        for r in self.snapshot.reduces.values() {
            if r.is_deleted || !student_ids.contains(&r.student_id) {
                continue;
            }
            if r.class_time.map_or(false, |at| range.contains_instant(at)) {
                *totals.entry(r.student_id).or_insert(0.0) += r.reduce_points;
            }
        }
        Ok(totals)
    }

    async fn point_cards_for(&mut self, student_ids: &[i64]) -> AppResult<Vec<PointCard>> {
        Ok(self
            .snapshot
            .point_cards
            .values()
            .filter(|c| !c.is_deleted && student_ids.contains(&c.student_id))
            .cloned()
            .collect())
    }

    async fn debit_point_card(&mut self, record_id: i64, points: f64) -> AppResult<()> {
        let card = self
            .snapshot
            .point_cards
            .get_mut(&record_id)
            .ok_or_else(|| AppError::NotFound(format!("point card {}", record_id)))?;
        card.rest_points -= points;
        self.debits.push((record_id, points));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemorySettlementTx { debits, shared, .. } = *self;
        if debits.is_empty() {
            return Ok(());
        }
        let mut state = shared.state.write().await;
        let now = Utc::now();
        for (record_id, points) in debits {
            if let Some(card) = state.point_cards.get_mut(&record_id) {
                card.rest_points -= points;
                card.updated_at = now;
            }
        }
        shared.wrote();
        Ok(())
    }
}
