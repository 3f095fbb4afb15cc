use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use super::models::*;
use super::store::{LedgerStore, SettlementTx};
use crate::error::{AppError, AppResult};

const STUDENT_COLUMNS: &str = "student_id, student_ref_id, user_id, student_name, parent_name, \
    parent_phone, mode, is_settle_normally, is_deleted, deleted_at, created_at, updated_at";

const POINT_CARD_COLUMNS: &str =
    "record_id, record_ref_id, student_id, rest_points, is_deleted, deleted_at, created_at, updated_at";

const DEPOSIT_COLUMNS: &str = "record_id, record_ref_id, student_id, charging_date, charging_method, \
    tax_id, account_last_five_yards, charging_amount, actual_charging_amount, teacher_name, \
    deposited_points, hit_status, is_deleted, deleted_at, created_at, updated_at";

const REDUCE_COLUMNS: &str = "record_id, record_ref_id, student_id, class_type, class_level, \
    class_time, teacher_name, reduce_points, is_attended, is_deleted, deleted_at, created_at, updated_at";

const SETTLE_COLUMNS: &str = "record_id, record_ref_id, student_id, start_time, end_time, \
    clear_points, is_deleted, deleted_at, created_at, updated_at";

/// Postgres-backed ledger - the local source of truth
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_student_filters(qb: &mut QueryBuilder<'_, Postgres>, cond: &StudentCond) {
    qb.push(" WHERE TRUE");
    if let Some(id) = cond.student_id {
        qb.push(" AND student_id = ").push_bind(id);
    }
    if let Some(ref_id) = cond.student_ref_id {
        qb.push(" AND student_ref_id = ").push_bind(ref_id);
    }
    if let Some(identity) = &cond.identity {
        qb.push(" AND student_name = ")
            .push_bind(identity.student_name.clone())
            .push(" AND parent_phone = ")
            .push_bind(identity.parent_phone.clone());
    }
    if let Some(mode) = cond.mode {
        qb.push(" AND mode = ").push_bind(mode);
    }
    if let Some(flag) = cond.is_settle_normally {
        qb.push(" AND is_settle_normally = ").push_bind(flag);
    }
    if let Some(deleted) = cond.is_deleted {
        qb.push(" AND is_deleted = ").push_bind(deleted);
    }
}

fn ensure_touched(rows: u64, what: impl FnOnce() -> String) -> AppResult<()> {
    if rows == 0 {
        return Err(AppError::NotFound(what()));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    // ========== USER OPERATIONS ==========

    async fn find_user_by_account(&self, account: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, account, password, status, created_at, updated_at
            FROM users
            WHERE account = $1
            "#,
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, account, password, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.account)
        .bind(&user.password)
        .bind(user.status)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_user_status(&self, user_id: i64, status: UserStatus) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET status = $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("user {}", user_id))
    }

    async fn deactivate_users_without_active_student(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET status = 'deactivate', updated_at = NOW()
            WHERE status <> 'deactivate'
              AND user_id NOT IN (SELECT user_id FROM students WHERE is_deleted = FALSE)
            RETURNING user_id, account, password, status, created_at, updated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    // ========== STUDENT OPERATIONS ==========

    async fn find_student(&self, cond: &StudentCond) -> AppResult<Option<Student>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM students", STUDENT_COLUMNS));
        push_student_filters(&mut qb, cond);
        // a live row wins over a tombstoned one with the same key
        qb.push(" ORDER BY is_deleted ASC, student_id ASC LIMIT 1");

        let student = qb.build_query_as::<Student>().fetch_optional(&self.pool).await?;
        Ok(student)
    }

    async fn list_students(&self, cond: &StudentCond) -> AppResult<Vec<Student>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM students", STUDENT_COLUMNS));
        push_student_filters(&mut qb, cond);
        qb.push(" ORDER BY student_id ASC");

        let students = qb.build_query_as::<Student>().fetch_all(&self.pool).await?;
        Ok(students)
    }

    async fn insert_student(&self, student: &Student) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO students (
                student_id, student_ref_id, user_id, student_name, parent_name, parent_phone,
                mode, is_settle_normally, is_deleted, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(student.student_id)
        .bind(student.student_ref_id)
        .bind(student.user_id)
        .bind(&student.student_name)
        .bind(&student.parent_name)
        .bind(&student.parent_phone)
        .bind(student.mode)
        .bind(student.is_settle_normally)
        .bind(student.is_deleted)
        .bind(student.deleted_at)
        .bind(student.created_at)
        .bind(student.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_student(&self, student: &Student) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE students
            SET student_ref_id = $2, user_id = $3, student_name = $4, parent_name = $5,
                parent_phone = $6, mode = $7, is_settle_normally = $8, updated_at = NOW()
            WHERE student_id = $1
            "#,
        )
        .bind(student.student_id)
        .bind(student.student_ref_id)
        .bind(student.user_id)
        .bind(&student.student_name)
        .bind(&student.parent_name)
        .bind(&student.parent_phone)
        .bind(student.mode)
        .bind(student.is_settle_normally)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("student {}", student.student_id))
    }

    // ========== POINT CARD OPERATIONS ==========

    async fn find_point_card(&self, cond: &PointCardCond) -> AppResult<Option<PointCard>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM point_cards WHERE TRUE", POINT_CARD_COLUMNS));
        if let Some(ref_id) = cond.record_ref_id {
            qb.push(" AND record_ref_id = ").push_bind(ref_id);
        }
        if let Some(student_id) = cond.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }
        if let Some(deleted) = cond.is_deleted {
            qb.push(" AND is_deleted = ").push_bind(deleted);
        }
        qb.push(" ORDER BY is_deleted ASC, record_id ASC LIMIT 1");

        let card = qb.build_query_as::<PointCard>().fetch_optional(&self.pool).await?;
        Ok(card)
    }

    async fn insert_point_card(&self, card: &PointCard) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO point_cards (
                record_id, record_ref_id, student_id, rest_points,
                is_deleted, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(card.record_id)
        .bind(card.record_ref_id)
        .bind(card.student_id)
        .bind(card.rest_points)
        .bind(card.is_deleted)
        .bind(card.deleted_at)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_point_card(&self, card: &PointCard) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE point_cards
            SET record_ref_id = $2, student_id = $3, rest_points = $4, updated_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(card.record_id)
        .bind(card.record_ref_id)
        .bind(card.student_id)
        .bind(card.rest_points)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("point card {}", card.record_id))
    }

    // ========== DEPOSIT RECORD OPERATIONS ==========

    async fn find_deposit_record(&self, record_ref_id: i64) -> AppResult<Option<DepositRecord>> {
        let record = sqlx::query_as::<_, DepositRecord>(&format!(
            "SELECT {} FROM deposit_point_records WHERE record_ref_id = $1 \
             ORDER BY is_deleted ASC, record_id ASC LIMIT 1",
            DEPOSIT_COLUMNS
        ))
        .bind(record_ref_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_deposit_record(&self, record: &DepositRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deposit_point_records (
                record_id, record_ref_id, student_id, charging_date, charging_method, tax_id,
                account_last_five_yards, charging_amount, actual_charging_amount, teacher_name,
                deposited_points, hit_status, is_deleted, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.record_id)
        .bind(record.record_ref_id)
        .bind(record.student_id)
        .bind(record.charging_date)
        .bind(&record.charging_method)
        .bind(&record.tax_id)
        .bind(&record.account_last_five_yards)
        .bind(record.charging_amount)
        .bind(record.actual_charging_amount)
        .bind(&record.teacher_name)
        .bind(record.deposited_points)
        .bind(record.hit_status)
        .bind(record.is_deleted)
        .bind(record.deleted_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_deposit_record(&self, record: &DepositRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_point_records
            SET student_id = $2, charging_date = $3, charging_method = $4, tax_id = $5,
                account_last_five_yards = $6, charging_amount = $7, actual_charging_amount = $8,
                teacher_name = $9, deposited_points = $10, hit_status = $11, updated_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(record.record_id)
        .bind(record.student_id)
        .bind(record.charging_date)
        .bind(&record.charging_method)
        .bind(&record.tax_id)
        .bind(&record.account_last_five_yards)
        .bind(record.charging_amount)
        .bind(record.actual_charging_amount)
        .bind(&record.teacher_name)
        .bind(record.deposited_points)
        .bind(record.hit_status)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("deposit record {}", record.record_id))
    }

    // ========== REDUCE RECORD OPERATIONS ==========

    async fn find_reduce_record(&self, record_ref_id: i64) -> AppResult<Option<ReduceRecord>> {
        let record = sqlx::query_as::<_, ReduceRecord>(&format!(
            "SELECT {} FROM reduce_point_records WHERE record_ref_id = $1 \
             ORDER BY is_deleted ASC, record_id ASC LIMIT 1",
            REDUCE_COLUMNS
        ))
        .bind(record_ref_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_reduce_record(&self, record: &ReduceRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reduce_point_records (
                record_id, record_ref_id, student_id, class_type, class_level, class_time,
                teacher_name, reduce_points, is_attended, is_deleted, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.record_id)
        .bind(record.record_ref_id)
        .bind(record.student_id)
        .bind(record.class_type)
        .bind(record.class_level)
        .bind(record.class_time)
        .bind(&record.teacher_name)
        .bind(record.reduce_points)
        .bind(record.is_attended)
        .bind(record.is_deleted)
        .bind(record.deleted_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_reduce_record(&self, record: &ReduceRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reduce_point_records
            SET student_id = $2, class_type = $3, class_level = $4, class_time = $5,
                teacher_name = $6, reduce_points = $7, is_attended = $8, updated_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(record.record_id)
        .bind(record.student_id)
        .bind(record.class_type)
        .bind(record.class_level)
        .bind(record.class_time)
        .bind(&record.teacher_name)
        .bind(record.reduce_points)
        .bind(record.is_attended)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("reduce record {}", record.record_id))
    }

    // ========== SCHEDULE OPERATIONS ==========

    async fn list_schedules_by_ref(&self, schedule_ref_id: i64) -> AppResult<Vec<ScheduleView>> {
        let rows = sqlx::query_as::<_, ScheduleView>(
            r#"
            SELECT cs.schedule_id, cs.schedule_ref_id, cs.record_ref_id, cs.student_id,
                   cs.teacher_name, cs.class_type, cs.class_level, cs.class_time,
                   cs.is_deleted, cs.deleted_at, cs.created_at, cs.updated_at,
                   s.student_name, s.parent_phone
            FROM class_schedules cs
            INNER JOIN students s ON s.student_id = cs.student_id
            WHERE cs.schedule_ref_id = $1
            ORDER BY cs.schedule_id ASC
            "#,
        )
        .bind(schedule_ref_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO class_schedules (
                schedule_id, schedule_ref_id, record_ref_id, student_id, teacher_name,
                class_type, class_level, class_time, is_deleted, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(schedule.schedule_id)
        .bind(schedule.schedule_ref_id)
        .bind(schedule.record_ref_id)
        .bind(schedule.student_id)
        .bind(&schedule.teacher_name)
        .bind(schedule.class_type)
        .bind(schedule.class_level)
        .bind(schedule.class_time)
        .bind(schedule.is_deleted)
        .bind(schedule.deleted_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE class_schedules
            SET record_ref_id = $2, student_id = $3, teacher_name = $4, class_type = $5,
                class_level = $6, class_time = $7, updated_at = NOW()
            WHERE schedule_id = $1
            "#,
        )
        .bind(schedule.schedule_id)
        .bind(schedule.record_ref_id)
        .bind(schedule.student_id)
        .bind(&schedule.teacher_name)
        .bind(schedule.class_type)
        .bind(schedule.class_level)
        .bind(schedule.class_time)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("schedule {}", schedule.schedule_id))
    }

    // ========== SEMESTER SETTLE RECORD OPERATIONS ==========

    async fn find_settle_record(&self, record_ref_id: i64) -> AppResult<Option<SemesterSettleRecord>> {
        let record = sqlx::query_as::<_, SemesterSettleRecord>(&format!(
            "SELECT {} FROM semester_settle_records WHERE record_ref_id = $1 \
             ORDER BY is_deleted ASC, record_id ASC LIMIT 1",
            SETTLE_COLUMNS
        ))
        .bind(record_ref_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_settle_record(&self, record: &SemesterSettleRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO semester_settle_records (
                record_id, record_ref_id, student_id, start_time, end_time, clear_points,
                is_deleted, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.record_id)
        .bind(record.record_ref_id)
        .bind(record.student_id)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.clear_points)
        .bind(record.is_deleted)
        .bind(record.deleted_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_settle_record(&self, record: &SemesterSettleRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE semester_settle_records
            SET student_id = $2, start_time = $3, end_time = $4, clear_points = $5, updated_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(record.record_id)
        .bind(record.student_id)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.clear_points)
        .execute(&self.pool)
        .await?;

        ensure_touched(result.rows_affected(), || format!("settle record {}", record.record_id))
    }

    // ========== TOMBSTONE OPERATIONS ==========

    async fn list_ref_ids(&self, table: RecordTable, scope: &LocalScope) -> AppResult<Vec<i64>> {
        let ref_column = table.ref_column();
        let mut qb = QueryBuilder::new(format!(
            "SELECT DISTINCT {} FROM {} WHERE is_deleted = FALSE AND {} IS NOT NULL",
            ref_column, table, ref_column
        ));

        if table == RecordTable::Students {
            if let Some(identity) = &scope.identity {
                qb.push(" AND student_name = ")
                    .push_bind(identity.student_name.clone())
                    .push(" AND parent_phone = ")
                    .push_bind(identity.parent_phone.clone());
            }
        } else if let Some(student_id) = scope.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }

        if let (Some(range), Some((lower, upper))) = (scope.range, table.range_columns()) {
            if table.range_is_date() {
                qb.push(format!(" AND {} >= ", lower))
                    .push_bind(range.start.date_naive())
                    .push(format!(" AND {} <= ", upper))
                    .push_bind(range.end.date_naive());
            } else {
                qb.push(format!(" AND {} >= ", lower))
                    .push_bind(range.start.with_timezone(&Utc))
                    .push(format!(" AND {} <= ", upper))
                    .push_bind(range.end.with_timezone(&Utc));
            }
        }

        let ids: Vec<(i64,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn soft_delete(&self, table: RecordTable, key: RowKey) -> AppResult<u64> {
        let (column, value) = key_column(table, key);
        let result = sqlx::query(&format!(
            "UPDATE {} SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
             WHERE {} = $1 AND is_deleted = FALSE",
            table, column
        ))
        .bind(value)
        .execute(&self.pool)
        .await?;

        debug!(table = %table, ?key, rows = result.rows_affected(), "soft deleted");
        Ok(result.rows_affected())
    }

    async fn reset_tombstone(&self, table: RecordTable, key: RowKey) -> AppResult<u64> {
        let (column, value) = key_column(table, key);
        let result = sqlx::query(&format!(
            "UPDATE {} SET is_deleted = FALSE, deleted_at = NULL, updated_at = NOW() \
             WHERE {} = $1 AND (is_deleted = TRUE OR deleted_at IS NOT NULL)",
            table, column
        ))
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ========== SETTLEMENT ==========

    async fn begin_settlement(&self) -> AppResult<Box<dyn SettlementTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSettlementTx { tx }))
    }
}

fn key_column(table: RecordTable, key: RowKey) -> (&'static str, i64) {
    match key {
        RowKey::RecordId(id) => (table.id_column(), id),
        RowKey::RefId(id) => (table.ref_column(), id),
    }
}

pub struct PgSettlementTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementTx for PgSettlementTx {
    async fn settleable_students(&mut self) -> AppResult<Vec<Student>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM students", STUDENT_COLUMNS));
        push_student_filters(&mut qb, &StudentCond::settleable());
        qb.push(" ORDER BY student_id ASC");

        let students = qb.build_query_as::<Student>().fetch_all(&mut *self.tx).await?;
        Ok(students)
    }

    async fn total_deposited_points(
        &mut self,
        student_ids: &[i64],
        range: &TimeRange,
    ) -> AppResult<HashMap<i64, f64>> {
        let rows = sqlx::query_as::<_, (i64, f64)>(
            r#"
            SELECT student_id, COALESCE(SUM(deposited_points), 0)::FLOAT8 AS total_deposited_points
            FROM deposit_point_records
            WHERE is_deleted = FALSE
              AND student_id = ANY($1)
              AND charging_date >= $2
              AND charging_date <= $3
            GROUP BY student_id
            "#,
        )
        .bind(student_ids.to_vec())
        .bind(range.start.date_naive())
        .bind(range.end.date_naive())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn total_reduce_points(
        &mut self,
        student_ids: &[i64],
        range: &TimeRange,
    ) -> AppResult<HashMap<i64, f64>> {
        let rows = sqlx::query_as::<_, (i64, f64)>(
            r#"
            SELECT student_id, COALESCE(SUM(reduce_points), 0)::FLOAT8 AS total_reduce_points
            FROM reduce_point_records
            WHERE is_deleted = FALSE
              AND student_id = ANY($1)
              AND class_time >= $2
              AND class_time <= $3
            GROUP BY student_id
            "#,
        )
        .bind(student_ids.to_vec())
        .bind(range.start.with_timezone(&Utc))
        .bind(range.end.with_timezone(&Utc))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn point_cards_for(&mut self, student_ids: &[i64]) -> AppResult<Vec<PointCard>> {
        let cards = sqlx::query_as::<_, PointCard>(&format!(
            "SELECT {} FROM point_cards WHERE is_deleted = FALSE AND student_id = ANY($1) \
             FOR UPDATE",
            POINT_CARD_COLUMNS
        ))
        .bind(student_ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(cards)
    }

    async fn debit_point_card(&mut self, record_id: i64, points: f64) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE point_cards
            SET rest_points = rest_points - $2, updated_at = NOW()
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .bind(points)
        .execute(&mut *self.tx)
        .await?;

        ensure_touched(result.rows_affected(), || format!("point card {}", record_id))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
