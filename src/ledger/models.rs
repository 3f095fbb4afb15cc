use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgHasArrayType, postgres::PgTypeInfo, prelude::FromRow, Type};
use std::fmt;

use crate::identity::StudentIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Deactivate,
}

/// Billing mode of a student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Mismatched,
    /// prepaid top-ups, never settled
    Recharge,
    /// balance cleared at every semester anchor
    Semester,
}

impl Mode {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim() {
            "recharge" | "舊制" => Mode::Recharge,
            "semester" | "學期制" => Mode::Semester,
            _ => Mode::Mismatched,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Mismatched => "mismatched",
            Mode::Recharge => "recharge",
            Mode::Semester => "semester",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "class_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClassType {
    Mismatched,
    OneToOne,
    OneToTwo,
    OneToThree,
    Group,
}

impl ClassType {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim() {
            "one_to_one" | "一對一" => ClassType::OneToOne,
            "one_to_two" | "一對二" => ClassType::OneToTwo,
            "one_to_three" | "一對三" => ClassType::OneToThree,
            "group" | "團課" => ClassType::Group,
            _ => ClassType::Mismatched,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClassType::Mismatched => "未匹配",
            ClassType::OneToOne => "一對一",
            ClassType::OneToTwo => "一對二",
            ClassType::OneToThree => "一對三",
            ClassType::Group => "團課",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "class_level")]
pub enum ClassLevel {
    #[sqlx(rename = "mismatched")]
    #[serde(rename = "mismatched")]
    Mismatched,
    L0,
    L1,
    L2,
    L3,
    L4,
}

impl ClassLevel {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim() {
            "L0" | "寶寶班" => ClassLevel::L0,
            "L1" | "Level 1" => ClassLevel::L1,
            "L2" | "Level 2" => ClassLevel::L2,
            "L3" | "Level 3" => ClassLevel::L3,
            "L4" | "Level 4" => ClassLevel::L4,
            _ => ClassLevel::Mismatched,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClassLevel::Mismatched => "未匹配",
            ClassLevel::L0 => "寶寶班",
            ClassLevel::L1 => "Level 1",
            ClassLevel::L2 => "Level 2",
            ClassLevel::L3 => "Level 3",
            ClassLevel::L4 => "Level 4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "charging_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChargingMethod {
    Mismatched,
    Cash,
    Atm,
    CreditCard,
}

impl PgHasArrayType for ChargingMethod {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_charging_method")
    }
}

impl ChargingMethod {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim() {
            "cash" | "現金" => ChargingMethod::Cash,
            "atm" | "匯款ATM" => ChargingMethod::Atm,
            "credit_card" | "刷卡" => ChargingMethod::CreditCard,
            _ => ChargingMethod::Mismatched,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Soft-delete marker shared by every synced table
pub trait Tombstoned {
    fn is_deleted(&self) -> bool;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_tombstoned(&self) -> bool {
        self.is_deleted() || self.deleted_at().is_some()
    }
}

macro_rules! impl_tombstoned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Tombstoned for $ty {
                fn is_deleted(&self) -> bool {
                    self.is_deleted
                }

                fn deleted_at(&self) -> Option<DateTime<Utc>> {
                    self.deleted_at
                }
            }
        )+
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub account: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub student_id: i64,
    pub student_ref_id: Option<i64>,
    pub user_id: i64,
    pub student_name: String,
    pub parent_name: String,
    pub parent_phone: String,
    pub mode: Mode,
    pub is_settle_normally: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn identity(&self) -> StudentIdentity {
        StudentIdentity::new(self.student_name.clone(), self.parent_phone.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PointCard {
    pub record_id: i64,
    pub record_ref_id: Option<i64>,
    pub student_id: i64,
    pub rest_points: f64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DepositRecord {
    pub record_id: i64,
    pub record_ref_id: Option<i64>,
    pub student_id: i64,
    pub charging_date: Option<NaiveDate>,
    pub charging_method: Vec<ChargingMethod>,
    pub tax_id: String,
    pub account_last_five_yards: String,
    pub charging_amount: i32,
    pub actual_charging_amount: i32,
    pub teacher_name: String,
    pub deposited_points: i32,
    /// charged ("已入款") in the remote app
    pub hit_status: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReduceRecord {
    pub record_id: i64,
    pub record_ref_id: Option<i64>,
    pub student_id: i64,
    pub class_type: ClassType,
    pub class_level: ClassLevel,
    pub class_time: Option<DateTime<Utc>>,
    pub teacher_name: String,
    pub reduce_points: f64,
    pub is_attended: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attendance row of a remote schedule record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Schedule {
    pub schedule_id: i64,
    pub schedule_ref_id: i64,
    pub record_ref_id: Option<i64>,
    pub student_id: i64,
    pub teacher_name: String,
    pub class_type: ClassType,
    pub class_level: ClassLevel,
    pub class_time: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Schedule row joined with its student's identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScheduleView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub schedule: Schedule,
    pub student_name: String,
    pub parent_phone: String,
}

impl ScheduleView {
    pub fn identity(&self) -> StudentIdentity {
        StudentIdentity::new(self.student_name.clone(), self.parent_phone.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SemesterSettleRecord {
    pub record_id: i64,
    pub record_ref_id: Option<i64>,
    pub student_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub clear_points: f64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_tombstoned!(Student, PointCard, DepositRecord, ReduceRecord, Schedule, SemesterSettleRecord);

impl Tombstoned for ScheduleView {
    fn is_deleted(&self) -> bool {
        self.schedule.is_deleted
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.deleted_at
    }
}

/// Every table that mirrors a remote app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordTable {
    Students,
    PointCards,
    DepositRecords,
    ReduceRecords,
    Schedules,
    SemesterSettleRecords,
}

impl RecordTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            RecordTable::Students => "students",
            RecordTable::PointCards => "point_cards",
            RecordTable::DepositRecords => "deposit_point_records",
            RecordTable::ReduceRecords => "reduce_point_records",
            RecordTable::Schedules => "class_schedules",
            RecordTable::SemesterSettleRecords => "semester_settle_records",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            RecordTable::Students => "student_id",
            RecordTable::Schedules => "schedule_id",
            _ => "record_id",
        }
    }

    pub fn ref_column(&self) -> &'static str {
        match self {
            RecordTable::Students => "student_ref_id",
            RecordTable::Schedules => "schedule_ref_id",
            _ => "record_ref_id",
        }
    }

    /// Columns a time-scoped sync filters on: (lower bound column, upper bound column)
    pub fn range_columns(&self) -> Option<(&'static str, &'static str)> {
        match self {
            RecordTable::DepositRecords => Some(("charging_date", "charging_date")),
            RecordTable::ReduceRecords | RecordTable::Schedules => Some(("class_time", "class_time")),
            RecordTable::SemesterSettleRecords => Some(("start_time", "end_time")),
            RecordTable::Students | RecordTable::PointCards => None,
        }
    }

    /// Date-typed range columns compare against local calendar dates
    pub fn range_is_date(&self) -> bool {
        matches!(self, RecordTable::DepositRecords)
    }
}

impl fmt::Display for RecordTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// Row selector for the generic tombstone operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    /// local primary key
    RecordId(i64),
    /// remote reference id (for schedules, every row of the remote record)
    RefId(i64),
}

/// Inclusive time range in the school's local offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeRange {
    /// Whole local days: `start` at 00:00:00 through `end` at 23:59:59
    pub fn from_dates(start: NaiveDate, end: NaiveDate, offset: FixedOffset) -> Option<Self> {
        let start = offset.from_local_datetime(&start.and_hms_opt(0, 0, 0)?).single()?;
        let end = offset.from_local_datetime(&end.and_hms_opt(23, 59, 59)?).single()?;
        Some(Self { start, end })
    }

    pub fn contains_instant(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start.date_naive() && date <= self.end.date_naive()
    }
}

/// Local side of a sync scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalScope {
    /// child tables: restrict to one student
    pub student_id: Option<i64>,
    /// students table: restrict to one identity
    pub identity: Option<StudentIdentity>,
    pub range: Option<TimeRange>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentCond {
    pub student_id: Option<i64>,
    pub student_ref_id: Option<i64>,
    pub identity: Option<StudentIdentity>,
    pub mode: Option<Mode>,
    pub is_settle_normally: Option<bool>,
    pub is_deleted: Option<bool>,
}

impl StudentCond {
    pub fn by_ref(student_ref_id: i64) -> Self {
        Self {
            student_ref_id: Some(student_ref_id),
            ..Default::default()
        }
    }

    /// Live student with this identity
    pub fn active_identity(identity: &StudentIdentity) -> Self {
        Self {
            identity: Some(identity.clone()),
            is_deleted: Some(false),
            ..Default::default()
        }
    }

    /// Students due for semester settlement
    pub fn settleable() -> Self {
        Self {
            mode: Some(Mode::Semester),
            is_settle_normally: Some(true),
            is_deleted: Some(false),
            ..Default::default()
        }
    }

    pub fn matches(&self, s: &Student) -> bool {
        self.student_id.map_or(true, |v| s.student_id == v)
            && self.student_ref_id.map_or(true, |v| s.student_ref_id == Some(v))
            && self.identity.as_ref().map_or(true, |id| {
                s.student_name == id.student_name && s.parent_phone == id.parent_phone
            })
            && self.mode.map_or(true, |m| s.mode == m)
            && self.is_settle_normally.map_or(true, |v| s.is_settle_normally == v)
            && self.is_deleted.map_or(true, |v| s.is_deleted == v)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCardCond {
    pub record_ref_id: Option<i64>,
    pub student_id: Option<i64>,
    pub is_deleted: Option<bool>,
}

impl PointCardCond {
    pub fn matches(&self, c: &PointCard) -> bool {
        self.record_ref_id.map_or(true, |v| c.record_ref_id == Some(v))
            && self.student_id.map_or(true, |v| c.student_id == v)
            && self.is_deleted.map_or(true, |v| c.is_deleted == v)
    }
}
