// Typed views of the six Kintone apps.
//
// Each `from_raw` reads one record off the wire. A bad composite student name
// surfaces as `AppError::Identity`, any other unreadable field as
// `AppError::InvalidRecord`, so callers can tell "unknown student" apart from
// "broken record".

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};

use super::fields::{value, RawRecord, DATE_FORMAT};
use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::ledger::models::{ChargingMethod, ClassLevel, ClassType, Mode};

pub const STUDENT_NAME: &str = "studentName";
pub const PARENT_NAME: &str = "parentName";
pub const PARENT_PHONE: &str = "parentPhone";
pub const MODE: &str = "mode";
pub const IS_SETTLE_NORMALLY: &str = "isSettleNormally";
pub const REST_POINTS: &str = "restPoints";
pub const CLEAR_POINTS: &str = "clearPoints";
pub const CHARGING_DATE: &str = "chargingDate";
pub const CHARGING_METHOD: &str = "chargingMethod";
pub const TAX_ID: &str = "taxId";
pub const ACCOUNT_LAST_FIVE_YARDS: &str = "accountLastFiveYards";
pub const CHARGING_AMOUNT: &str = "chargingAmount";
pub const ACTUAL_CHARGING_AMOUNT: &str = "actualChargingAmount";
pub const TEACHER_NAME: &str = "teacherName";
pub const DEPOSITED_POINTS: &str = "depositedPoints";
pub const CHARGING_STATUS: &str = "chargingStatus";
pub const CLASS_TYPE: &str = "classType";
pub const CLASS_LEVEL: &str = "classLevel";
pub const CLASS_TIME: &str = "classTime";
pub const REDUCE_POINTS: &str = "reducePoints";
pub const ATTEND_STATUS: &str = "attendStatus";
pub const ATTENDANCE: &str = "attendance";
pub const RECORD_ID: &str = "recordId";
pub const START_TIME: &str = "startTime";
pub const END_TIME: &str = "endTime";

const CHARGED: &str = "已入款";
const ATTENDED: &str = "出席";
const SETTLE_NORMALLY: [&str; 2] = ["是", "true"];

fn identity_of(raw: &RawRecord) -> AppResult<StudentIdentity> {
    Ok(StudentIdentity::parse(&raw.text(STUDENT_NAME))?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStudent {
    pub ref_id: i64,
    pub identity: StudentIdentity,
    pub parent_name: String,
    pub mode: Mode,
    pub is_settle_normally: bool,
}

impl RemoteStudent {
    pub fn from_raw(raw: &RawRecord) -> AppResult<Self> {
        let identity =
            StudentIdentity::try_new(&raw.text(STUDENT_NAME), &raw.text(PARENT_PHONE))?;
        Ok(Self {
            ref_id: raw.id()?,
            identity,
            parent_name: raw.text(PARENT_NAME).trim().to_string(),
            mode: Mode::from_label(&raw.text(MODE)),
            is_settle_normally: SETTLE_NORMALLY.contains(&raw.text(IS_SETTLE_NORMALLY).trim()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePointCard {
    pub ref_id: i64,
    pub identity: StudentIdentity,
    pub rest_points: f64,
}

impl RemotePointCard {
    pub fn from_raw(raw: &RawRecord) -> AppResult<Self> {
        Ok(Self {
            ref_id: raw.id()?,
            identity: identity_of(raw)?,
            rest_points: raw.number_or_zero(REST_POINTS)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDeposit {
    pub ref_id: i64,
    pub identity: StudentIdentity,
    pub charging_date: Option<NaiveDate>,
    pub charging_method: Vec<ChargingMethod>,
    pub tax_id: String,
    pub account_last_five_yards: String,
    pub charging_amount: i32,
    pub actual_charging_amount: i32,
    pub teacher_name: String,
    pub deposited_points: i32,
    pub charged: bool,
}

impl RemoteDeposit {
    pub fn from_raw(raw: &RawRecord) -> AppResult<Self> {
        Ok(Self {
            ref_id: raw.id()?,
            identity: identity_of(raw)?,
            charging_date: raw.date(CHARGING_DATE)?,
            charging_method: raw
                .strings(CHARGING_METHOD)
                .iter()
                .map(|label| ChargingMethod::from_label(label))
                .collect(),
            tax_id: raw.text(TAX_ID),
            account_last_five_yards: raw.text(ACCOUNT_LAST_FIVE_YARDS),
            charging_amount: raw.number_or_zero(CHARGING_AMOUNT)?,
            actual_charging_amount: raw.number_or_zero(ACTUAL_CHARGING_AMOUNT)?,
            teacher_name: raw.text(TEACHER_NAME),
            deposited_points: raw.number_or_zero(DEPOSITED_POINTS)?,
            charged: raw.text(CHARGING_STATUS).trim() == CHARGED,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteReduce {
    pub ref_id: i64,
    pub identity: StudentIdentity,
    pub class_type: ClassType,
    pub class_level: ClassLevel,
    pub class_time: Option<DateTime<Utc>>,
    pub teacher_name: String,
    pub reduce_points: f64,
    pub attended: bool,
}

impl RemoteReduce {
    pub fn from_raw(raw: &RawRecord) -> AppResult<Self> {
        Ok(Self {
            ref_id: raw.id()?,
            identity: identity_of(raw)?,
            class_type: ClassType::from_label(&raw.text(CLASS_TYPE)),
            class_level: ClassLevel::from_label(&raw.text(CLASS_LEVEL)),
            class_time: raw.datetime(CLASS_TIME)?,
            teacher_name: raw.text(TEACHER_NAME),
            reduce_points: raw.number_or_zero(REDUCE_POINTS)?,
            attended: raw
                .strings(ATTEND_STATUS)
                .first()
                .map_or(false, |status| status == ATTENDED),
        })
    }
}

/// One row of a schedule's attendance subtable
#[derive(Debug, Clone, PartialEq)]
pub struct Attendance {
    pub identity: StudentIdentity,
    /// reduce record the attendance was booked against, if any
    pub record_ref_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSchedule {
    pub ref_id: i64,
    pub teacher_name: String,
    pub class_type: ClassType,
    pub class_level: ClassLevel,
    pub class_time: Option<DateTime<Utc>>,
    pub attendance: Vec<Attendance>,
}

impl RemoteSchedule {
    pub fn from_raw(raw: &RawRecord) -> AppResult<Self> {
        let ref_id = raw.id()?;
        let rows = raw.subtable(ATTENDANCE);
        if rows.is_empty() {
            return Err(AppError::InvalidRecord {
                record_ref_id: ref_id.to_string(),
                reason: "attendance table is empty".to_string(),
            });
        }

        let mut attendance = Vec::with_capacity(rows.len());
        for row in &rows {
            attendance.push(Attendance {
                identity: identity_of(row)?,
                record_ref_id: row.number(RECORD_ID)?,
            });
        }

        Ok(Self {
            ref_id,
            teacher_name: raw.text(TEACHER_NAME),
            class_type: ClassType::from_label(&raw.text(CLASS_TYPE)),
            class_level: ClassLevel::from_label(&raw.text(CLASS_LEVEL)),
            class_time: raw.datetime(CLASS_TIME)?,
            attendance,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettleRecord {
    pub ref_id: i64,
    pub identity: StudentIdentity,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub clear_points: f64,
}

impl RemoteSettleRecord {
    pub fn from_raw(raw: &RawRecord) -> AppResult<Self> {
        let ref_id = raw.id()?;
        let missing = |field: &str| AppError::InvalidRecord {
            record_ref_id: ref_id.to_string(),
            reason: format!("{}: missing date", field),
        };
        Ok(Self {
            ref_id,
            identity: identity_of(raw)?,
            start_date: raw.date(START_TIME)?.ok_or_else(|| missing(START_TIME))?,
            end_date: raw.date(END_TIME)?.ok_or_else(|| missing(END_TIME))?,
            clear_points: raw.number_or_zero(CLEAR_POINTS)?,
        })
    }

    /// Insert body for a new settle record
    pub fn insert_body(
        identity: &StudentIdentity,
        start_date: NaiveDate,
        end_date: NaiveDate,
        clear_points: f64,
    ) -> Value {
        json!({
            STUDENT_NAME: value(identity.compose()),
            START_TIME: value(start_date.format(DATE_FORMAT).to_string()),
            END_TIME: value(end_date.format(DATE_FORMAT).to_string()),
            CLEAR_POINTS: value(clear_points.to_string()),
        })
    }
}
