// Shared fixtures for the sync and settlement tests.

use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};

use super::SyncContext;
use crate::config::SyncPoolConfig;
use crate::kintone::fake::FakeKintone;
use crate::ledger::memory::MemoryLedger;
use crate::ledger::models::{Mode, Student};
use crate::snowflake::IdGenerator;

pub fn context(ledger: &MemoryLedger, fake: &FakeKintone) -> SyncContext {
    SyncContext {
        store: Arc::new(ledger.clone()),
        kintone: Arc::new(fake.clone()),
        ids: Arc::new(IdGenerator::new(1).unwrap()),
        page_limit: 100,
        offset: FixedOffset::east_opt(8 * 3600).unwrap(),
    }
}

pub fn serial_pools() -> SyncPoolConfig {
    SyncPoolConfig {
        student: 1,
        point_card: 1,
        deposit_record: 1,
        reduce_record: 1,
        schedule: 1,
        semester_settle_record: 1,
    }
}

pub fn student_row(id: i64, name: &str, phone: &str) -> Student {
    let now = Utc::now();
    Student {
        student_id: id,
        student_ref_id: Some(id),
        user_id: id,
        student_name: name.to_string(),
        parent_name: "Parent".to_string(),
        parent_phone: phone.to_string(),
        mode: Mode::Semester,
        is_settle_normally: true,
        is_deleted: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Puts a live semester student straight into the ledger, bypassing the write counter
pub async fn seed_student(ledger: &MemoryLedger, id: i64, name: &str, phone: &str) {
    let student = student_row(id, name, phone);
    ledger
        .with_state(move |state| {
            state.students.insert(student.student_id, student);
        })
        .await;
}

fn id_field(id: i64) -> Value {
    json!({ "type": "__ID__", "value": id.to_string() })
}

pub fn student_json(id: i64, name: &str, phone: &str, mode: &str) -> Value {
    json!({
        "$id": id_field(id),
        "studentName": { "value": name },
        "parentName": { "value": "Parent" },
        "parentPhone": { "value": phone },
        "mode": { "value": mode },
        "isSettleNormally": { "value": "是" }
    })
}

pub fn point_card_json(id: i64, student: &str, rest_points: f64) -> Value {
    json!({
        "$id": id_field(id),
        "studentName": { "value": student },
        "restPoints": { "value": rest_points.to_string() }
    })
}

pub fn deposit_json(id: i64, student: &str, charging_date: &str, points: i32) -> Value {
    json!({
        "$id": id_field(id),
        "studentName": { "value": student },
        "chargingDate": { "value": charging_date },
        "chargingMethod": { "value": ["現金"] },
        "chargingAmount": { "value": (points * 300).to_string() },
        "actualChargingAmount": { "value": (points * 300).to_string() },
        "teacherName": { "value": "Tom" },
        "depositedPoints": { "value": points.to_string() },
        "chargingStatus": { "value": "已入款" }
    })
}

pub fn reduce_json(id: i64, student: &str, class_time: &str, points: f64) -> Value {
    json!({
        "$id": id_field(id),
        "studentName": { "value": student },
        "classType": { "value": "一對一" },
        "classLevel": { "value": "Level 1" },
        "classTime": { "value": class_time },
        "teacherName": { "value": "Tom" },
        "reducePoints": { "value": points.to_string() },
        "attendStatus": { "value": ["出席"] }
    })
}

pub fn schedule_json(id: i64, class_time: &str, students: &[&str]) -> Value {
    let rows: Vec<Value> = students
        .iter()
        .enumerate()
        .map(|(i, student)| {
            json!({
                "id": (i + 1).to_string(),
                "value": {
                    "studentName": { "value": student },
                    "recordId": { "value": "" }
                }
            })
        })
        .collect();
    json!({
        "$id": id_field(id),
        "teacherName": { "value": "Tom" },
        "classType": { "value": "團課" },
        "classLevel": { "value": "Level 2" },
        "classTime": { "value": class_time },
        "attendance": { "value": rows }
    })
}

pub fn settle_json(id: i64, student: &str, start: &str, end: &str, clear_points: f64) -> Value {
    json!({
        "$id": id_field(id),
        "studentName": { "value": student },
        "startTime": { "value": start },
        "endTime": { "value": end },
        "clearPoints": { "value": clear_points.to_string() }
    })
}
