// In-process stand-in for the Kintone records API.
//
// Evaluates query conditions against seeded records, assigns ids on insert and
// merges field values on update. Every call is recorded so tests can assert on
// the traffic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use tokio::sync::Mutex;

use super::client::{KintoneApi, KintoneApp, RecordPage, RecordUpdate, BATCH_WRITE_LIMIT};
use super::fields::{RawRecord, DATE_FORMAT, ID_FIELD};
use super::query::{Condition, RecordQuery};
use super::records::ATTENDANCE;
use crate::error::{AppResult, KintoneError};

#[derive(Default)]
struct FakeState {
    apps: HashMap<KintoneApp, Vec<Value>>,
    offsets: HashMap<KintoneApp, Vec<usize>>,
    queries: HashMap<KintoneApp, Vec<RecordQuery>>,
    add_batches: HashMap<KintoneApp, Vec<usize>>,
    updates: HashMap<KintoneApp, Vec<RecordUpdate>>,
    fail_get_offset: HashMap<KintoneApp, usize>,
    fail_add: HashSet<KintoneApp>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct FakeKintone {
    state: Arc<Mutex<FakeState>>,
}

fn compare(left: &str, right: &str) -> std::cmp::Ordering {
    if let (Ok(a), Ok(b)) = (DateTime::parse_from_rfc3339(left), DateTime::parse_from_rfc3339(right)) {
        return a.cmp(&b);
    }
    if let (Ok(a), Ok(b)) = (
        NaiveDate::parse_from_str(left, DATE_FORMAT),
        NaiveDate::parse_from_str(right, DATE_FORMAT),
    ) {
        return a.cmp(&b);
    }
    left.cmp(right)
}

fn matches(record: &RawRecord, condition: &Condition) -> bool {
    match condition {
        Condition::Eq(field, value) => record.text(field) == *value,
        Condition::Ge(field, value) => {
            let actual = record.text(field);
            !actual.is_empty() && compare(&actual, value).is_ge()
        }
        Condition::Le(field, value) => {
            let actual = record.text(field);
            !actual.is_empty() && compare(&actual, value).is_le()
        }
        // subtable fields match when any row carries one of the values
        Condition::In(field, values) => {
            values.contains(&record.text(field))
                || record
                    .subtable(ATTENDANCE)
                    .iter()
                    .any(|row| values.contains(&row.text(field)))
        }
    }
}

fn merge(target: &mut Value, fields: &Value) {
    if let (Some(target), Some(fields)) = (target.as_object_mut(), fields.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn api_error(code: &str, message: impl Into<String>) -> KintoneError {
    KintoneError::Api {
        status: 400,
        code: code.to_string(),
        message: message.into(),
    }
}

impl FakeKintone {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                next_id: 1000,
                ..Default::default()
            })),
        }
    }

    pub async fn seed(&self, app: KintoneApp, records: Vec<Value>) {
        let mut state = self.state.lock().await;
        state.apps.entry(app).or_default().extend(records);
    }

    /// Replaces the whole remote data set of `app`
    pub async fn replace(&self, app: KintoneApp, records: Vec<Value>) {
        let mut state = self.state.lock().await;
        state.apps.insert(app, records);
    }

    pub async fn records(&self, app: KintoneApp) -> Vec<Value> {
        let state = self.state.lock().await;
        state.apps.get(&app).cloned().unwrap_or_default()
    }

    pub async fn requested_offsets(&self, app: KintoneApp) -> Vec<usize> {
        let state = self.state.lock().await;
        state.offsets.get(&app).cloned().unwrap_or_default()
    }

    pub async fn queries(&self, app: KintoneApp) -> Vec<RecordQuery> {
        let state = self.state.lock().await;
        state.queries.get(&app).cloned().unwrap_or_default()
    }

    pub async fn add_batches(&self, app: KintoneApp) -> Vec<usize> {
        let state = self.state.lock().await;
        state.add_batches.get(&app).cloned().unwrap_or_default()
    }

    pub async fn updates(&self, app: KintoneApp) -> Vec<RecordUpdate> {
        let state = self.state.lock().await;
        state.updates.get(&app).cloned().unwrap_or_default()
    }

    pub async fn fail_get_at_offset(&self, app: KintoneApp, offset: usize) {
        let mut state = self.state.lock().await;
        state.fail_get_offset.insert(app, offset);
    }

    pub async fn fail_adds(&self, app: KintoneApp) {
        let mut state = self.state.lock().await;
        state.fail_add.insert(app);
    }
}

#[async_trait]
impl KintoneApi for FakeKintone {
    async fn get_records(&self, app: KintoneApp, query: &RecordQuery) -> AppResult<RecordPage> {
        let mut state = self.state.lock().await;
        state.offsets.entry(app).or_default().push(query.offset);
        state.queries.entry(app).or_default().push(query.clone());

        if state.fail_get_offset.get(&app) == Some(&query.offset) {
            return Err(api_error("CB_IJ01", "injected page failure").into());
        }

        let matching: Vec<Value> = state
            .apps
            .get(&app)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| {
                        RawRecord::from_value((*record).clone())
                            .map(|raw| query.conditions().iter().all(|c| matches(&raw, c)))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let total_count = matching.len();
        let records = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.max(1))
            .collect();

        Ok(RecordPage { records, total_count })
    }

    async fn add_records(&self, app: KintoneApp, records: Vec<Value>) -> AppResult<Vec<i64>> {
        if records.len() > BATCH_WRITE_LIMIT {
            return Err(KintoneError::BatchTooLarge {
                size: records.len(),
                limit: BATCH_WRITE_LIMIT,
            }
            .into());
        }

        let mut state = self.state.lock().await;
        state.add_batches.entry(app).or_default().push(records.len());
        if state.fail_add.contains(&app) {
            return Err(api_error("GAIA_IL01", "injected insert failure").into());
        }

        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            state.next_id += 1;
            let id = state.next_id;
            merge(
                &mut record,
                &serde_json::json!({ ID_FIELD: { "type": "__ID__", "value": id.to_string() } }),
            );
            state.apps.entry(app).or_default().push(record);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update_records(&self, app: KintoneApp, updates: Vec<RecordUpdate>) -> AppResult<()> {
        if updates.len() > BATCH_WRITE_LIMIT {
            return Err(KintoneError::BatchTooLarge {
                size: updates.len(),
                limit: BATCH_WRITE_LIMIT,
            }
            .into());
        }

        let mut state = self.state.lock().await;
        state.updates.entry(app).or_default().extend(updates.iter().cloned());

        let records = state.apps.entry(app).or_default();
        for update in &updates {
            let (field, key, fields) = match update {
                RecordUpdate::ById { id, record } => (ID_FIELD, id, record),
                RecordUpdate::ByKey { update_key, record } => (update_key.field.as_str(), &update_key.value, record),
            };
            let target = records.iter_mut().find(|r| {
                RawRecord::from_value((*r).clone())
                    .map(|raw| raw.text(field) == *key)
                    .unwrap_or(false)
            });
            match target {
                Some(target) => merge(target, fields),
                None => return Err(api_error("GAIA_RE01", format!("no record with {} = {}", field, key)).into()),
            }
        }
        Ok(())
    }
}
