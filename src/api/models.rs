use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::ledger::models::TimeRange;
use crate::settlement::SettlementOutcome;
use crate::sync::{SyncReport, SyncScope};

fn no_slash(value: &str) -> Result<(), ValidationError> {
    if value.contains('/') {
        return Err(ValidationError::new("contains_slash"));
    }
    Ok(())
}

// ========== REQUEST MODELS ==========

/// Scope of an admin-triggered entity sync. Every field is optional: no
/// identity means every student, no dates means no time window.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SyncRequest {
    #[validate(length(min = 1, max = 100), custom = "no_slash")]
    pub student_name: Option<String>,

    #[validate(length(min = 1, max = 30), custom = "no_slash")]
    pub parent_phone: Option<String>,

    /// First local day of the window
    pub start: Option<NaiveDate>,

    /// Last local day of the window, inclusive
    pub end: Option<NaiveDate>,

    /// Run in the foreground and answer with the report
    #[serde(default)]
    pub wait: bool,
}

impl SyncRequest {
    pub fn scope(&self, offset: chrono::FixedOffset) -> AppResult<SyncScope> {
        let identity = match (&self.student_name, &self.parent_phone) {
            (Some(name), Some(phone)) => Some(StudentIdentity::try_new(name, phone)?),
            (None, None) => None,
            _ => {
                return Err(AppError::BadRequest(
                    "student_name and parent_phone must be given together".to_string(),
                ))
            }
        };

        let range = match (self.start, self.end) {
            (Some(start), Some(end)) => {
                if start > end {
                    return Err(AppError::BadRequest(format!("start {} is after end {}", start, end)));
                }
                let range = TimeRange::from_dates(start, end, offset)
                    .ok_or_else(|| AppError::BadRequest("date range is not representable".to_string()))?;
                Some(range)
            }
            (None, None) => None,
            _ => {
                return Err(AppError::BadRequest(
                    "start and end must be given together".to_string(),
                ))
            }
        };

        Ok(SyncScope { identity, range })
    }
}

/// One student, addressed by name and parent phone
#[derive(Debug, Deserialize, Validate)]
pub struct StudentRequest {
    #[validate(length(min = 1, max = 100), custom = "no_slash")]
    pub student_name: String,

    #[validate(length(min = 1, max = 30), custom = "no_slash")]
    pub parent_phone: String,
}

impl StudentRequest {
    pub fn identity(&self) -> AppResult<StudentIdentity> {
        Ok(StudentIdentity::try_new(&self.student_name, &self.parent_phone)?)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SettlementRequest {
    /// Local date to settle for, today when absent
    pub date: Option<NaiveDate>,
}

/// Webhook event types sent by the remote app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventType {
    AddRecord,
    UpdateRecord,
    UpdateStatus,
    DeleteRecord,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookApp {
    pub id: String,
    pub name: String,
}

/// Outbound webhook body as posted by the remote app
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WebhookPayload {
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(rename = "type")]
    pub event: WebhookEventType,

    pub app: WebhookApp,

    /// Only sent with DELETE_RECORD
    #[serde(rename = "recordId")]
    pub record_id: Option<String>,

    /// Full record for add and update events
    pub record: Option<Value>,
}

impl WebhookPayload {
    /// Reference id of the deleted record
    pub fn deleted_ref_id(&self) -> AppResult<i64> {
        let raw = self
            .record_id
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("DELETE_RECORD without recordId".to_string()))?;
        raw.trim()
            .parse()
            .map_err(|_| AppError::BadRequest(format!("recordId {:?} is not a number", raw)))
    }

    /// Remote record id for log lines, `recordId` or the record's own `$id`
    pub fn ref_label(&self) -> String {
        self.record_id
            .clone()
            .or_else(|| {
                self.record
                    .as_ref()
                    .and_then(|r| r.pointer("/$id/value"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "?".to_string())
    }
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Returned for work accepted into the background
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: String,
    pub message: String,
}

impl AcceptedResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "accepted".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentSyncResponse {
    pub student: String,
    pub reports: Vec<SyncReport>,
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub date: NaiveDate,
    pub outcome: SettlementOutcome,
}
