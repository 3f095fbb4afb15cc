// Kintone field envelope helpers.
//
// Every field on the wire is `{"type": "...", "value": ...}`. Values are strings
// even for numbers, checkboxes carry string arrays and subtables carry
// `[{"id": "...", "value": {<fields>}}]`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

pub const ID_FIELD: &str = "$id";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `{"value": v}` ready to drop into a record body
pub fn value<T: Serialize>(v: T) -> Value {
    serde_json::json!({ "value": v })
}

/// One record as returned by the records API
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    pub fn from_value(v: Value) -> AppResult<Self> {
        match v {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(AppError::InvalidRecord {
                record_ref_id: "?".to_string(),
                reason: format!("record is not an object: {}", other),
            }),
        }
    }

    /// `$id` as an integer
    pub fn id(&self) -> AppResult<i64> {
        let raw = self.text(ID_FIELD);
        raw.trim().parse().map_err(|_| AppError::InvalidRecord {
            record_ref_id: raw.clone(),
            reason: "record id is not numeric".to_string(),
        })
    }

    fn invalid(&self, field: &str, reason: impl std::fmt::Display) -> AppError {
        AppError::InvalidRecord {
            record_ref_id: self.text(ID_FIELD),
            reason: format!("{}: {}", field, reason),
        }
    }

    fn raw_value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(|f| f.get("value"))
    }

    /// String value, empty when absent or null
    pub fn text(&self, field: &str) -> String {
        match self.raw_value(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Numeric field; an empty value reads as `None`
    pub fn number<T: std::str::FromStr>(&self, field: &str) -> AppResult<Option<T>> {
        let raw = self.text(field);
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse()
            .map(Some)
            .map_err(|_| self.invalid(field, format!("not a number: {:?}", raw)))
    }

    pub fn number_or_zero<T: std::str::FromStr + Default>(&self, field: &str) -> AppResult<T> {
        Ok(self.number(field)?.unwrap_or_default())
    }

    pub fn date(&self, field: &str) -> AppResult<Option<NaiveDate>> {
        let raw = self.text(field);
        if raw.trim().is_empty() {
            return Ok(None);
        }
        NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
            .map(Some)
            .map_err(|e| self.invalid(field, e))
    }

    pub fn datetime(&self, field: &str) -> AppResult<Option<DateTime<Utc>>> {
        let raw = self.text(field);
        if raw.trim().is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| self.invalid(field, e))
    }

    /// Checkbox / multi-select values
    pub fn strings(&self, field: &str) -> Vec<String> {
        match self.raw_value(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rows of a subtable field
    pub fn subtable(&self, field: &str) -> Vec<RawRecord> {
        match self.raw_value(field) {
            Some(Value::Array(rows)) => rows
                .iter()
                .filter_map(|row| row.get("value"))
                .filter_map(|v| v.as_object().cloned())
                .map(|fields| RawRecord { fields })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> RawRecord {
        RawRecord::from_value(json!({
            "$id": { "type": "__ID__", "value": "42" },
            "studentName": { "type": "SINGLE_LINE_TEXT", "value": "Amy/0911" },
            "reducePoints": { "type": "NUMBER", "value": "1.5" },
            "empty": { "type": "NUMBER", "value": "" },
            "chargingDate": { "type": "DATE", "value": "2025-03-04" },
            "classTime": { "type": "DATETIME", "value": "2025-03-04T02:00:00Z" },
            "chargingMethod": { "type": "CHECK_BOX", "value": ["現金", "刷卡"] },
            "attendance": { "type": "SUBTABLE", "value": [
                { "id": "9", "value": { "studentName": { "type": "SINGLE_LINE_TEXT", "value": "Bob/0922" } } }
            ]}
        }))
        .unwrap()
    }

    #[test]
    fn test_reads_typed_values() {
        let record = sample();
        assert_eq!(record.id().unwrap(), 42);
        assert_eq!(record.text("studentName"), "Amy/0911");
        assert_eq!(record.number::<f64>("reducePoints").unwrap(), Some(1.5));
        assert_eq!(record.number::<i32>("empty").unwrap(), None);
        assert_eq!(record.number_or_zero::<i32>("missing").unwrap(), 0);
        assert_eq!(
            record.date("chargingDate").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 4)
        );
        assert!(record.datetime("classTime").unwrap().is_some());
        assert_eq!(record.strings("chargingMethod"), vec!["現金", "刷卡"]);
        assert_eq!(record.subtable("attendance")[0].text("studentName"), "Bob/0922");
    }

    #[test]
    fn test_bad_number_is_invalid_record() {
        let record = RawRecord::from_value(json!({
            "$id": { "type": "__ID__", "value": "7" },
            "reducePoints": { "type": "NUMBER", "value": "abc" }
        }))
        .unwrap();
        let err = record.number::<f64>("reducePoints").unwrap_err();
        assert!(matches!(err, AppError::InvalidRecord { record_ref_id, .. } if record_ref_id == "7"));
    }

    #[test]
    fn test_write_envelope() {
        assert_eq!(value("3"), json!({ "value": "3" }));
    }
}
