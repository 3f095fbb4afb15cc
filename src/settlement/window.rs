use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};

use crate::config::SettlementConfig;
use crate::error::{AppError, AppResult};
use crate::ledger::models::TimeRange;

/// Leap year used to validate `MM/DD` anchors, so 02/29 is accepted
const PROBE_YEAR: i32 = 2000;

/// The yearly settlement anchors in the school's local offset
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCalendar {
    /// (month, day), sorted, unique
    anchors: Vec<(u32, u32)>,
    offset: FixedOffset,
}

fn parse_anchor(raw: &str) -> AppResult<(u32, u32)> {
    let invalid = || AppError::Config(format!("invalid settlement anchor {:?}, expected MM/DD", raw));
    let (month, day) = raw.trim().split_once('/').ok_or_else(invalid)?;
    let month: u32 = month.trim().parse().map_err(|_| invalid())?;
    let day: u32 = day.trim().parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(PROBE_YEAR, month, day).ok_or_else(invalid)?;
    Ok((month, day))
}

impl SettlementCalendar {
    pub fn new(anchors: &[String], utc_offset_hours: i32) -> AppResult<Self> {
        let mut parsed = anchors
            .iter()
            .map(|raw| parse_anchor(raw))
            .collect::<AppResult<Vec<_>>>()?;
        parsed.sort_unstable();
        parsed.dedup();
        if parsed.is_empty() {
            return Err(AppError::Config("at least one settlement anchor is required".to_string()));
        }

        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            AppError::Config(format!("utc offset {}h is out of range", utc_offset_hours))
        })?;

        Ok(Self { anchors: parsed, offset })
    }

    pub fn from_config(config: &SettlementConfig) -> AppResult<Self> {
        Self::new(&config.anchors, config.utc_offset_hours)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date at `now` in the school's offset
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn is_anchor(&self, date: NaiveDate) -> bool {
        self.anchors.contains(&(date.month(), date.day()))
    }

    /// The semester that closes on `date`: from the previous anchor at 00:00
    /// through one second before `date` at 00:00. `None` when `date` is not an
    /// anchor.
    pub fn window_for(&self, date: NaiveDate) -> AppResult<Option<TimeRange>> {
        let Some(index) = self.anchors.iter().position(|a| *a == (date.month(), date.day())) else {
            return Ok(None);
        };

        // the first anchor of the year closes the semester opened by last year's final anchor
        let (year, (month, day)) = match index {
            0 => (date.year() - 1, self.anchors[self.anchors.len() - 1]),
            i => (date.year(), self.anchors[i - 1]),
        };
        let start = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            AppError::Internal(format!("anchor {:02}/{:02} does not exist in {}", month, day, year))
        })?;
        let end = date - Duration::days(1);

        TimeRange::from_dates(start, end, self.offset)
            .map(Some)
            .ok_or_else(|| AppError::Internal(format!("cannot build settlement window for {}", date)))
    }
}
