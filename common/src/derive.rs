//! Calendar feature derivation
//!
//! This is the only place a trade timestamp is turned into `Trade_Day` and
//! `Trade_Hour`. The simulator's causal rules, the training loader and the
//! scoring path all call into it so the three can never drift apart.
//!
//! Convention (feature contract v1): naive timestamps are UTC wall-clock time.
//! Timestamps carrying an offset are converted to UTC first. A bare date means
//! midnight.

use crate::contract::WEEKDAYS;
use crate::trade::{EnrichedTrade, TradeRecord};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use thiserror::Error;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    #[error("unparseable trade timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("unknown weekday '{0}'")]
    InvalidWeekday(String),

    #[error("hour {0} is outside 0-23")]
    InvalidHour(u32),
}

const WEEKDAY_VALUES: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Calendar features derived from a trade timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    pub weekday: Weekday,
    /// Hour of day, 0-23
    pub hour: u32,
}

impl CalendarFeatures {
    /// Used by the scoring path when a request carries no trade timestamp.
    pub const SERVING_DEFAULT: CalendarFeatures = CalendarFeatures {
        weekday: Weekday::Mon,
        hour: 12,
    };

    /// Build from an explicit weekday name and hour, checked against the contract.
    pub fn from_parts(weekday: &str, hour: u32) -> Result<Self, DeriveError> {
        let idx = WEEKDAYS
            .iter()
            .position(|d| *d == weekday)
            .ok_or_else(|| DeriveError::InvalidWeekday(weekday.to_string()))?;
        if hour > 23 {
            return Err(DeriveError::InvalidHour(hour));
        }
        Ok(Self {
            weekday: WEEKDAY_VALUES[idx],
            hour,
        })
    }

    pub fn weekday_name(&self) -> &'static str {
        WEEKDAYS[self.weekday.num_days_from_monday() as usize]
    }
}

/// Parse a trade timestamp under the contract's UTC convention.
pub fn parse_trade_timestamp(raw: &str) -> Result<NaiveDateTime, DeriveError> {
    let raw = raw.trim();

    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| DeriveError::InvalidTimestamp(raw.to_string()))
}

/// Derive weekday and hour from a raw timestamp string.
pub fn derive_calendar(raw_timestamp: &str) -> Result<CalendarFeatures, DeriveError> {
    let ts = parse_trade_timestamp(raw_timestamp)?;
    Ok(CalendarFeatures {
        weekday: ts.weekday(),
        hour: ts.hour(),
    })
}

/// Turn a raw trade into the enriched record every model stage consumes.
pub fn derive_features(record: &TradeRecord) -> Result<EnrichedTrade, DeriveError> {
    let calendar = derive_calendar(&record.trade_date)?;
    Ok(EnrichedTrade::from_record(record, calendar))
}
