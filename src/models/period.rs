use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One of the three exclusive same-day blocks a service is booked in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Morning,
    Day,
    Evening,
}

impl Period {
    #[cfg(test)]
    pub const ALL: [Period; 3] = [Period::Morning, Period::Day, Period::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Day => "day",
            Period::Evening => "evening",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Some(Period::Morning),
            "day" => Some(Period::Day),
            "evening" => Some(Period::Evening),
            _ => None,
        }
    }
}

pub type PeriodSet = BTreeSet<Period>;

/// Reduce a requested date to the calendar day that availability is keyed on.
///
/// Accepts a bare `YYYY-MM-DD` or an RFC 3339 timestamp; timestamps are
/// converted to UTC before the time component is dropped, so the reservation
/// path and the availability index always agree on the day boundary.
pub fn normalize_day(raw: &str) -> anyhow::Result<NaiveDate> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(day);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .map_err(|_| anyhow::anyhow!("invalid date: {raw}"))
}

pub fn format_day(day: &NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn periods_to_string(periods: &PeriodSet) -> String {
    periods
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn periods_from_string(s: &str) -> PeriodSet {
    s.split(',').filter_map(Period::parse).collect()
}
