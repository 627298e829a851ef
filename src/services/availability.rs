use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::queries;
use crate::models::PeriodSet;

/// Which booking statuses count as occupying a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockingScope {
    /// Everything that is not cancelled. Used for reservation conflict checks.
    #[default]
    Blocking,
    /// Only bookings the vendor has accepted. Informational display only.
    Confirmed,
}

impl BlockingScope {
    pub fn statuses(&self) -> &'static [&'static str] {
        match self {
            BlockingScope::Blocking => &["pending", "confirmed", "paid", "completed"],
            BlockingScope::Confirmed => &["confirmed", "paid", "completed"],
        }
    }
}

/// Periods already taken on `date` for the service. Derived from the booking
/// records on every call.
pub fn booked_periods(
    conn: &Connection,
    service_id: &str,
    date: &NaiveDate,
    scope: BlockingScope,
) -> anyhow::Result<PeriodSet> {
    queries::booked_periods(conn, service_id, date, scope.statuses())
}
