use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::models::period::{format_day, periods_from_string, periods_to_string};
use crate::models::{
    AttemptStatus, Booking, BookingState, CancelledBy, PaymentAttempt, Period, PeriodSet, Service,
    ServiceCategory, Transaction, TransactionStatus,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn parse_utc(s: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp: {s}"))
}

fn now_ts() -> String {
    format_ts(&Utc::now().naive_utc())
}

// ── Services ──

const SERVICE_COLUMNS: &str = "id, vendor_id, name, category, price, capacity, duration, catering_packages, catering_menu, created_at";

pub fn create_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, vendor_id, name, category, price, capacity, duration, catering_packages, catering_menu, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            service.id,
            service.vendor_id,
            service.name,
            service.category.as_str(),
            service.price,
            service.capacity,
            service.duration,
            serde_json::to_string(&service.catering_packages)?,
            serde_json::to_string(&service.catering_menu)?,
            format_ts(&service.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let result = conn
        .query_row(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
            params![id],
            |row| Ok(parse_service_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn get_service_by_vendor(conn: &Connection, vendor_id: &str) -> anyhow::Result<Option<Service>> {
    let result = conn
        .query_row(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE vendor_id = ?1"),
            params![vendor_id],
            |row| Ok(parse_service_row(row)),
        )
        .optional()?;
    result.transpose()
}

fn parse_service_row(row: &rusqlite::Row) -> anyhow::Result<Service> {
    let category: String = row.get(3)?;
    let packages_json: String = row.get(7)?;
    let menu_json: String = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(Service {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        name: row.get(2)?,
        category: ServiceCategory::parse(&category)
            .with_context(|| format!("unknown service category: {category}"))?,
        price: row.get(4)?,
        capacity: row.get(5)?,
        duration: row.get(6)?,
        catering_packages: serde_json::from_str(&packages_json)
            .context("corrupt catering packages")?,
        catering_menu: serde_json::from_str(&menu_json).context("corrupt catering menu")?,
        created_at: parse_ts(&created_at)?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, user_id, vendor_id, service_id, date, periods, catering, total_price, status, \
     payment_id, payment_status, payment_amount, paid_at, cancelled_by, cancelled_at, special_requests, created_at, updated_at";

/// Result of trying to persist a booking together with its period claims.
#[derive(Debug, PartialEq)]
pub enum ClaimOutcome {
    Inserted,
    /// The periods that another booking already holds.
    Conflict(PeriodSet),
}

/// Insert a booking and claim its periods in one transaction. The primary
/// key on `period_claims` is what actually prevents double booking; any
/// earlier availability check is advisory.
pub fn insert_booking(conn: &mut Connection, booking: &Booking) -> anyhow::Result<ClaimOutcome> {
    let day = format_day(&booking.date);
    let tx = conn.transaction()?;

    let columns = StateColumns::from_state(&booking.state);
    tx.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        ),
        params![
            booking.id,
            booking.user_id,
            booking.vendor_id,
            booking.service_id,
            day,
            periods_to_string(&booking.periods),
            booking
                .catering
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            booking.total_price,
            columns.status,
            columns.payment_id,
            columns.payment_status,
            columns.payment_amount,
            columns.paid_at,
            columns.cancelled_by,
            columns.cancelled_at,
            booking.special_requests,
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
        ],
    )?;

    if booking.state.is_blocking() {
        for period in &booking.periods {
            let claimed = tx.execute(
                "INSERT INTO period_claims (service_id, date, period, booking_id) VALUES (?1, ?2, ?3, ?4)",
                params![booking.service_id, day, period.as_str(), booking.id],
            );
            match claimed {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    drop(tx);
                    let held = claimed_periods(conn, &booking.service_id, &booking.date)?;
                    let conflicting: PeriodSet =
                        booking.periods.intersection(&held).copied().collect();
                    return Ok(ClaimOutcome::Conflict(conflicting));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    tx.commit()?;
    Ok(ClaimOutcome::Inserted)
}

pub fn claimed_periods(
    conn: &Connection,
    service_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<PeriodSet> {
    let mut stmt =
        conn.prepare("SELECT period FROM period_claims WHERE service_id = ?1 AND date = ?2")?;
    let rows = stmt.query_map(params![service_id, format_day(date)], |row| {
        row.get::<_, String>(0)
    })?;

    let mut periods = PeriodSet::new();
    for row in rows {
        if let Some(p) = Period::parse(&row?) {
            periods.insert(p);
        }
    }
    Ok(periods)
}

/// Union of periods held by bookings on (service, day) whose status is in `statuses`.
pub fn booked_periods(
    conn: &Connection,
    service_id: &str,
    date: &NaiveDate,
    statuses: &[&str],
) -> anyhow::Result<PeriodSet> {
    let mut stmt = conn.prepare(
        "SELECT periods, status FROM bookings WHERE service_id = ?1 AND date = ?2",
    )?;
    let rows = stmt.query_map(params![service_id, format_day(date)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut periods = PeriodSet::new();
    for row in rows {
        let (raw, status) = row?;
        if statuses.contains(&status.as_str()) {
            periods.extend(periods_from_string(&raw));
        }
    }
    Ok(periods)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn get_bookings_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Booking>> {
    list_bookings(conn, "user_id", user_id)
}

pub fn get_bookings_for_vendor(conn: &Connection, vendor_id: &str) -> anyhow::Result<Vec<Booking>> {
    list_bookings(conn, "vendor_id", vendor_id)
}

fn list_bookings(conn: &Connection, column: &str, value: &str) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {column} = ?1 ORDER BY date DESC, created_at DESC"
    ))?;
    let rows = stmt.query_map(params![value], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Persist a new lifecycle state. Leaving the blocking set releases the
/// booking's period claims in the same statement batch, so callers that need
/// atomicity pass a transaction.
pub fn write_booking_state(
    conn: &Connection,
    id: &str,
    state: &BookingState,
) -> anyhow::Result<bool> {
    let columns = StateColumns::from_state(state);
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, payment_id = ?2, payment_status = ?3, payment_amount = ?4,
            paid_at = ?5, cancelled_by = ?6, cancelled_at = ?7, updated_at = ?8
         WHERE id = ?9",
        params![
            columns.status,
            columns.payment_id,
            columns.payment_status,
            columns.payment_amount,
            columns.paid_at,
            columns.cancelled_by,
            columns.cancelled_at,
            now_ts(),
            id,
        ],
    )?;

    if count > 0 && !state.is_blocking() {
        conn.execute("DELETE FROM period_claims WHERE booking_id = ?1", params![id])?;
    }
    Ok(count > 0)
}

pub fn update_booking_state(
    conn: &mut Connection,
    id: &str,
    state: &BookingState,
) -> anyhow::Result<bool> {
    let tx = conn.transaction()?;
    let updated = write_booking_state(&tx, id, state)?;
    tx.commit()?;
    Ok(updated)
}

struct StateColumns {
    status: &'static str,
    payment_id: Option<String>,
    payment_status: Option<&'static str>,
    payment_amount: Option<i64>,
    paid_at: Option<String>,
    cancelled_by: Option<&'static str>,
    cancelled_at: Option<String>,
}

impl StateColumns {
    fn from_state(state: &BookingState) -> Self {
        let mut columns = StateColumns {
            status: state.status_str(),
            payment_id: None,
            payment_status: None,
            payment_amount: None,
            paid_at: None,
            cancelled_by: None,
            cancelled_at: None,
        };
        match state {
            BookingState::Confirmed {
                payment: Some(attempt),
            } => {
                columns.payment_id = Some(attempt.payment_id.clone());
                columns.payment_status = Some(attempt.status.as_str());
                columns.payment_amount = Some(attempt.amount);
            }
            BookingState::Paid {
                payment_id,
                amount,
                paid_at,
            } => {
                columns.payment_id = Some(payment_id.clone());
                columns.payment_status = Some("completed");
                columns.payment_amount = Some(*amount);
                columns.paid_at = Some(paid_at.to_rfc3339());
            }
            BookingState::Cancelled { by, at } => {
                columns.cancelled_by = Some(by.as_str());
                columns.cancelled_at = Some(at.to_rfc3339());
            }
            BookingState::Pending
            | BookingState::Confirmed { payment: None }
            | BookingState::Completed => {}
        }
        columns
    }
}

fn parse_state(row: &rusqlite::Row) -> anyhow::Result<BookingState> {
    let status: String = row.get(8)?;
    let payment_id: Option<String> = row.get(9)?;
    let payment_status: Option<String> = row.get(10)?;
    let payment_amount: Option<i64> = row.get(11)?;
    let paid_at: Option<String> = row.get(12)?;
    let cancelled_by: Option<String> = row.get(13)?;
    let cancelled_at: Option<String> = row.get(14)?;

    let state = match status.as_str() {
        "pending" => BookingState::Pending,
        "confirmed" => {
            let payment = match (payment_id, payment_status.as_deref(), payment_amount) {
                (Some(payment_id), Some(status), Some(amount)) => Some(PaymentAttempt {
                    payment_id,
                    amount,
                    status: if status == "failed" {
                        AttemptStatus::Failed
                    } else {
                        AttemptStatus::Pending
                    },
                }),
                _ => None,
            };
            BookingState::Confirmed { payment }
        }
        "paid" => BookingState::Paid {
            payment_id: payment_id.context("paid booking without payment id")?,
            amount: payment_amount.context("paid booking without amount")?,
            paid_at: parse_utc(paid_at.as_deref().context("paid booking without paidAt")?)?,
        },
        "cancelled" => BookingState::Cancelled {
            by: cancelled_by
                .as_deref()
                .and_then(CancelledBy::parse)
                .context("cancelled booking without a valid cancelledBy")?,
            at: parse_utc(
                cancelled_at
                    .as_deref()
                    .context("cancelled booking without cancelledAt")?,
            )?,
        },
        "completed" => BookingState::Completed,
        other => anyhow::bail!("unknown booking status: {other}"),
    };
    Ok(state)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let date: String = row.get(4)?;
    let periods: String = row.get(5)?;
    let catering: Option<String> = row.get(6)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;

    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        vendor_id: row.get(2)?,
        service_id: row.get(3)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("bad booking date: {date}"))?,
        periods: periods_from_string(&periods),
        catering: catering
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("corrupt catering selection")?,
        total_price: row.get(7)?,
        state: parse_state(row)?,
        special_requests: row.get(15)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Transactions ──

const TRANSACTION_COLUMNS: &str =
    "id, product_id, booking_id, gateway, provider_ref, amount, status, external_txn_id, created_at, updated_at";

pub fn insert_transaction(conn: &Connection, txn: &Transaction) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            txn.id,
            txn.product_id,
            txn.booking_id,
            txn.gateway,
            txn.provider_ref,
            txn.amount,
            txn.status.as_str(),
            txn.external_txn_id,
            format_ts(&txn.created_at),
            format_ts(&txn.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_transaction_by_provider_ref(
    conn: &Connection,
    provider_ref: &str,
) -> anyhow::Result<Option<Transaction>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE provider_ref = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            params![provider_ref],
            |row| Ok(parse_transaction_row(row)),
        )
        .optional()?;
    result.transpose()
}

#[cfg(test)]
pub(crate) fn get_transactions_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE booking_id = ?1 ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_transaction_row(row)))?;

    let mut txns = vec![];
    for row in rows {
        txns.push(row??);
    }
    Ok(txns)
}

fn parse_transaction_row(row: &rusqlite::Row) -> anyhow::Result<Transaction> {
    let status: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(Transaction {
        id: row.get(0)?,
        product_id: row.get(1)?,
        booking_id: row.get(2)?,
        gateway: row.get(3)?,
        provider_ref: row.get(4)?,
        amount: row.get(5)?,
        status: TransactionStatus::parse(&status),
        external_txn_id: row.get(7)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Record a new payment attempt: the ledger row and the booking's embedded
/// payment are written together or not at all.
pub fn record_payment_initiation(
    conn: &mut Connection,
    txn: &Transaction,
    state: &BookingState,
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    insert_transaction(&tx, txn)?;
    if !write_booking_state(&tx, &txn.booking_id, state)? {
        anyhow::bail!("booking {} disappeared during payment initiation", txn.booking_id);
    }
    tx.commit()?;
    Ok(())
}

/// Apply a gateway outcome to both the ledger and the booking atomically.
/// `state` is `None` when the booking itself does not change.
pub fn reconcile_payment(
    conn: &mut Connection,
    txn_id: &str,
    status: TransactionStatus,
    external_txn_id: Option<&str>,
    booking_id: &str,
    state: Option<&BookingState>,
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    let count = tx.execute(
        "UPDATE transactions SET status = ?1, external_txn_id = COALESCE(?2, external_txn_id), updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), external_txn_id, now_ts(), txn_id],
    )?;
    if count == 0 {
        anyhow::bail!("transaction {txn_id} not found");
    }
    if let Some(state) = state {
        if !write_booking_state(&tx, booking_id, state)? {
            anyhow::bail!("booking {booking_id} not found");
        }
    }
    tx.commit()?;
    Ok(())
}
