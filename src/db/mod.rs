pub mod migrations;
pub mod queries;

use anyhow::Context;
use rusqlite::Connection;

/// Open (or create) the booking store and bring its schema up to date.
/// `":memory:"` gives a throwaway database, which the tests rely on.
pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("failed to open booking store at {path}"))?;

    // Foreign keys must be on for period claims to reference their booking.
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;
    tracing::debug!(path, "booking store ready");

    Ok(conn)
}
