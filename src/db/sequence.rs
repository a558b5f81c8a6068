//! Gap-free counters backing human-readable order numbers.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};

use super::Db;

/// Increment `key` and return the new value. Values start at 1.
///
/// Must run inside a transaction opened with `Db::immediate`: SQLite then
/// holds the write lock from before the read until commit, so concurrent
/// allocators queue up instead of reading the same value. The increment
/// commits or rolls back together with the row that consumes it.
pub fn next_value(conn: &Connection, key: &str) -> Result<i64> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT value FROM sequences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read sequence {}", key))?;

    let next = current.unwrap_or(0) + 1;
    conn.execute(
        "INSERT INTO sequences (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        params![key, next],
    )
    .with_context(|| format!("Failed to advance sequence {}", key))?;
    Ok(next)
}

/// Per-day key for repair-order numbers.
pub fn daily_key(prefix: &str, date: NaiveDate) -> String {
    format!("{}{}", prefix, date.format("%Y%m%d"))
}

/// Per-year key for asset numbers.
pub fn yearly_key(prefix: &str, date: NaiveDate) -> String {
    format!("{}{}", prefix, date.year())
}

/// `{prefix}{YYYYMMDD}{value:04}`. Values past 9999 print in full.
pub fn format_order_no(prefix: &str, date: NaiveDate, value: i64) -> String {
    format!("{}{:04}", daily_key(prefix, date), value)
}

/// `{prefix}{YYYY}{value:06}`.
pub fn format_asset_no(prefix: &str, date: NaiveDate, value: i64) -> String {
    format!("{}{:06}", yearly_key(prefix, date), value)
}

impl Db {
    /// Last value handed out for `key`, 0 if the key was never used.
    pub fn current_value(&self, key: &str) -> Result<i64> {
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM sequences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read sequence {}", key))?;
        Ok(value.unwrap_or(0))
    }

    /// Allocate one value in its own transaction.
    pub fn allocate(&self, key: &str) -> Result<i64> {
        let tx = self.immediate()?;
        let value = next_value(&tx, key)?;
        tx.commit().context("Failed to commit sequence allocation")?;
        Ok(value)
    }
}
