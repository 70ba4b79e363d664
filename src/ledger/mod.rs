//! Cost ledger — the single-writer, per-`(email, date)` cost accumulator.
//!
//! Backed by an embedded SQLite database via `sqlx`. The pool is capped at
//! one connection, so every write is serialized by the pool itself rather
//! than by an application-level lock — the simplest way to honor the
//! "all operations are serialized" invariant without inventing a new
//! synchronization primitive for what is fundamentally a one-writer store.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

use crate::error::{Error, Result};

/// One day's accumulated cost.
#[derive(Debug, Clone, PartialEq)]
pub struct DayCost {
    /// UTC calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// Cumulative cost for that day, in dollars.
    pub cost: f64,
}

/// A usage report for one identity over a rolling window.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    /// The email the report covers.
    pub email: String,
    /// Window size, in UTC calendar days.
    pub days: u32,
    /// Sum of `cost` across the window.
    pub cost: f64,
    /// Per-day breakdown, ordered by date ascending.
    pub usage: Vec<DayCost>,
}

/// One row of a full ledger scan.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    /// Email the row belongs to.
    pub email: String,
    /// UTC calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// Cumulative cost for that `(email, date)`.
    pub cost: f64,
}

/// The cost ledger.
#[derive(Clone)]
pub struct CostLedger {
    pool: SqlitePool,
}

impl CostLedger {
    /// Connect to `database_url` and apply the ledger schema. The pool is
    /// capped at a single connection to serialize writes for the
    /// `(email, date)` accumulation invariant.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema migration fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        sqlx::raw_sql(include_str!("../../migrations/001_cost_ledger.sql"))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Build a ledger from an already-open pool (test convenience — no
    /// migration is applied here; callers that need the schema should call
    /// [`CostLedger::connect`] against `sqlite::memory:` instead).
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add `delta` (non-negative) to today's UTC-date row for `email`,
    /// creating the row lazily if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if `delta` is negative, or the write fails.
    pub async fn add(&self, email: &str, delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(Error::Internal(format!("ledger add: delta must be non-negative, got {delta}")));
        }
        let today = Utc::now().date_naive().to_string();

        sqlx::query(
            "INSERT INTO cost (email, date, cost) VALUES ($1, $2, $3)
             ON CONFLICT(email, date) DO UPDATE SET cost = cost + excluded.cost",
        )
        .bind(email)
        .bind(&today)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Unconditionally set the cost for `(email, date)`, overwriting any
    /// prior value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_cost(&self, email: &str, date: &str, value: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO cost (email, date, cost) VALUES ($1, $2, $3)
             ON CONFLICT(email, date) DO UPDATE SET cost = excluded.cost",
        )
        .bind(email)
        .bind(date)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sum `cost` for `email` over the trailing `days` UTC calendar days
    /// (inclusive of today).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn sum(&self, email: &str, days: u32) -> Result<f64> {
        let from = window_start(days).to_string();

        let row = sqlx::query("SELECT COALESCE(SUM(cost), 0.0) AS total FROM cost WHERE email = $1 AND date >= $2")
            .bind(email)
            .bind(&from)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<f64, _>("total"))
    }

    /// Build a [`UsageReport`] for `email` over the trailing `days` days.
    ///
    /// # Errors
    ///
    /// Returns an error if either query fails.
    pub async fn usage(&self, email: &str, days: u32) -> Result<UsageReport> {
        let from = window_start(days).to_string();

        let rows = sqlx::query("SELECT date, cost FROM cost WHERE email = $1 AND date >= $2 ORDER BY date ASC")
            .bind(email)
            .bind(&from)
            .fetch_all(&self.pool)
            .await?;

        let usage: Vec<DayCost> = rows
            .iter()
            .map(|r| DayCost {
                date: r.get("date"),
                cost: r.get("cost"),
            })
            .collect();

        let cost = usage.iter().map(|d| d.cost).sum();

        Ok(UsageReport {
            email: email.to_string(),
            days,
            cost,
            usage,
        })
    }

    /// Full ledger scan, for the admin usage listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn all_usage(&self) -> Result<Vec<LedgerRow>> {
        let rows = sqlx::query("SELECT email, date, cost FROM cost ORDER BY email ASC, date ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|r| LedgerRow {
                email: r.get("email"),
                date: r.get("date"),
                cost: r.get("cost"),
            })
            .collect())
    }
}

/// The earliest UTC calendar date included in a `days`-day trailing window
/// that ends today (inclusive).
fn window_start(days: u32) -> NaiveDate {
    let today = Utc::now().date_naive();
    today - ChronoDuration::days(i64::from(days.saturating_sub(1)))
}
