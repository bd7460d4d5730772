//! SQLite ledger store
//!
//! Rows keyed by `sequence`. Schema triggers reject sequence gaps, broken
//! `previous_hash` links, updates and deletes, so the chain invariants hold
//! even for writers that bypass this adapter.

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::ledger::{Digest, LedgerEntry};
use crate::store::{check_append, LedgerStore};

const SCHEMA: &str = include_str!("../../migrations/001_ledger_entries.sql");

const SELECT_COLUMNS: &str = "SELECT sequence, payload_hash, previous_hash, entry_hash, \
     merkle_root, timestamp_micros FROM ledger_entries";

/// Ledger store backed by an SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `database_url` (e.g. `sqlite://vault.db` or
    /// `sqlite::memory:`), creating the database and schema if needed
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is a separate database.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Connected SQLite ledger store at {}", database_url);
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
        let sequence: i64 = row.try_get("sequence")?;
        let timestamp_micros: i64 = row.try_get("timestamp_micros")?;
        let timestamp = DateTime::from_timestamp_micros(timestamp_micros).ok_or_else(|| {
            LedgerError::Serialization(format!(
                "timestamp {} of entry {} is out of range",
                timestamp_micros, sequence
            ))
        })?;

        Ok(LedgerEntry {
            sequence: u64::try_from(sequence).map_err(|_| {
                LedgerError::Serialization(format!("negative sequence {}", sequence))
            })?,
            payload_hash: Digest::from_hex(row.try_get("payload_hash")?)?,
            previous_hash: Digest::from_hex(row.try_get("previous_hash")?)?,
            entry_hash: Digest::from_hex(row.try_get("entry_hash")?)?,
            merkle_root_snapshot: Digest::from_hex(row.try_get("merkle_root")?)?,
            timestamp,
        })
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Serialization(format!("{} does not fit in an SQLite integer", value)))
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn persist_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let tail = sqlx::query(&format!("{} ORDER BY sequence DESC LIMIT 1", SELECT_COLUMNS))
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| Self::row_to_entry(&row))
            .transpose()?;
        check_append(tail.as_ref(), entry)?;

        sqlx::query(
            "INSERT INTO ledger_entries \
             (sequence, payload_hash, previous_hash, entry_hash, merkle_root, timestamp_micros) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(to_sql_int(entry.sequence)?)
        .bind(entry.payload_hash.to_hex())
        .bind(entry.previous_hash.to_hex())
        .bind(entry.entry_hash.to_hex())
        .bind(entry.merkle_root_snapshot.to_hex())
        .bind(entry.timestamp.timestamp_micros())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Inserted ledger entry {}", entry.sequence);
        Ok(())
    }

    async fn load_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!("{} ORDER BY sequence LIMIT ? OFFSET ?", SELECT_COLUMNS))
            .bind(limit)
            .bind(to_sql_int(cursor)?)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn load_tail(&self) -> Result<Option<LedgerEntry>> {
        sqlx::query(&format!("{} ORDER BY sequence DESC LIMIT 1", SELECT_COLUMNS))
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Self::row_to_entry(&row))
            .transpose()
    }

    async fn entry_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count.max(0) as u64)
    }
}
