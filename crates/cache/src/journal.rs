//! Bookkeeping for cached blobs.

use crate::Database;
use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use sqlx::SqlitePool;
use std::str::FromStr;
use time::OffsetDateTime;

/// What a cache entry holds.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum EntryKind {
    #[display("image")]
    Image,
    #[display("pages")]
    PageList,
}

impl FromStr for EntryKind {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(EntryKind::Image),
            "pages" => Ok(EntryKind::PageList),
            _ => exn::bail!(ErrorKind::InvalidData("entry kind")),
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    kind: String,
    size: i64,
    last_used: i64,
    stored_at: i64,
}

/// A journal row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub key: String,
    pub kind: EntryKind,
    pub size: u64,
    pub last_used: i64,
    pub stored_at: OffsetDateTime,
}

impl TryFrom<EntryRow> for Entry {
    type Error = crate::error::Error;
    fn try_from(row: EntryRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            key: row.key,
            kind: row.kind.parse()?,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("entry size"))?,
            last_used: row.last_used,
            stored_at: OffsetDateTime::from_unix_timestamp(row.stored_at)
                .or_raise(|| ErrorKind::InvalidData("stored at"))?,
        })
    }
}

/// Journal of cache entries, ordered by a logical use clock.
///
/// The clock is a counter rather than a timestamp so two touches in the same
/// instant still have a well-defined order.
#[derive(Debug, Clone)]
pub(crate) struct Journal {
    pool: SqlitePool,
}

impl From<&Database> for Journal {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl Journal {
    /// Insert or replace an entry and mark it most recently used.
    pub async fn record(&self, key: &str, kind: EntryKind, size: usize) -> Result<()> {
        let size = i64::try_from(size).or_raise(|| ErrorKind::InvalidData("entry size"))?;
        sqlx::query(include_str!("../queries/upsert_entry.sql"))
            .bind(key)
            .bind(kind.to_string())
            .bind(size)
            .bind(OffsetDateTime::now_utc().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Mark an entry most recently used. Returns `false` if it isn't recorded.
    pub async fn touch(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/touch_entry.sql"))
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Entry::try_from).transpose()
    }

    /// Remove an entry. Returns `false` if it wasn't recorded.
    pub async fn forget(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_entry.sql"))
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// All entries, least recently used first.
    pub async fn list_lru(&self) -> Result<Vec<Entry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_entries_lru.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Entry::try_from).collect()
    }

    pub async fn total_size(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(include_str!("../queries/total_size.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(total).or_raise(|| ErrorKind::InvalidData("total size"))
    }
}
