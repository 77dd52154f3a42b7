use crate::config::DeliveryMode;
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Tracking row for one previously delivered record.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub journal_name: String,
    pub hash: String,
    pub error_message: Option<String>,
    pub delivered_at: i64,
}

/// Persistent store deciding at-most-once delivery, keyed by
/// (url, delivery mode). Also owns the feed bookkeeping tables used by the
/// syndication harvester. Single writer per run; the run context holds the
/// only handle.
pub struct DeliveryTracker {
    conn: Connection,
}

impl DeliveryTracker {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS delivered_records (
                url            TEXT NOT NULL,
                delivery_mode  TEXT NOT NULL,
                journal_name   TEXT NOT NULL,
                hash           TEXT NOT NULL,
                error_message  TEXT,
                delivered_at   INTEGER NOT NULL,
                PRIMARY KEY (url, delivery_mode)
            );
            CREATE TABLE IF NOT EXISTS rss_feeds (
                feed_url           TEXT PRIMARY KEY,
                last_build_date    INTEGER,
                last_harvested_at  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS rss_items (
                feed_url     TEXT NOT NULL,
                item_id      TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                PRIMARY KEY (feed_url, item_id)
            );
            "#,
        )?;
        Ok(DeliveryTracker { conn })
    }

    pub fn lookup(&self, mode: DeliveryMode, url: &str) -> Result<Option<TrackedEntry>> {
        let entry = self
            .conn
            .prepare(
                "SELECT journal_name, hash, error_message, delivered_at
                 FROM delivered_records WHERE url = ?1 AND delivery_mode = ?2",
            )?
            .query_row(params![url, mode.as_str()], |row| {
                Ok(TrackedEntry {
                    journal_name: row.get(0)?,
                    hash: row.get(1)?,
                    error_message: row.get(2)?,
                    delivered_at: row.get(3)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    /// True when this exact content was already delivered for (url, mode)
    /// and the previous attempt recorded no error. A changed hash or a
    /// recorded error permits re-delivery.
    pub fn already_delivered(&self, mode: DeliveryMode, url: &str, hash: &str) -> Result<bool> {
        Ok(match self.lookup(mode, url)? {
            Some(entry) => entry.hash == hash && entry.error_message.is_none(),
            None => false,
        })
    }

    pub fn record_delivery(
        &self,
        mode: DeliveryMode,
        url: &str,
        journal_name: &str,
        hash: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO delivered_records (url, delivery_mode, journal_name, hash, error_message, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(url, delivery_mode) DO UPDATE SET
                journal_name=excluded.journal_name,
                hash=excluded.hash,
                error_message=excluded.error_message,
                delivered_at=excluded.delivered_at",
            params![
                url,
                mode.as_str(),
                journal_name,
                hash,
                error_message,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// True when the stored build date for the feed proves the feed has not
    /// changed since the last harvest. An unknown feed is registered and
    /// always harvested; feeds without a usable build date are never skipped.
    pub fn feed_unchanged(&self, feed_url: &str, last_build_date: Option<i64>) -> Result<bool> {
        let stored: Option<Option<i64>> = self
            .conn
            .prepare("SELECT last_build_date FROM rss_feeds WHERE feed_url = ?1")?
            .query_row(params![feed_url], |row| row.get(0))
            .optional()?;

        match stored {
            None => {
                self.touch_feed(feed_url, last_build_date)?;
                Ok(false)
            }
            Some(stored_date) => match (stored_date, last_build_date) {
                (Some(stored), Some(new)) => Ok(stored >= new),
                _ => Ok(false),
            },
        }
    }

    /// Re-poll guard for feeds harvested on a fixed interval.
    pub fn feed_recently_harvested(&self, feed_url: &str, interval: Duration) -> Result<bool> {
        if interval.is_zero() {
            return Ok(false);
        }
        let last: Option<i64> = self
            .conn
            .prepare("SELECT last_harvested_at FROM rss_feeds WHERE feed_url = ?1")?
            .query_row(params![feed_url], |row| row.get(0))
            .optional()?;
        Ok(match last {
            Some(last) => Utc::now().timestamp() - last < interval.as_secs() as i64,
            None => false,
        })
    }

    pub fn touch_feed(&self, feed_url: &str, last_build_date: Option<i64>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rss_feeds (feed_url, last_build_date, last_harvested_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(feed_url) DO UPDATE SET
                last_build_date=excluded.last_build_date,
                last_harvested_at=excluded.last_harvested_at",
            params![feed_url, last_build_date, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn item_already_processed(&self, feed_url: &str, item_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .prepare("SELECT created_at FROM rss_items WHERE feed_url = ?1 AND item_id = ?2")?
            .query_row(params![feed_url, item_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn mark_item_processed(&self, feed_url: &str, item_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO rss_items (feed_url, item_id, created_at) VALUES (?1, ?2, ?3)",
            params![feed_url, item_id, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}
