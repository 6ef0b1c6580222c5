//! Store and entry operations.
//!
//! A store is a named, isolated key→entry mapping. Entries are captured
//! responses replaced wholesale on every write; nothing here patches a row
//! in place, which keeps concurrent writers last-write-wins.

use super::connection::CacheDb;
use super::{format_timestamp, parse_timestamp};
use crate::{AgentRequest, CapturedResponse, Error};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_rusqlite::{params, rusqlite};

/// Handle to a named store.
///
/// Handles are plain names; obtaining one through [`CacheDb::open_store`]
/// guarantees the store exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StoreHandle {
    name: String,
}

impl StoreHandle {
    /// Refer to a store by name without creating it.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A captured response plus the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub method: String,
    pub url: String,
    pub response: CapturedResponse,
    /// RFC 3339, set once at capture time.
    pub stored_at: String,
}

impl Entry {
    /// Capture a response for the given request, stamped now.
    pub fn capture(request: &AgentRequest, response: &CapturedResponse) -> Self {
        Self::captured_at(request, response, Utc::now())
    }

    pub fn captured_at(request: &AgentRequest, response: &CapturedResponse, at: DateTime<Utc>) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.to_string(),
            response: response.clone(),
            stored_at: format_timestamp(at),
        }
    }

    pub fn stored_time(&self) -> Result<DateTime<Utc>, Error> {
        parse_timestamp(&self.stored_at)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Result<chrono::Duration, Error> {
        Ok(now - self.stored_time()?)
    }
}

/// Per-store summary for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub entries: u64,
    pub body_bytes: u64,
    pub oldest: Option<String>,
}

/// Outcome of [`CacheDb::drop_stores_except`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub dropped: Vec<String>,
    /// Stores that could not be deleted, with the reason.
    pub failed: Vec<(String, String)>,
}

struct EntryRow {
    method: String,
    url: String,
    status: u16,
    headers_json: String,
    body: Vec<u8>,
    stored_at: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<Entry, Error> {
        let headers: Vec<(String, String)> = serde_json::from_str(&self.headers_json)?;
        Ok(Entry {
            method: self.method,
            url: self.url,
            response: CapturedResponse { status: self.status, headers, body: self.body },
            stored_at: self.stored_at,
        })
    }
}

/// Whole-row upsert shared by single writes and install batches.
pub(super) fn upsert_entry(
    conn: &rusqlite::Connection,
    store_name: &str,
    key: &str,
    entry: &Entry,
    headers_json: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO entries (store_name, key, method, url, status, headers_json, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(store_name, key) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            store_name,
            key,
            entry.method,
            entry.url,
            entry.response.status,
            headers_json,
            entry.response.body,
            entry.stored_at,
        ],
    )
}

impl CacheDb {
    /// Open a store, creating it if absent.
    ///
    /// Idempotent: opening the same name twice yields the same store.
    pub async fn open_store(&self, name: &str) -> Result<StoreHandle, Error> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("store name cannot be empty".into()));
        }

        let owned = name.to_string();
        let created_at = format_timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO stores (name, created_at) VALUES (?1, ?2)",
                    params![owned, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(StoreHandle::named(name))
    }

    /// Get an entry by key.
    ///
    /// Returns None on a miss, including when the store doesn't exist.
    pub async fn get_entry(&self, store: &StoreHandle, key: &str) -> Result<Option<Entry>, Error> {
        let store_name = store.name.clone();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Entry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status, headers_json, body, stored_at
                     FROM entries WHERE store_name = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![store_name, key], |row| {
                    Ok(EntryRow {
                        method: row.get(0)?,
                        url: row.get(1)?,
                        status: row.get(2)?,
                        headers_json: row.get(3)?,
                        body: row.get(4)?,
                        stored_at: row.get(5)?,
                    })
                });

                match result {
                    Ok(row) => Ok(Some(row.into_entry()?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace an entry.
    ///
    /// Every column is overwritten, `stored_at` included; the prior entry is
    /// gone after this returns. Fails with `CacheMiss` if the store was
    /// never opened or has been dropped.
    pub async fn put_entry(&self, store: &StoreHandle, key: &str, entry: &Entry) -> Result<(), Error> {
        let store_name = store.name.clone();
        let key = key.to_string();
        let headers_json = serde_json::to_string(&entry.response.headers)?;
        let entry = entry.clone();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM stores WHERE name = ?1)",
                    params![store_name],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(Error::CacheMiss(format!("store {store_name} does not exist")));
                }

                upsert_entry(conn, &store_name, &key, &entry, &headers_json)?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an entry. Returns whether anything was removed.
    pub async fn delete_entry(&self, store: &StoreHandle, key: &str) -> Result<bool, Error> {
        let store_name = store.name.clone();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count =
                    conn.execute("DELETE FROM entries WHERE store_name = ?1 AND key = ?2", params![store_name, key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// List every key in a store, sorted.
    pub async fn list_keys(&self, store: &StoreHandle) -> Result<Vec<String>, Error> {
        let store_name = store.name.clone();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM entries WHERE store_name = ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![store_name], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// List every store name, sorted.
    pub async fn list_store_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM stores ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a store and all of its entries.
    pub async fn drop_store(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                // entries go with it via ON DELETE CASCADE
                let count = conn.execute("DELETE FROM stores WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every store whose name is not exactly in `allow`.
    ///
    /// Best-effort: a failed deletion is logged and recorded in the report,
    /// and the remaining stores are still processed. Only listing the stores
    /// can fail the whole call.
    pub async fn drop_stores_except(&self, allow: &[&str]) -> Result<DropReport, Error> {
        let mut report = DropReport::default();

        for name in self.list_store_names().await? {
            if allow.contains(&name.as_str()) {
                continue;
            }
            match self.drop_store(&name).await {
                Ok(_) => {
                    tracing::info!(store = %name, "dropped stale store");
                    report.dropped.push(name);
                }
                Err(e) => {
                    tracing::warn!(store = %name, error = %e, "failed to drop store, leaving it for the next activation");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Look a key up in each store in order and return the first hit.
    pub async fn find_in_stores(&self, stores: &[&StoreHandle], key: &str) -> Result<Option<(StoreHandle, Entry)>, Error> {
        for store in stores {
            if let Some(entry) = self.get_entry(store, key).await? {
                return Ok(Some(((*store).clone(), entry)));
            }
        }
        Ok(None)
    }

    /// Delete entries in a store written strictly before `cutoff`.
    ///
    /// Returns the number of deleted entries.
    pub async fn evict_older_than(&self, store: &StoreHandle, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let store_name = store.name.clone();
        let cutoff = format_timestamp(cutoff);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE store_name = ?1 AND stored_at < ?2",
                    params![store_name, cutoff],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Entry count, body size and oldest entry per store.
    pub async fn store_stats(&self) -> Result<Vec<StoreStats>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<StoreStats>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT s.name, COUNT(e.key), COALESCE(SUM(LENGTH(e.body)), 0), MIN(e.stored_at)
                     FROM stores s LEFT JOIN entries e ON e.store_name = s.name
                     GROUP BY s.name ORDER BY s.name",
                )?;
                let stats = stmt
                    .query_map([], |row| {
                        Ok(StoreStats {
                            name: row.get(0)?,
                            entries: row.get::<_, i64>(1)? as u64,
                            body_bytes: row.get::<_, i64>(2)? as u64,
                            oldest: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}
