//! Installed generation records.
//!
//! An install commits its shell entries and its `generations` row in one
//! transaction, so a row exists only for a generation whose shell is
//! complete. The active pointer survives restarts and lets a failed upgrade
//! fall back to the generation that was serving before.

use super::connection::CacheDb;
use super::format_timestamp;
use super::stores::{Entry, StoreHandle, upsert_entry};
use crate::Error;
use chrono::Utc;
use serde::Serialize;
use tokio_rusqlite::{params, rusqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRecord {
    pub version: String,
    pub static_store: String,
    pub dynamic_store: String,
    pub installed_at: String,
    /// Set while this generation is the one serving requests.
    pub activated_at: Option<String>,
}

const SELECT_GENERATION: &str =
    "SELECT version, static_store, dynamic_store, installed_at, activated_at FROM generations";

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationRecord> {
    Ok(GenerationRecord {
        version: row.get(0)?,
        static_store: row.get(1)?,
        dynamic_store: row.get(2)?,
        installed_at: row.get(3)?,
        activated_at: row.get(4)?,
    })
}

impl CacheDb {
    /// Commit a finished install in a single transaction.
    ///
    /// Creates both stores, replaces the static store's contents with
    /// `shell` and records the generation. On any error nothing is written.
    pub async fn commit_install(
        &self,
        version: &str,
        static_store: &StoreHandle,
        dynamic_store: &StoreHandle,
        shell: &[(String, Entry)],
    ) -> Result<GenerationRecord, Error> {
        if version.trim().is_empty() {
            return Err(Error::InvalidInput("version cannot be empty".into()));
        }

        let rows = shell
            .iter()
            .map(|(key, entry)| Ok((key.clone(), entry.clone(), serde_json::to_string(&entry.response.headers)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        let record = GenerationRecord {
            version: version.to_string(),
            static_store: static_store.name().to_string(),
            dynamic_store: dynamic_store.name().to_string(),
            installed_at: format_timestamp(Utc::now()),
            activated_at: None,
        };
        let committed = record.clone();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for name in [&record.static_store, &record.dynamic_store] {
                    tx.execute(
                        "INSERT OR IGNORE INTO stores (name, created_at) VALUES (?1, ?2)",
                        params![name, record.installed_at],
                    )?;
                }

                tx.execute("DELETE FROM entries WHERE store_name = ?1", params![record.static_store])?;
                for (key, entry, headers_json) in &rows {
                    upsert_entry(&tx, &record.static_store, key, entry, headers_json)?;
                }

                tx.execute(
                    "INSERT INTO generations (version, static_store, dynamic_store, installed_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(version) DO UPDATE SET
                        static_store = excluded.static_store,
                        dynamic_store = excluded.dynamic_store,
                        installed_at = excluded.installed_at",
                    params![record.version, record.static_store, record.dynamic_store, record.installed_at],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(committed)
    }

    /// Record of a completed install, if any.
    pub async fn generation(&self, version: &str) -> Result<Option<GenerationRecord>, Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<Option<GenerationRecord>, Error> {
                let mut stmt = conn.prepare(&format!("{SELECT_GENERATION} WHERE version = ?1"))?;
                match stmt.query_row(params![version], read_record) {
                    Ok(record) => Ok(Some(record)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// The generation last marked active.
    pub async fn active_generation(&self) -> Result<Option<GenerationRecord>, Error> {
        self.conn
            .call(move |conn| -> Result<Option<GenerationRecord>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_GENERATION} WHERE activated_at IS NOT NULL ORDER BY activated_at DESC LIMIT 1"
                ))?;
                match stmt.query_row([], read_record) {
                    Ok(record) => Ok(Some(record)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Make `version` the only active generation.
    ///
    /// Returns false if no completed install is recorded for it, in which
    /// case nothing changes.
    pub async fn mark_generation_active(&self, version: &str) -> Result<bool, Error> {
        let version = version.to_string();
        let activated_at = format_timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE generations SET activated_at = ?2 WHERE version = ?1",
                    params![version, activated_at],
                )?;
                if updated == 0 {
                    return Ok(false);
                }
                tx.execute("UPDATE generations SET activated_at = NULL WHERE version != ?1", params![version])?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentRequest, CapturedResponse};
    use url::Url;

    fn shell(paths: &[&str]) -> Vec<(String, Entry)> {
        paths
            .iter()
            .map(|path| {
                let request = AgentRequest::get(Url::parse(&format!("https://farm.example{path}")).unwrap());
                let entry = Entry::capture(&request, &CapturedResponse::new(200, *path));
                (request.cache_key(), entry)
            })
            .collect()
    }

    fn stores(version: &str) -> (StoreHandle, StoreHandle) {
        (StoreHandle::named(format!("harrow-static-{version}")), StoreHandle::named(format!("harrow-dynamic-{version}")))
    }

    #[tokio::test]
    async fn test_commit_install_writes_everything() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (static_store, dynamic_store) = stores("v1");

        let record = db.commit_install("v1", &static_store, &dynamic_store, &shell(&["/", "/shell.js"])).await.unwrap();

        assert_eq!(record.static_store, "harrow-static-v1");
        assert!(record.activated_at.is_none());
        assert_eq!(db.list_store_names().await.unwrap(), ["harrow-dynamic-v1", "harrow-static-v1"]);
        assert_eq!(db.list_keys(&static_store).await.unwrap().len(), 2);
        assert_eq!(db.generation("v1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_commit_install_replaces_static_contents() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (static_store, dynamic_store) = stores("v1");
        db.commit_install("v1", &static_store, &dynamic_store, &shell(&["/", "/old.js"])).await.unwrap();

        db.commit_install("v1", &static_store, &dynamic_store, &shell(&["/"])).await.unwrap();

        assert_eq!(db.list_keys(&static_store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (static_store, dynamic_store) = stores("v1");
        let shell = shell(&["/", "/shell.js"]);
        let poisoned = shell[1].0.clone();
        db.conn
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TRIGGER fail_write BEFORE INSERT ON entries WHEN NEW.key = '{poisoned}'
                     BEGIN SELECT RAISE(ABORT, 'disk full'); END;"
                ))
            })
            .await
            .unwrap();

        let result = db.commit_install("v1", &static_store, &dynamic_store, &shell).await;

        assert!(matches!(result, Err(Error::Database(_))));
        assert!(db.list_store_names().await.unwrap().is_empty());
        assert!(db.generation("v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_plain_stores_are_not_an_install() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store("harrow-static-v1").await.unwrap();
        db.open_store("harrow-dynamic-v1").await.unwrap();

        assert!(db.generation("v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_active_moves_pointer() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for version in ["v1", "v2"] {
            let (static_store, dynamic_store) = stores(version);
            db.commit_install(version, &static_store, &dynamic_store, &shell(&["/"])).await.unwrap();
        }
        assert!(db.active_generation().await.unwrap().is_none());

        assert!(db.mark_generation_active("v1").await.unwrap());
        assert_eq!(db.active_generation().await.unwrap().unwrap().version, "v1");

        assert!(db.mark_generation_active("v2").await.unwrap());
        assert_eq!(db.active_generation().await.unwrap().unwrap().version, "v2");
        assert!(db.generation("v1").await.unwrap().unwrap().activated_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_unknown_version_keeps_pointer() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (static_store, dynamic_store) = stores("v1");
        db.commit_install("v1", &static_store, &dynamic_store, &shell(&["/"])).await.unwrap();
        db.mark_generation_active("v1").await.unwrap();

        assert!(!db.mark_generation_active("v9").await.unwrap());
        assert_eq!(db.active_generation().await.unwrap().unwrap().version, "v1");
    }

    #[tokio::test]
    async fn test_dropping_store_removes_record() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (static_store, dynamic_store) = stores("v1");
        db.commit_install("v1", &static_store, &dynamic_store, &shell(&["/"])).await.unwrap();

        db.drop_store("harrow-dynamic-v1").await.unwrap();

        assert!(db.generation("v1").await.unwrap().is_none());
    }
}
