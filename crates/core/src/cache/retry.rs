//! Durable retry task persistence.
//!
//! Failed mutating requests are appended here and survive restarts. Rows are
//! only ever inserted or deleted by id; nothing rewrites a task.

use super::connection::CacheDb;
use super::format_timestamp;
use crate::{AgentRequest, Error};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use url::Url;

/// A previously failed mutating request awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTask {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub enqueued_at: String,
}

impl RetryTask {
    /// Snapshot a request as a new task with a fresh id.
    pub fn from_request(request: &AgentRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: request.url.to_string(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            enqueued_at: format_timestamp(Utc::now()),
        }
    }

    /// Rebuild the request for replay.
    ///
    /// Fails on tasks that cannot be replayed: empty id or method, or an
    /// unparseable URL.
    pub fn to_request(&self) -> Result<AgentRequest, Error> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("retry task has no id".into()));
        }
        if self.method.trim().is_empty() {
            return Err(Error::InvalidInput(format!("retry task {} has no method", self.id)));
        }
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.url)))?;

        let mut request = AgentRequest::new(&self.method, url);
        request.headers = self.headers.clone();
        request.body = self.body.clone();
        Ok(request)
    }
}

impl CacheDb {
    /// Append a task to the queue.
    ///
    /// Returns false if a task with the same id is already queued.
    pub async fn enqueue_retry(&self, task: &RetryTask) -> Result<bool, Error> {
        let task = task.clone();
        let headers_json = serde_json::to_string(&task.headers)?;
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "INSERT OR IGNORE INTO retry_tasks (id, url, method, headers_json, body, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![task.id, task.url, task.method, headers_json, task.body, task.enqueued_at],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// List queued tasks in insertion order.
    ///
    /// Rows whose headers cannot be decoded are skipped with a warning and
    /// left in place; compare against [`CacheDb::count_retry_tasks`] to see
    /// how many were skipped.
    pub async fn list_retry_tasks(&self) -> Result<Vec<RetryTask>, Error> {
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<(RetryTask, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, url, method, headers_json, body, enqueued_at
                     FROM retry_tasks ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            RetryTask {
                                id: row.get(0)?,
                                url: row.get(1)?,
                                method: row.get(2)?,
                                headers: Vec::new(),
                                body: row.get(4)?,
                                enqueued_at: row.get(5)?,
                            },
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (mut task, headers_json) in rows {
            match serde_json::from_str(&headers_json) {
                Ok(headers) => {
                    task.headers = headers;
                    tasks.push(task);
                }
                Err(e) => tracing::warn!(id = %task.id, error = %e, "skipping retry task with malformed headers"),
            }
        }
        Ok(tasks)
    }

    /// Number of rows in the queue, malformed ones included.
    pub async fn count_retry_tasks(&self) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM retry_tasks", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a task by id. Returns whether it was present.
    pub async fn remove_retry_task(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM retry_tasks WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}
