//! Persistent alias -> instance bindings.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rlog_debug;
use crate::util::blocking;

/// A human alias bound to an opaque instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub alias: String,
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Insert or replace the binding for `alias`.
    async fn save(&self, alias: &str, resource_id: &str) -> Result<Binding>;

    async fn get(&self, alias: &str) -> Result<Option<Binding>>;

    /// Returns whether a binding was removed.
    async fn delete(&self, alias: &str) -> Result<bool>;

    /// All bindings ordered by alias.
    async fn list(&self) -> Result<Vec<Binding>>;
}

/// SQLite-backed binding store.
#[derive(Clone)]
pub struct SqliteBindingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBindingStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        rlog_debug!("SqliteBindingStore::open path={}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bindings (
                alias TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::TaskJoin("binding store lock poisoned".into()))?;
            f(&guard)
        })
        .await
    }
}

fn row_to_binding(alias: String, resource_id: String, created_at: i64) -> Binding {
    Binding {
        alias,
        resource_id,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}

#[async_trait]
impl BindingStore for SqliteBindingStore {
    async fn save(&self, alias: &str, resource_id: &str) -> Result<Binding> {
        let alias = alias.trim().to_string();
        let resource_id = resource_id.trim().to_string();
        if alias.is_empty() || resource_id.is_empty() {
            return Err(Error::InvalidInput(
                "alias and instance id must not be empty".into(),
            ));
        }

        let created_at = Utc::now().timestamp();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bindings (alias, resource_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(alias) DO UPDATE SET
                    resource_id = excluded.resource_id,
                    created_at = excluded.created_at",
                params![alias, resource_id, created_at],
            )?;
            Ok(row_to_binding(alias, resource_id, created_at))
        })
        .await
    }

    async fn get(&self, alias: &str) -> Result<Option<Binding>> {
        let alias = alias.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT alias, resource_id, created_at FROM bindings WHERE alias = ?1",
                    params![alias],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(a, r, c)| row_to_binding(a, r, c)))
        })
        .await
    }

    async fn delete(&self, alias: &str) -> Result<bool> {
        let alias = alias.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM bindings WHERE alias = ?1", params![alias])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Binding>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT alias, resource_id, created_at FROM bindings ORDER BY alias")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            let mut bindings = Vec::new();
            for row in rows {
                let (a, r, c) = row?;
                bindings.push(row_to_binding(a, r, c));
            }
            Ok(bindings)
        })
        .await
    }
}
