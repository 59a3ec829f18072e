//! SQLite-backed `IdempotencyStore` (C7 storage side, spec §4.7).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::idempotency::IdempotencyStore;
use conductor_types::entities::IdempotencyKey;
use conductor_types::ConductorError;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{is_unique_violation, lock_poisoned, map_db_error};

/// SQLite's `PRIMARY KEY` rejects NULL, so a tenant-less key is stored under
/// this sentinel instead of NULL.
fn tenant_key(tenant_id: Option<Uuid>) -> String {
    tenant_id.map(|id| id.to_string()).unwrap_or_default()
}

pub struct SqliteIdempotencyStore {
    db: Arc<Database>,
}

impl SqliteIdempotencyStore {
    pub fn new(db: Arc<Database>) -> Self {
        SqliteIdempotencyStore { db }
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn get(&self, tenant_id: Option<Uuid>, key: &str) -> Result<Option<IdempotencyKey>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT key, request_path, request_hash, response_code, response_body,
                    locked_at, completed_at, expires_at
             FROM idempotency_keys WHERE tenant_id = ?1 AND key = ?2",
            params![tenant_key(tenant_id), key],
            |row| {
                let response_body: Option<String> = row.get(4)?;
                Ok(IdempotencyKey {
                    key: row.get(0)?,
                    tenant_id,
                    request_path: row.get(1)?,
                    request_hash: row.get(2)?,
                    response_code: row.get::<_, Option<i64>>(3)?.map(|v| v as u16),
                    response_body: response_body.and_then(|s| serde_json::from_str(&s).ok()),
                    locked_at: row.get::<_, Option<String>>(5)?.and_then(|s| s.parse().ok()),
                    completed_at: row.get::<_, Option<String>>(6)?.and_then(|s| s.parse().ok()),
                    expires_at: row.get::<String, _>(7)?.parse().map_err(|_| {
                        rusqlite::Error::InvalidColumnType(7, "expires_at".into(), rusqlite::types::Type::Text)
                    })?,
                })
            },
        )
        .optional()
        .map_err(map_db_error)
    }

    async fn insert_new(&self, row: IdempotencyKey) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let response_body = row.response_body.as_ref().map(|v| v.to_string());
        conn.execute(
            "INSERT INTO idempotency_keys
                (tenant_id, key, request_path, request_hash, response_code, response_body,
                 locked_at, completed_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                tenant_key(row.tenant_id),
                row.key,
                row.request_path,
                row.request_hash,
                row.response_code.map(|v| v as i64),
                response_body,
                row.locked_at.map(|t| t.to_rfc3339()),
                row.completed_at.map(|t| t.to_rfc3339()),
                row.expires_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(|e| {
            if is_unique_violation(&e) {
                // Two requests raced to create the same key; treat the loser
                // as "in progress" rather than a body-mismatch conflict.
                ConductorError::InProgress
            } else {
                map_db_error(e)
            }
        })
    }

    async fn take_lock(&self, tenant_id: Option<Uuid>, key: &str, locked_at: DateTime<Utc>) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE idempotency_keys SET locked_at = ?1 WHERE tenant_id = ?2 AND key = ?3",
            params![locked_at.to_rfc3339(), tenant_key(tenant_id), key],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    async fn complete(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
        response_code: u16,
        response_body: Value,
    ) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE idempotency_keys
             SET response_code = ?1, response_body = ?2, completed_at = ?3, locked_at = NULL
             WHERE tenant_id = ?4 AND key = ?5",
            params![
                response_code as i64,
                response_body.to_string(),
                Utc::now().to_rfc3339(),
                tenant_key(tenant_id),
                key,
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let affected = conn
            .execute(
                "DELETE FROM idempotency_keys WHERE completed_at IS NULL AND expires_at <= ?1",
                params![now.to_rfc3339()],
            )
            .map_err(map_db_error)?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteIdempotencyStore {
        SqliteIdempotencyStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn round_trips_a_new_row() {
        let store = store();
        let now = Utc::now();
        store
            .insert_new(IdempotencyKey {
                key: "k1".into(),
                tenant_id: None,
                request_path: "/v1/charges".into(),
                request_hash: "abc".into(),
                response_code: None,
                response_body: None,
                locked_at: Some(now),
                completed_at: None,
                expires_at: now + chrono::Duration::seconds(60),
            })
            .await
            .unwrap();

        let row = store.get(None, "k1").await.unwrap().unwrap();
        assert_eq!(row.request_hash, "abc");
        assert!(row.completed_at.is_none());
    }

    #[tokio::test]
    async fn racing_inserts_map_to_in_progress() {
        let store = store();
        let now = Utc::now();
        let mk = || IdempotencyKey {
            key: "k1".into(),
            tenant_id: None,
            request_path: "/v1/charges".into(),
            request_hash: "abc".into(),
            response_code: None,
            response_body: None,
            locked_at: Some(now),
            completed_at: None,
            expires_at: now + chrono::Duration::seconds(60),
        };
        store.insert_new(mk()).await.unwrap();
        let second = store.insert_new(mk()).await;
        assert!(matches!(second, Err(ConductorError::InProgress)));
    }

    #[tokio::test]
    async fn complete_then_get_reflects_response() {
        let store = store();
        let now = Utc::now();
        store
            .insert_new(IdempotencyKey {
                key: "k1".into(),
                tenant_id: None,
                request_path: "/v1/charges".into(),
                request_hash: "abc".into(),
                response_code: None,
                response_body: None,
                locked_at: Some(now),
                completed_at: None,
                expires_at: now + chrono::Duration::seconds(60),
            })
            .await
            .unwrap();
        store.complete(None, "k1", 200, serde_json::json!({"ok": true})).await.unwrap();

        let row = store.get(None, "k1").await.unwrap().unwrap();
        assert_eq!(row.response_code, Some(200));
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn purge_expired_removes_only_stale_incomplete_rows() {
        let store = store();
        let past = Utc::now() - chrono::Duration::seconds(120);
        store
            .insert_new(IdempotencyKey {
                key: "expired".into(),
                tenant_id: None,
                request_path: "/v1/charges".into(),
                request_hash: "abc".into(),
                response_code: None,
                response_body: None,
                locked_at: Some(past),
                completed_at: None,
                expires_at: past + chrono::Duration::seconds(1),
            })
            .await
            .unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(None, "expired").await.unwrap().is_none());
    }
}
