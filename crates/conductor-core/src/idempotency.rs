//! At-most-once request keeper for state-mutating endpoints (C7, spec §4.7).
//!
//! The algorithm is storage-agnostic: it is expressed against the
//! [`IdempotencyStore`] trait so a SQLite-backed implementation can live in
//! the storage crate while the decision logic itself is tested here without
//! a database.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_types::entities::IdempotencyKey;
use conductor_types::ConductorError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
    ) -> Result<Option<IdempotencyKey>, ConductorError>;

    async fn insert_new(&self, row: IdempotencyKey) -> Result<(), ConductorError>;

    async fn take_lock(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
        locked_at: DateTime<Utc>,
    ) -> Result<(), ConductorError>;

    async fn complete(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
        response_code: u16,
        response_body: Value,
    ) -> Result<(), ConductorError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ConductorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyDecision {
    /// No prior row existed; the caller should execute the operation and
    /// call `complete` when it finishes.
    New,
    /// A prior row existed, unlocked or its lock had expired; the lock was
    /// re-taken and the caller should execute the operation as if new.
    Reuse,
    /// The operation already completed; return this cached response as-is.
    Replay { response_code: u16, response_body: Value },
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct IdempotencyKeeper<S: IdempotencyStore> {
    store: Arc<S>,
    lock_lease: StdDuration,
}

impl<S: IdempotencyStore> IdempotencyKeeper<S> {
    pub fn new(store: Arc<S>, lock_lease: StdDuration) -> Self {
        IdempotencyKeeper { store, lock_lease }
    }

    pub async fn get_or_create(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
        request_path: &str,
        request_bytes: &[u8],
        ttl: StdDuration,
    ) -> Result<IdempotencyDecision, ConductorError> {
        let request_hash = sha256_hex(request_bytes);
        let now = Utc::now();

        match self.store.get(tenant_id, key).await? {
            None => {
                let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(60));
                self.store
                    .insert_new(IdempotencyKey {
                        key: key.to_string(),
                        tenant_id,
                        request_path: request_path.to_string(),
                        request_hash,
                        response_code: None,
                        response_body: None,
                        locked_at: Some(now),
                        completed_at: None,
                        expires_at: now + ttl,
                    })
                    .await?;
                Ok(IdempotencyDecision::New)
            }
            Some(row) if row.request_hash != request_hash => Err(ConductorError::IdempotencyConflict),
            Some(row) if row.completed_at.is_some() => Ok(IdempotencyDecision::Replay {
                response_code: row.response_code.unwrap_or(0),
                response_body: row.response_body.unwrap_or(Value::Null),
            }),
            Some(row) => {
                let lock_stale = row
                    .locked_at
                    .map(|locked_at| now - locked_at >= ChronoDuration::from_std(self.lock_lease).unwrap_or_default())
                    .unwrap_or(true);
                if lock_stale {
                    self.store.take_lock(tenant_id, key, now).await?;
                    Ok(IdempotencyDecision::Reuse)
                } else {
                    Err(ConductorError::InProgress)
                }
            }
        }
    }

    pub async fn complete(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
        response_code: u16,
        response_body: Value,
    ) -> Result<(), ConductorError> {
        self.store.complete(tenant_id, key, response_code, response_body).await
    }

    /// Spawns a background sweep that purges expired, never-completed rows
    /// every `interval` so a crashed lock holder doesn't wedge the key
    /// forever. Returns a handle whose `stop()` is idempotent.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: StdDuration) -> SweeperHandle
    where
        S: 'static,
    {
        let keeper = self.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if task_cancel.is_cancelled() {
                    break;
                }
                if let Err(err) = keeper.store.purge_expired(Utc::now()).await {
                    tracing::warn!(error = %err, "idempotency sweep failed");
                }
            }
        });
        SweeperHandle {
            cancel,
            task: std::sync::Mutex::new(Some(handle)),
        }
    }
}

pub struct SweeperHandle {
    cancel: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().expect("sweeper mutex poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemStore {
        rows: Mutex<HashMap<(Option<Uuid>, String), IdempotencyKey>>,
    }

    impl MemStore {
        fn new() -> Self {
            MemStore {
                rows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl IdempotencyStore for MemStore {
        async fn get(
            &self,
            tenant_id: Option<Uuid>,
            key: &str,
        ) -> Result<Option<IdempotencyKey>, ConductorError> {
            Ok(self.rows.lock().unwrap().get(&(tenant_id, key.to_string())).cloned())
        }

        async fn insert_new(&self, row: IdempotencyKey) -> Result<(), ConductorError> {
            self.rows
                .lock()
                .unwrap()
                .insert((row.tenant_id, row.key.clone()), row);
            Ok(())
        }

        async fn take_lock(
            &self,
            tenant_id: Option<Uuid>,
            key: &str,
            locked_at: DateTime<Utc>,
        ) -> Result<(), ConductorError> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&(tenant_id, key.to_string())) {
                row.locked_at = Some(locked_at);
            }
            Ok(())
        }

        async fn complete(
            &self,
            tenant_id: Option<Uuid>,
            key: &str,
            response_code: u16,
            response_body: Value,
        ) -> Result<(), ConductorError> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&(tenant_id, key.to_string())) {
                row.response_code = Some(response_code);
                row.response_body = Some(response_body);
                row.completed_at = Some(Utc::now());
                row.locked_at = None;
            }
            Ok(())
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ConductorError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, row| row.completed_at.is_some() || row.expires_at > now);
            Ok((before - rows.len()) as u64)
        }
    }

    fn keeper() -> IdempotencyKeeper<MemStore> {
        IdempotencyKeeper::new(Arc::new(MemStore::new()), StdDuration::from_secs(60))
    }

    #[tokio::test]
    async fn first_call_is_new() {
        let k = keeper();
        let decision = k
            .get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(decision, IdempotencyDecision::New);
    }

    #[tokio::test]
    async fn fresh_lock_returns_in_progress() {
        let k = keeper();
        k.get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await
            .unwrap();
        let second = k
            .get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await;
        assert!(matches!(second, Err(ConductorError::InProgress)));
    }

    #[tokio::test]
    async fn mismatched_body_is_conflict() {
        let k = keeper();
        k.get_or_create(None, "key1", "/v1/charges", b"body-a", StdDuration::from_secs(60))
            .await
            .unwrap();
        let second = k
            .get_or_create(None, "key1", "/v1/charges", b"body-b", StdDuration::from_secs(60))
            .await;
        assert!(matches!(second, Err(ConductorError::IdempotencyConflict)));
    }

    #[tokio::test]
    async fn completed_row_replays_cached_response() {
        let k = keeper();
        k.get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await
            .unwrap();
        k.complete(None, "key1", 200, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let decision = k
            .get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await
            .unwrap();
        match decision {
            IdempotencyDecision::Replay {
                response_code,
                response_body,
            } => {
                assert_eq!(response_code, 200);
                assert_eq!(response_body, serde_json::json!({"ok": true}));
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_lock_is_reused_not_conflicted() {
        let k = IdempotencyKeeper::new(Arc::new(MemStore::new()), StdDuration::from_millis(10));
        k.get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(30)).await;

        let decision = k
            .get_or_create(None, "key1", "/v1/charges", b"body", StdDuration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(decision, IdempotencyDecision::Reuse);
    }
}
