//! `Tenant` repository (C12 storage side, spec §3, §4.12). `api_key` is
//! unique; `api_secret_hash` is the only secret-derived value ever stored.

use std::sync::Arc;

use conductor_types::{ConductorError, Tenant};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{is_unique_violation, lock_poisoned, map_db_error};

pub struct TenantRepository {
    db: Arc<Database>,
}

impl TenantRepository {
    pub fn new(db: Arc<Database>) -> Self {
        TenantRepository { db }
    }

    pub fn insert(&self, tenant: &Tenant) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO tenants (id, name, api_key, api_secret_hash, webhook_url,
                                   webhook_secret, is_active, settings, metadata)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                tenant.id.to_string(),
                tenant.name,
                tenant.api_key,
                tenant.api_secret_hash,
                tenant.webhook_url,
                tenant.webhook_secret,
                tenant.is_active as i64,
                tenant.settings.to_string(),
                tenant.metadata.to_string(),
            ],
        )
        .map(|_| ())
        .map_err(|e| {
            if is_unique_violation(&e) {
                ConductorError::Conflict("api_key already registered".to_string())
            } else {
                map_db_error(e)
            }
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, name, api_key, api_secret_hash, webhook_url, webhook_secret,
                    is_active, settings, metadata FROM tenants WHERE id = ?1",
            params![id.to_string()],
            row_to_tenant,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn find_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, name, api_key, api_secret_hash, webhook_url, webhook_secret,
                    is_active, settings, metadata FROM tenants WHERE api_key = ?1",
            params![api_key],
            row_to_tenant,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn update_secret_hash(&self, id: Uuid, new_hash: &str) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE tenants SET api_secret_hash = ?1 WHERE id = ?2",
            params![new_hash, id.to_string()],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn update_webhook_destination(
        &self,
        id: Uuid,
        webhook_url: Option<&str>,
        webhook_secret: Option<&str>,
    ) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE tenants SET webhook_url = ?1, webhook_secret = ?2 WHERE id = ?3",
            params![webhook_url, webhook_secret, id.to_string()],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }
}

fn row_to_tenant(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let id: String = row.get(0)?;
    let settings: String = row.get(7)?;
    let metadata: String = row.get(8)?;
    Ok(Tenant {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        name: row.get(1)?,
        api_key: row.get(2)?,
        api_secret_hash: row.get(3)?,
        webhook_url: row.get(4)?,
        webhook_secret: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        settings: serde_json::from_str(&settings).unwrap_or(Value::Null),
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            api_key: "ak_live_1".into(),
            api_secret_hash: "hash".into(),
            webhook_url: None,
            webhook_secret: None,
            is_active: true,
            settings: Value::Null,
            metadata: Value::Null,
        }
    }

    #[test]
    fn insert_then_find_by_api_key() {
        let repo = TenantRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let t = tenant();
        repo.insert(&t).unwrap();
        let found = repo.find_by_api_key("ak_live_1").unwrap().unwrap();
        assert_eq!(found.id, t.id);
    }

    #[test]
    fn duplicate_api_key_conflicts() {
        let repo = TenantRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        repo.insert(&tenant()).unwrap();
        let mut dup = tenant();
        dup.id = Uuid::new_v4();
        let result = repo.insert(&dup);
        assert!(matches!(result, Err(ConductorError::Conflict(_))));
    }

    #[test]
    fn update_secret_hash_persists() {
        let repo = TenantRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let t = tenant();
        repo.insert(&t).unwrap();
        repo.update_secret_hash(t.id, "new-hash").unwrap();
        let found = repo.find_by_id(t.id).unwrap().unwrap();
        assert_eq!(found.api_secret_hash, "new-hash");
    }
}
