//! `ProviderMapping` repository: the durable record of which gateway owns
//! an entity, consulted by the router (C6) ahead of its advisory cache.

use std::sync::Arc;
use std::str::FromStr;

use async_trait::async_trait;
use conductor_providers::MappingLookup;
use conductor_types::{ConductorError, EntityType, ProviderMapping, ProviderName};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{is_unique_violation, lock_poisoned, map_db_error};

pub struct MappingRepository {
    db: Arc<Database>,
}

impl MappingRepository {
    pub fn new(db: Arc<Database>) -> Self {
        MappingRepository { db }
    }

    /// Creates the mapping the first time an entity touches a provider.
    /// Never overwrites an existing row (spec §3: mappings are immutable
    /// once created); a second attempt for the same entity is a bug in the
    /// caller, surfaced as a conflict rather than silently ignored.
    pub fn create(&self, mapping: &ProviderMapping) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO provider_mappings (entity_id, entity_type, provider_name, provider_entity_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                mapping.entity_id.to_string(),
                entity_type_str(mapping.entity_type),
                mapping.provider_name.as_str(),
                mapping.provider_entity_id,
            ],
        )
        .map(|_| ())
        .map_err(|e| {
            if is_unique_violation(&e) {
                ConductorError::Conflict("provider mapping already exists for this entity".to_string())
            } else {
                map_db_error(e)
            }
        })
    }

    pub fn find(&self, entity_id: Uuid, entity_type: EntityType) -> Result<Option<ProviderMapping>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT entity_id, entity_type, provider_name, provider_entity_id
             FROM provider_mappings WHERE entity_id = ?1 AND entity_type = ?2",
            params![entity_id.to_string(), entity_type_str(entity_type)],
            row_to_mapping,
        )
        .optional()
        .map_err(map_db_error)
    }
}

fn entity_type_str(t: EntityType) -> &'static str {
    match t {
        EntityType::Payment => "payment",
        EntityType::Subscription => "subscription",
        EntityType::Dispute => "dispute",
        EntityType::Invoice => "invoice",
        EntityType::Payout => "payout",
    }
}

fn row_to_mapping(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderMapping> {
    let entity_id: String = row.get(0)?;
    let entity_type: String = row.get(1)?;
    let provider_name: String = row.get(2)?;
    Ok(ProviderMapping {
        entity_id: Uuid::parse_str(&entity_id).map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "entity_id".into(), rusqlite::types::Type::Text)
        })?,
        entity_type: parse_entity_type(&entity_type)?,
        provider_name: ProviderName::from_str(&provider_name).map_err(|_| {
            rusqlite::Error::InvalidColumnType(2, "provider_name".into(), rusqlite::types::Type::Text)
        })?,
        provider_entity_id: row.get(3)?,
    })
}

fn parse_entity_type(s: &str) -> rusqlite::Result<EntityType> {
    match s {
        "payment" => Ok(EntityType::Payment),
        "subscription" => Ok(EntityType::Subscription),
        "dispute" => Ok(EntityType::Dispute),
        "invoice" => Ok(EntityType::Invoice),
        "payout" => Ok(EntityType::Payout),
        _ => Err(rusqlite::Error::InvalidColumnType(1, "entity_type".into(), rusqlite::types::Type::Text)),
    }
}

#[async_trait]
impl MappingLookup for MappingRepository {
    async fn lookup(&self, entity_id: Uuid, entity_type: EntityType) -> Result<Option<ProviderName>, ConductorError> {
        Ok(self.find(entity_id, entity_type)?.map(|m| m.provider_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> MappingRepository {
        MappingRepository::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn create_then_find_round_trips() {
        let repo = repo();
        let id = Uuid::new_v4();
        repo.create(&ProviderMapping {
            entity_id: id,
            entity_type: EntityType::Payment,
            provider_name: ProviderName::Stripe,
            provider_entity_id: "ch_123".into(),
        })
        .unwrap();

        let found = repo.find(id, EntityType::Payment).unwrap().unwrap();
        assert_eq!(found.provider_name, ProviderName::Stripe);
    }

    #[test]
    fn create_twice_for_same_entity_conflicts() {
        let repo = repo();
        let id = Uuid::new_v4();
        let mapping = ProviderMapping {
            entity_id: id,
            entity_type: EntityType::Payment,
            provider_name: ProviderName::Stripe,
            provider_entity_id: "ch_123".into(),
        };
        repo.create(&mapping).unwrap();
        let second = repo.create(&mapping);
        assert!(matches!(second, Err(ConductorError::Conflict(_))));
    }

    #[tokio::test]
    async fn mapping_lookup_returns_none_for_unknown_entity() {
        let repo = repo();
        let found = repo.lookup(Uuid::new_v4(), EntityType::Payment).await.unwrap();
        assert!(found.is_none());
    }
}
