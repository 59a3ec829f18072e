//! Tenant registry (C12, spec §4.12; SPEC_FULL §4.14). Credential checks
//! never compare secrets in variable time, and the registry never hands
//! back a secret it did not just mint.

use std::sync::Arc;

use conductor_storage::TenantRepository;
use conductor_types::{ConductorError, Tenant};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub struct TenantRegistry {
    tenants: Arc<TenantRepository>,
}

impl TenantRegistry {
    pub fn new(tenants: Arc<TenantRepository>) -> Self {
        TenantRegistry { tenants }
    }

    pub fn hash_secret(secret: &str) -> String {
        let digest = Sha256::digest(secret.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Splits a raw header into `(api_key, api_secret)`. `X-Api-Key` carries
    /// only the key; `Authorization: Bearer <key>:<secret>` carries both,
    /// since a bearer token is the only header with room for a second field.
    pub fn parse_credentials(header_name: &str, header_value: &str) -> Option<(String, Option<String>)> {
        match header_name.to_lowercase().as_str() {
            "x-api-key" => Some((header_value.trim().to_string(), None)),
            "authorization" => {
                let token = header_value.trim().strip_prefix("Bearer ")?.trim();
                match token.split_once(':') {
                    Some((key, secret)) => Some((key.to_string(), Some(secret.to_string()))),
                    None => Some((token.to_string(), None)),
                }
            }
            _ => None,
        }
    }

    /// Looks up `api_key` and, if `api_secret` is supplied, checks it
    /// against the stored hash in constant time (spec §4.12).
    pub fn validate(&self, api_key: &str, api_secret: Option<&str>) -> Result<Tenant, ConductorError> {
        let tenant = self
            .tenants
            .find_by_api_key(api_key)?
            .ok_or(ConductorError::InvalidCredentials)?;
        if !tenant.is_active {
            return Err(ConductorError::TenantInactive);
        }
        if let Some(secret) = api_secret {
            let got = Self::hash_secret(secret);
            let matches: bool = got.as_bytes().ct_eq(tenant.api_secret_hash.as_bytes()).into();
            if !matches {
                return Err(ConductorError::InvalidCredentials);
            }
        }
        Ok(tenant)
    }

    /// Mints a fresh 32-byte secret, stores only its hash, and returns the
    /// plaintext exactly once. Callers must not persist the return value
    /// themselves — `TenantRepository` never stores it.
    pub fn regenerate_api_secret(&self, tenant_id: Uuid) -> Result<String, ConductorError> {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let secret: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        self.tenants.update_secret_hash(tenant_id, &Self::hash_secret(&secret))?;
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_storage::Database;
    use serde_json::Value;

    fn registry() -> (TenantRegistry, Tenant) {
        let tenants = Arc::new(TenantRepository::new(Arc::new(Database::open_in_memory().unwrap())));
        let secret_hash = TenantRegistry::hash_secret("s3cr3t");
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            api_key: "ak_live_1".into(),
            api_secret_hash: secret_hash,
            webhook_url: None,
            webhook_secret: None,
            is_active: true,
            settings: Value::Null,
            metadata: Value::Null,
        };
        tenants.insert(&tenant).unwrap();
        (TenantRegistry::new(tenants), tenant)
    }

    #[test]
    fn parses_x_api_key_header() {
        let (key, secret) = TenantRegistry::parse_credentials("X-Api-Key", "ak_live_1").unwrap();
        assert_eq!(key, "ak_live_1");
        assert_eq!(secret, None);
    }

    #[test]
    fn parses_bearer_header_with_key_and_secret() {
        let (key, secret) = TenantRegistry::parse_credentials("Authorization", "Bearer ak_live_1:s3cr3t").unwrap();
        assert_eq!(key, "ak_live_1");
        assert_eq!(secret.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn validate_accepts_correct_secret() {
        let (registry, tenant) = registry();
        let found = registry.validate(&tenant.api_key, Some("s3cr3t")).unwrap();
        assert_eq!(found.id, tenant.id);
    }

    #[test]
    fn validate_rejects_wrong_secret() {
        let (registry, tenant) = registry();
        let result = registry.validate(&tenant.api_key, Some("wrong"));
        assert!(matches!(result, Err(ConductorError::InvalidCredentials)));
    }

    #[test]
    fn validate_rejects_unknown_key() {
        let (registry, _tenant) = registry();
        let result = registry.validate("ak_missing", None);
        assert!(matches!(result, Err(ConductorError::InvalidCredentials)));
    }

    #[test]
    fn regenerate_secret_invalidates_the_old_one() {
        let (registry, tenant) = registry();
        let fresh = registry.regenerate_api_secret(tenant.id).unwrap();
        assert!(registry.validate(&tenant.api_key, Some("s3cr3t")).is_err());
        assert!(registry.validate(&tenant.api_key, Some(&fresh)).is_ok());
    }
}
