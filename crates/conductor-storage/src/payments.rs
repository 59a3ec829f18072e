//! `Payment` repository — owned by the orchestrator's state machine (C8),
//! which is the only writer of `status` transitions.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::{
    CaptureMethod, ConductorError, Currency, Money, Payment, PaymentStatus, ProviderName,
};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{lock_poisoned, map_db_error};

pub struct PaymentRepository {
    db: Arc<Database>,
}

impl PaymentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        PaymentRepository { db }
    }

    pub fn insert(&self, payment: &Payment) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO payments
                (id, tenant_id, customer_id, amount, currency, status, payment_method_ref,
                 provider_name, provider_charge_id, capture_method, captured_amount,
                 requires_action, next_action, client_secret, idempotency_key, metadata,
                 created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                payment.id.to_string(),
                payment.tenant_id.map(|t| t.to_string()),
                payment.customer_id,
                payment.amount.0,
                payment.currency.as_str(),
                payment.status.to_string(),
                payment.payment_method_ref,
                payment.provider_name.map(|p| p.as_str().to_string()),
                payment.provider_charge_id,
                capture_method_str(payment.capture_method),
                payment.captured_amount.0,
                payment.requires_action as i64,
                payment.next_action.as_ref().map(|v| v.to_string()),
                payment.client_secret,
                payment.idempotency_key,
                payment.metadata.to_string(),
                payment.created_at.to_rfc3339(),
                payment.updated_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Payment>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, customer_id, amount, currency, status, payment_method_ref,
                    provider_name, provider_charge_id, capture_method, captured_amount,
                    requires_action, next_action, client_secret, idempotency_key, metadata,
                    created_at, updated_at
             FROM payments WHERE id = ?1",
            params![id.to_string()],
            row_to_payment,
        )
        .optional()
        .map_err(map_db_error)
    }

    /// Updates the mutable fields a status transition touches. Callers hold
    /// the orchestrator's per-payment serialization; this does not itself
    /// perform optimistic-concurrency checks.
    #[allow(clippy::too_many_arguments)]
    pub fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        provider_name: Option<ProviderName>,
        provider_charge_id: Option<&str>,
        captured_amount: Money,
        requires_action: bool,
        next_action: Option<&Value>,
        client_secret: Option<&str>,
    ) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE payments SET status = ?1, provider_name = ?2, provider_charge_id = ?3,
                captured_amount = ?4, requires_action = ?5, next_action = ?6, client_secret = ?7,
                updated_at = ?8
             WHERE id = ?9",
            params![
                status.to_string(),
                provider_name.map(|p| p.as_str().to_string()),
                provider_charge_id,
                captured_amount.0,
                requires_action as i64,
                next_action.map(|v| v.to_string()),
                client_secret,
                Utc::now().to_rfc3339(),
                id.to_string(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    /// Reverse lookup used by inbound webhook handlers (spec §4.9 step 4),
    /// which only ever carry the provider's own charge id.
    pub fn find_by_provider_charge_id(&self, provider_charge_id: &str) -> Result<Option<Payment>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, customer_id, amount, currency, status, payment_method_ref,
                    provider_name, provider_charge_id, capture_method, captured_amount,
                    requires_action, next_action, client_secret, idempotency_key, metadata,
                    created_at, updated_at
             FROM payments WHERE provider_charge_id = ?1",
            params![provider_charge_id],
            row_to_payment,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn list_by_tenant(&self, tenant_id: Option<Uuid>, limit: u32) -> Result<Vec<Payment>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, customer_id, amount, currency, status, payment_method_ref,
                        provider_name, provider_charge_id, capture_method, captured_amount,
                        requires_action, next_action, client_secret, idempotency_key, metadata,
                        created_at, updated_at
                 FROM payments WHERE tenant_id IS ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![tenant_id.map(|t| t.to_string()), limit], row_to_payment)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }
}

fn capture_method_str(m: CaptureMethod) -> &'static str {
    match m {
        CaptureMethod::Automatic => "automatic",
        CaptureMethod::Manual => "manual",
    }
}

fn parse_capture_method(s: &str) -> rusqlite::Result<CaptureMethod> {
    match s {
        "automatic" => Ok(CaptureMethod::Automatic),
        "manual" => Ok(CaptureMethod::Manual),
        _ => Err(rusqlite::Error::InvalidColumnType(9, "capture_method".into(), rusqlite::types::Type::Text)),
    }
}

fn parse_payment_status(s: &str) -> rusqlite::Result<PaymentStatus> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| rusqlite::Error::InvalidColumnType(5, "status".into(), rusqlite::types::Type::Text))
}

fn row_to_payment(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let currency: String = row.get(4)?;
    let status: String = row.get(5)?;
    let provider_name: Option<String> = row.get(7)?;
    let capture_method: String = row.get(9)?;
    let next_action: Option<String> = row.get(12)?;
    let metadata: String = row.get(15)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;

    Ok(Payment {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id
            .map(|t| Uuid::parse_str(&t))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "tenant_id".into(), rusqlite::types::Type::Text))?,
        customer_id: row.get(2)?,
        amount: Money(row.get(3)?),
        currency: Currency::new(currency),
        status: parse_payment_status(&status)?,
        payment_method_ref: row.get(6)?,
        provider_name: provider_name
            .map(|p| ProviderName::from_str(&p))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidColumnType(7, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_charge_id: row.get(8)?,
        capture_method: parse_capture_method(&capture_method)?,
        captured_amount: Money(row.get(10)?),
        requires_action: row.get::<_, i64>(11)? != 0,
        next_action: next_action.and_then(|s| serde_json::from_str(&s).ok()),
        client_secret: row.get(13)?,
        idempotency_key: row.get(14)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(16, "created_at".into(), rusqlite::types::Type::Text))?,
        updated_at: updated_at
            .parse::<DateTime<Utc>>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(17, "updated_at".into(), rusqlite::types::Type::Text))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            tenant_id: None,
            customer_id: "cus_1".into(),
            amount: Money(2500),
            currency: Currency::new("USD"),
            status: PaymentStatus::Pending,
            payment_method_ref: "pm_1".into(),
            provider_name: None,
            provider_charge_id: None,
            capture_method: CaptureMethod::Automatic,
            captured_amount: Money::ZERO,
            requires_action: false,
            next_action: None,
            client_secret: None,
            idempotency_key: Some("idem-1".into()),
            metadata: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_then_find_round_trips() {
        let repo = PaymentRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let p = payment();
        repo.insert(&p).unwrap();
        let found = repo.find(p.id).unwrap().unwrap();
        assert_eq!(found.amount, Money(2500));
        assert_eq!(found.status, PaymentStatus::Pending);
    }

    #[test]
    fn update_status_persists_transition() {
        let repo = PaymentRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let p = payment();
        repo.insert(&p).unwrap();
        repo.update_status(
            p.id,
            PaymentStatus::Succeeded,
            Some(ProviderName::Stripe),
            Some("ch_abc"),
            Money(2500),
            false,
            None,
            None,
        )
        .unwrap();

        let found = repo.find(p.id).unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Succeeded);
        assert_eq!(found.provider_charge_id.as_deref(), Some("ch_abc"));
        assert_eq!(found.captured_amount, Money(2500));
    }

    #[test]
    fn find_by_provider_charge_id_locates_the_row() {
        let repo = PaymentRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let p = payment();
        repo.insert(&p).unwrap();
        repo.update_status(p.id, PaymentStatus::Succeeded, Some(ProviderName::Stripe), Some("ch_xyz"), Money(2500), false, None, None)
            .unwrap();

        let found = repo.find_by_provider_charge_id("ch_xyz").unwrap().unwrap();
        assert_eq!(found.id, p.id);
        assert!(repo.find_by_provider_charge_id("ch_missing").unwrap().is_none());
    }

    #[test]
    fn list_by_tenant_orders_newest_first() {
        let repo = PaymentRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let mut first = payment();
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = payment();
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        let list = repo.list_by_tenant(None, 10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.id);
    }
}
