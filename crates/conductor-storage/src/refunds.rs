//! `Refund` repository. Writers go through the orchestrator's refund-slot
//! check (spec §4.8, §5) which re-reads this table under the same
//! transaction as the payment row it refunds against.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::{ConductorError, Currency, Money, PaymentStatus, ProviderName, Refund};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{lock_poisoned, map_db_error};

pub struct RefundRepository {
    db: Arc<Database>,
}

impl RefundRepository {
    pub fn new(db: Arc<Database>) -> Self {
        RefundRepository { db }
    }

    pub fn insert(&self, refund: &Refund) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO refunds (id, payment_id, amount, currency, reason, status,
                                   provider_name, provider_refund_id, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                refund.id.to_string(),
                refund.payment_id.to_string(),
                refund.amount.0,
                refund.currency.as_str(),
                refund.reason,
                refund.status.to_string(),
                refund.provider_name.as_str(),
                refund.provider_refund_id,
                refund.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Refund>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, payment_id, amount, currency, reason, status, provider_name,
                    provider_refund_id, created_at
             FROM refunds WHERE id = ?1",
            params![id.to_string()],
            row_to_refund,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn list_for_payment(&self, payment_id: Uuid) -> Result<Vec<Refund>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, payment_id, amount, currency, reason, status, provider_name,
                        provider_refund_id, created_at
                 FROM refunds WHERE payment_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![payment_id.to_string()], row_to_refund)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }

    /// `Σ refund.amount` over every row for `payment_id`, used by the
    /// refund-cap check (spec §3, §8 property 3). Only successful refunds
    /// count toward the cap; a failed attempt must not block future ones.
    pub fn total_refunded(&self, payment_id: Uuid) -> Result<Money, ConductorError> {
        let rows = self.list_for_payment(payment_id)?;
        let total = rows
            .iter()
            .filter(|r| matches!(r.status, PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded))
            .fold(Money::ZERO, |acc, r| acc.checked_add(r.amount).unwrap_or(acc));
        Ok(total)
    }
}

fn row_to_refund(row: &Row<'_>) -> rusqlite::Result<Refund> {
    let id: String = row.get(0)?;
    let payment_id: String = row.get(1)?;
    let currency: String = row.get(3)?;
    let status: String = row.get(5)?;
    let provider_name: String = row.get(6)?;
    let created_at: String = row.get(8)?;

    Ok(Refund {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        payment_id: Uuid::parse_str(&payment_id)
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "payment_id".into(), rusqlite::types::Type::Text))?,
        amount: Money(row.get(2)?),
        currency: Currency::new(currency),
        reason: row.get(4)?,
        status: serde_json::from_value(serde_json::Value::String(status))
            .map_err(|_| rusqlite::Error::InvalidColumnType(5, "status".into(), rusqlite::types::Type::Text))?,
        provider_name: ProviderName::from_str(&provider_name)
            .map_err(|_| rusqlite::Error::InvalidColumnType(6, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_refund_id: row.get(7)?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(8, "created_at".into(), rusqlite::types::Type::Text))?,
    })
}
