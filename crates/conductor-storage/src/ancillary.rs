//! Repositories for the `[ADDED]` entities (SPEC_FULL §3): customers,
//! payment methods, disputes, invoices, payouts, plans and subscriptions.
//! These follow the same `Mutex<Connection>` pattern as [`crate::payments`]
//! but stay intentionally thin — the narrative center of the system is the
//! payment lifecycle, not these supporting tables.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::{
    Currency, Customer, ConductorError, Dispute, DisputeStatus, Invoice, InvoiceStatus, Money,
    PaymentMethod, Payout, PayoutStatus, Plan, ProviderName, Subscription, SubscriptionStatus,
};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{lock_poisoned, map_db_error};

pub struct CustomerRepository {
    db: Arc<Database>,
}

impl CustomerRepository {
    pub fn new(db: Arc<Database>) -> Self {
        CustomerRepository { db }
    }

    pub fn insert(&self, c: &Customer) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO customers (id, tenant_id, provider_name, provider_customer_id, email, name, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                c.id.to_string(),
                c.tenant_id.map(|t| t.to_string()),
                c.provider_name.map(|p| p.as_str().to_string()),
                c.provider_customer_id,
                c.email,
                c.name,
                c.metadata.to_string(),
                c.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Customer>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, provider_name, provider_customer_id, email, name, metadata, created_at
             FROM customers WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let id: String = row.get(0)?;
                let tenant_id: Option<String> = row.get(1)?;
                let provider_name: Option<String> = row.get(2)?;
                let metadata: String = row.get(6)?;
                let created_at: String = row.get(7)?;
                Ok(Customer {
                    id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
                    tenant_id: tenant_id.map(|t| Uuid::parse_str(&t)).transpose().unwrap_or(None),
                    provider_name: provider_name.and_then(|p| ProviderName::from_str(&p).ok()),
                    provider_customer_id: row.get(3)?,
                    email: row.get(4)?,
                    name: row.get(5)?,
                    metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()
        .map_err(map_db_error)
    }
}

pub struct PaymentMethodRepository {
    db: Arc<Database>,
}

impl PaymentMethodRepository {
    pub fn new(db: Arc<Database>) -> Self {
        PaymentMethodRepository { db }
    }

    pub fn insert(&self, pm: &PaymentMethod) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO payment_methods
                (id, tenant_id, customer_id, provider_name, provider_payment_method_id,
                 method_type, last4, brand, is_default, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                pm.id.to_string(),
                pm.tenant_id.map(|t| t.to_string()),
                pm.customer_id,
                pm.provider_name.as_str(),
                pm.provider_payment_method_id,
                pm.method_type,
                pm.last4,
                pm.brand,
                pm.is_default as i64,
                pm.metadata.to_string(),
                pm.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<PaymentMethod>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, customer_id, provider_name, provider_payment_method_id,
                    method_type, last4, brand, is_default, metadata, created_at
             FROM payment_methods WHERE id = ?1",
            params![id.to_string()],
            row_to_payment_method,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn list_for_customer(&self, customer_id: &str) -> Result<Vec<PaymentMethod>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, customer_id, provider_name, provider_payment_method_id,
                        method_type, last4, brand, is_default, metadata, created_at
                 FROM payment_methods WHERE customer_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![customer_id], row_to_payment_method)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }
}

fn row_to_payment_method(row: &Row<'_>) -> rusqlite::Result<PaymentMethod> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let provider_name: String = row.get(3)?;
    let metadata: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    Ok(PaymentMethod {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id.map(|t| Uuid::parse_str(&t)).transpose().unwrap_or(None),
        customer_id: row.get(2)?,
        provider_name: ProviderName::from_str(&provider_name)
            .map_err(|_| rusqlite::Error::InvalidColumnType(3, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_payment_method_id: row.get(4)?,
        method_type: row.get(5)?,
        last4: row.get(6)?,
        brand: row.get(7)?,
        is_default: row.get::<_, i64>(8)? != 0,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

pub struct DisputeRepository {
    db: Arc<Database>,
}

impl DisputeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        DisputeRepository { db }
    }

    pub fn insert(&self, d: &Dispute) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO disputes (id, payment_id, provider_name, provider_dispute_id, amount,
                                    currency, reason, status, evidence_due_by, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                d.id.to_string(),
                d.payment_id.to_string(),
                d.provider_name.as_str(),
                d.provider_dispute_id,
                d.amount.0,
                d.currency.as_str(),
                d.reason,
                dispute_status_str(d.status),
                d.evidence_due_by.map(|t| t.to_rfc3339()),
                d.created_at.to_rfc3339(),
                d.updated_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Dispute>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, payment_id, provider_name, provider_dispute_id, amount, currency,
                    reason, status, evidence_due_by, created_at, updated_at
             FROM disputes WHERE id = ?1",
            params![id.to_string()],
            row_to_dispute,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn find_for_payment(&self, payment_id: Uuid) -> Result<Vec<Dispute>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, payment_id, provider_name, provider_dispute_id, amount, currency,
                        reason, status, evidence_due_by, created_at, updated_at
                 FROM disputes WHERE payment_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![payment_id.to_string()], row_to_dispute)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }

    pub fn update_status(&self, id: Uuid, status: DisputeStatus) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE disputes SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![dispute_status_str(status), Utc::now().to_rfc3339(), id.to_string()],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }
}

fn dispute_status_str(s: DisputeStatus) -> &'static str {
    match s {
        DisputeStatus::NeedsResponse => "needs_response",
        DisputeStatus::UnderReview => "under_review",
        DisputeStatus::Won => "won",
        DisputeStatus::Lost => "lost",
    }
}

fn parse_dispute_status(s: &str) -> rusqlite::Result<DisputeStatus> {
    match s {
        "needs_response" => Ok(DisputeStatus::NeedsResponse),
        "under_review" => Ok(DisputeStatus::UnderReview),
        "won" => Ok(DisputeStatus::Won),
        "lost" => Ok(DisputeStatus::Lost),
        _ => Err(rusqlite::Error::InvalidColumnType(7, "status".into(), rusqlite::types::Type::Text)),
    }
}

fn row_to_dispute(row: &Row<'_>) -> rusqlite::Result<Dispute> {
    let id: String = row.get(0)?;
    let payment_id: String = row.get(1)?;
    let provider_name: String = row.get(2)?;
    let currency: String = row.get(5)?;
    let status: String = row.get(7)?;
    let evidence_due_by: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(Dispute {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        payment_id: Uuid::parse_str(&payment_id)
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "payment_id".into(), rusqlite::types::Type::Text))?,
        provider_name: ProviderName::from_str(&provider_name)
            .map_err(|_| rusqlite::Error::InvalidColumnType(2, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_dispute_id: row.get(3)?,
        amount: Money(row.get(4)?),
        currency: Currency::new(currency),
        reason: row.get(6)?,
        status: parse_dispute_status(&status)?,
        evidence_due_by: evidence_due_by.and_then(|s| s.parse().ok()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

pub struct InvoiceRepository {
    db: Arc<Database>,
}

impl InvoiceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        InvoiceRepository { db }
    }

    pub fn insert(&self, inv: &Invoice) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO invoices (id, tenant_id, customer_id, amount, currency, status,
                                    provider_name, provider_invoice_id, due_at, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                inv.id.to_string(),
                inv.tenant_id.map(|t| t.to_string()),
                inv.customer_id,
                inv.amount.0,
                inv.currency.as_str(),
                invoice_status_str(inv.status),
                inv.provider_name.as_str(),
                inv.provider_invoice_id,
                inv.due_at.map(|t| t.to_rfc3339()),
                inv.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Invoice>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, customer_id, amount, currency, status, provider_name,
                    provider_invoice_id, due_at, created_at FROM invoices WHERE id = ?1",
            params![id.to_string()],
            row_to_invoice,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn update_status(&self, id: Uuid, status: InvoiceStatus) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE invoices SET status = ?1 WHERE id = ?2",
            params![invoice_status_str(status), id.to_string()],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }
}

fn invoice_status_str(s: InvoiceStatus) -> &'static str {
    match s {
        InvoiceStatus::Draft => "draft",
        InvoiceStatus::Open => "open",
        InvoiceStatus::Paid => "paid",
        InvoiceStatus::Void => "void",
        InvoiceStatus::Uncollectible => "uncollectible",
    }
}

fn parse_invoice_status(s: &str) -> rusqlite::Result<InvoiceStatus> {
    match s {
        "draft" => Ok(InvoiceStatus::Draft),
        "open" => Ok(InvoiceStatus::Open),
        "paid" => Ok(InvoiceStatus::Paid),
        "void" => Ok(InvoiceStatus::Void),
        "uncollectible" => Ok(InvoiceStatus::Uncollectible),
        _ => Err(rusqlite::Error::InvalidColumnType(5, "status".into(), rusqlite::types::Type::Text)),
    }
}

fn row_to_invoice(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let currency: String = row.get(4)?;
    let status: String = row.get(5)?;
    let provider_name: String = row.get(6)?;
    let due_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    Ok(Invoice {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id.map(|t| Uuid::parse_str(&t)).transpose().unwrap_or(None),
        customer_id: row.get(2)?,
        amount: Money(row.get(3)?),
        currency: Currency::new(currency),
        status: parse_invoice_status(&status)?,
        provider_name: ProviderName::from_str(&provider_name)
            .map_err(|_| rusqlite::Error::InvalidColumnType(6, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_invoice_id: row.get(7)?,
        due_at: due_at.and_then(|s| s.parse().ok()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

pub struct PayoutRepository {
    db: Arc<Database>,
}

impl PayoutRepository {
    pub fn new(db: Arc<Database>) -> Self {
        PayoutRepository { db }
    }

    pub fn insert(&self, p: &Payout) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO payouts (id, tenant_id, amount, currency, destination, status,
                                   provider_name, provider_payout_id, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                p.id.to_string(),
                p.tenant_id.map(|t| t.to_string()),
                p.amount.0,
                p.currency.as_str(),
                p.destination,
                payout_status_str(p.status),
                p.provider_name.as_str(),
                p.provider_payout_id,
                p.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Payout>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, amount, currency, destination, status, provider_name,
                    provider_payout_id, created_at FROM payouts WHERE id = ?1",
            params![id.to_string()],
            row_to_payout,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn update_status(&self, id: Uuid, status: PayoutStatus) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE payouts SET status = ?1 WHERE id = ?2",
            params![payout_status_str(status), id.to_string()],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }
}

fn payout_status_str(s: PayoutStatus) -> &'static str {
    match s {
        PayoutStatus::Pending => "pending",
        PayoutStatus::InTransit => "in_transit",
        PayoutStatus::Paid => "paid",
        PayoutStatus::Failed => "failed",
    }
}

fn parse_payout_status(s: &str) -> rusqlite::Result<PayoutStatus> {
    match s {
        "pending" => Ok(PayoutStatus::Pending),
        "in_transit" => Ok(PayoutStatus::InTransit),
        "paid" => Ok(PayoutStatus::Paid),
        "failed" => Ok(PayoutStatus::Failed),
        _ => Err(rusqlite::Error::InvalidColumnType(5, "status".into(), rusqlite::types::Type::Text)),
    }
}

fn row_to_payout(row: &Row<'_>) -> rusqlite::Result<Payout> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let currency: String = row.get(3)?;
    let status: String = row.get(5)?;
    let provider_name: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    Ok(Payout {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id.map(|t| Uuid::parse_str(&t)).transpose().unwrap_or(None),
        amount: Money(row.get(2)?),
        currency: Currency::new(currency),
        destination: row.get(4)?,
        status: parse_payout_status(&status)?,
        provider_name: ProviderName::from_str(&provider_name)
            .map_err(|_| rusqlite::Error::InvalidColumnType(6, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_payout_id: row.get(7)?,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

pub struct PlanRepository {
    db: Arc<Database>,
}

impl PlanRepository {
    pub fn new(db: Arc<Database>) -> Self {
        PlanRepository { db }
    }

    pub fn insert(&self, p: &Plan) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO plans (id, tenant_id, provider_name, provider_plan_id, amount,
                                 currency, interval, interval_count)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                p.id.to_string(),
                p.tenant_id.map(|t| t.to_string()),
                p.provider_name.as_str(),
                p.provider_plan_id,
                p.amount.0,
                p.currency.as_str(),
                p.interval,
                p.interval_count,
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Plan>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, provider_name, provider_plan_id, amount, currency,
                    interval, interval_count FROM plans WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let id: String = row.get(0)?;
                let tenant_id: Option<String> = row.get(1)?;
                let provider_name: String = row.get(2)?;
                let currency: String = row.get(5)?;
                Ok(Plan {
                    id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
                    tenant_id: tenant_id.map(|t| Uuid::parse_str(&t)).transpose().unwrap_or(None),
                    provider_name: ProviderName::from_str(&provider_name)
                        .map_err(|_| rusqlite::Error::InvalidColumnType(2, "provider_name".into(), rusqlite::types::Type::Text))?,
                    provider_plan_id: row.get(3)?,
                    amount: Money(row.get(4)?),
                    currency: Currency::new(currency),
                    interval: row.get(6)?,
                    interval_count: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(map_db_error)
    }
}

pub struct SubscriptionRepository {
    db: Arc<Database>,
}

impl SubscriptionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        SubscriptionRepository { db }
    }

    pub fn insert(&self, s: &Subscription) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO subscriptions (id, tenant_id, customer_id, plan_id, provider_name,
                                         provider_subscription_id, status, current_period_end, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                s.id.to_string(),
                s.tenant_id.map(|t| t.to_string()),
                s.customer_id,
                s.plan_id.to_string(),
                s.provider_name.as_str(),
                s.provider_subscription_id,
                subscription_status_str(s.status),
                s.current_period_end.to_rfc3339(),
                s.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Subscription>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, customer_id, plan_id, provider_name, provider_subscription_id,
                    status, current_period_end, created_at FROM subscriptions WHERE id = ?1",
            params![id.to_string()],
            row_to_subscription,
        )
        .optional()
        .map_err(map_db_error)
    }

    /// Projects the row after a gateway update. Per SPEC_FULL's REDESIGN
    /// FLAGS / spec §9(c): `current_period_end` must come from the
    /// gateway's real current-period-end field, never `canceled_at`.
    pub fn update_after_gateway_sync(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
        current_period_end: DateTime<Utc>,
    ) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE subscriptions SET status = ?1, current_period_end = ?2 WHERE id = ?3",
            params![
                subscription_status_str(status),
                current_period_end.to_rfc3339(),
                id.to_string(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn list_by_tenant(&self, tenant_id: Option<Uuid>) -> Result<Vec<Subscription>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, customer_id, plan_id, provider_name, provider_subscription_id,
                        status, current_period_end, created_at
                 FROM subscriptions WHERE tenant_id IS ?1 ORDER BY created_at ASC",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![tenant_id.map(|t| t.to_string())], row_to_subscription)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }
}

fn subscription_status_str(s: SubscriptionStatus) -> &'static str {
    match s {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::PastDue => "past_due",
        SubscriptionStatus::Canceled => "canceled",
        SubscriptionStatus::Incomplete => "incomplete",
    }
}

fn parse_subscription_status(s: &str) -> rusqlite::Result<SubscriptionStatus> {
    match s {
        "active" => Ok(SubscriptionStatus::Active),
        "past_due" => Ok(SubscriptionStatus::PastDue),
        "canceled" => Ok(SubscriptionStatus::Canceled),
        "incomplete" => Ok(SubscriptionStatus::Incomplete),
        _ => Err(rusqlite::Error::InvalidColumnType(6, "status".into(), rusqlite::types::Type::Text)),
    }
}

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let plan_id: String = row.get(3)?;
    let provider_name: String = row.get(4)?;
    let status: String = row.get(6)?;
    let current_period_end: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(Subscription {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id.map(|t| Uuid::parse_str(&t)).transpose().unwrap_or(None),
        customer_id: row.get(2)?,
        plan_id: Uuid::parse_str(&plan_id)
            .map_err(|_| rusqlite::Error::InvalidColumnType(3, "plan_id".into(), rusqlite::types::Type::Text))?,
        provider_name: ProviderName::from_str(&provider_name)
            .map_err(|_| rusqlite::Error::InvalidColumnType(4, "provider_name".into(), rusqlite::types::Type::Text))?,
        provider_subscription_id: row.get(5)?,
        status: parse_subscription_status(&status)?,
        current_period_end: current_period_end.parse().unwrap_or_else(|_| Utc::now()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_round_trips() {
        let repo = CustomerRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let c = Customer {
            id: Uuid::new_v4(),
            tenant_id: None,
            provider_name: Some(ProviderName::Stripe),
            provider_customer_id: Some("cus_abc".into()),
            email: Some("a@b.com".into()),
            name: None,
            metadata: Value::Null,
            created_at: Utc::now(),
        };
        repo.insert(&c).unwrap();
        assert_eq!(repo.find(c.id).unwrap().unwrap().email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn subscription_sync_updates_period_end_not_canceled_at() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let repo = SubscriptionRepository::new(db);
        let s = Subscription {
            id: Uuid::new_v4(),
            tenant_id: None,
            customer_id: "cus_1".into(),
            plan_id: Uuid::new_v4(),
            provider_name: ProviderName::Stripe,
            provider_subscription_id: "sub_1".into(),
            status: SubscriptionStatus::Active,
            current_period_end: Utc::now(),
            created_at: Utc::now(),
        };
        repo.insert(&s).unwrap();

        let real_period_end = Utc::now() + chrono::Duration::days(30);
        repo.update_after_gateway_sync(s.id, SubscriptionStatus::Active, real_period_end).unwrap();

        let found = repo.find(s.id).unwrap().unwrap();
        assert_eq!(found.current_period_end.timestamp(), real_period_end.timestamp());
    }

    #[test]
    fn dispute_and_invoice_and_payout_and_plan_round_trip() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let payment_id = Uuid::new_v4();

        let disputes = DisputeRepository::new(db.clone());
        let d = Dispute {
            id: Uuid::new_v4(),
            payment_id,
            provider_name: ProviderName::Stripe,
            provider_dispute_id: "dp_1".into(),
            amount: Money(500),
            currency: Currency::new("USD"),
            reason: Some("fraudulent".into()),
            status: DisputeStatus::NeedsResponse,
            evidence_due_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        disputes.insert(&d).unwrap();
        disputes.update_status(d.id, DisputeStatus::UnderReview).unwrap();
        assert_eq!(disputes.find_for_payment(payment_id).unwrap()[0].status, DisputeStatus::UnderReview);

        let invoices = InvoiceRepository::new(db.clone());
        let inv = Invoice {
            id: Uuid::new_v4(),
            tenant_id: None,
            customer_id: "cus_1".into(),
            amount: Money(1000),
            currency: Currency::new("USD"),
            status: InvoiceStatus::Open,
            provider_name: ProviderName::Stripe,
            provider_invoice_id: "in_1".into(),
            due_at: None,
            created_at: Utc::now(),
        };
        invoices.insert(&inv).unwrap();
        invoices.update_status(inv.id, InvoiceStatus::Paid).unwrap();
        assert_eq!(invoices.find(inv.id).unwrap().unwrap().status, InvoiceStatus::Paid);

        let payouts = PayoutRepository::new(db.clone());
        let p = Payout {
            id: Uuid::new_v4(),
            tenant_id: None,
            amount: Money(2000),
            currency: Currency::new("USD"),
            destination: "ba_1".into(),
            status: PayoutStatus::Pending,
            provider_name: ProviderName::Airwallex,
            provider_payout_id: "po_1".into(),
            created_at: Utc::now(),
        };
        payouts.insert(&p).unwrap();
        payouts.update_status(p.id, PayoutStatus::Paid).unwrap();
        assert_eq!(payouts.find(p.id).unwrap().unwrap().status, PayoutStatus::Paid);

        let plans = PlanRepository::new(db);
        let plan = Plan {
            id: Uuid::new_v4(),
            tenant_id: None,
            provider_name: ProviderName::Stripe,
            provider_plan_id: "plan_1".into(),
            amount: Money(999),
            currency: Currency::new("USD"),
            interval: "month".into(),
            interval_count: 1,
        };
        plans.insert(&plan).unwrap();
        assert_eq!(plans.find(plan.id).unwrap().unwrap().provider_plan_id, "plan_1");
    }
}
