//! SQLite connection wrapper and schema management, matching the reference
//! gateway's `Mutex<Connection>` pattern: one connection, serialized access,
//! schema created idempotently on open.

use std::sync::Mutex;

use conductor_types::ConductorError;
use rusqlite::Connection;

use crate::error::lock_poisoned;

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ConductorError> {
        let conn = Connection::open(path).map_err(|e| ConductorError::Internal(e.to_string()))?;
        let db = Database { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, ConductorError> {
        let conn = Connection::open_in_memory().map_err(|e| ConductorError::Internal(e.to_string()))?;
        let db = Database { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ConductorError> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key TEXT UNIQUE NOT NULL,
                api_secret_hash TEXT NOT NULL,
                webhook_url TEXT,
                webhook_secret TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                settings TEXT NOT NULL DEFAULT '{}',
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                customer_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_method_ref TEXT NOT NULL,
                provider_name TEXT,
                provider_charge_id TEXT,
                capture_method TEXT NOT NULL,
                captured_amount INTEGER NOT NULL DEFAULT 0,
                requires_action INTEGER NOT NULL DEFAULT 0,
                next_action TEXT,
                client_secret TEXT,
                idempotency_key TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_payments_tenant ON payments(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_payments_provider_charge ON payments(provider_charge_id);

            CREATE TABLE IF NOT EXISTS refunds (
                id TEXT PRIMARY KEY,
                payment_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                reason TEXT,
                status TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_refund_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_refunds_payment ON refunds(payment_id);

            CREATE TABLE IF NOT EXISTS provider_mappings (
                entity_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_entity_id TEXT NOT NULL,
                PRIMARY KEY (entity_id, entity_type)
            );

            CREATE TABLE IF NOT EXISTS idempotency_keys (
                -- empty string stands in for "no tenant" so the composite key
                -- stays usable as a SQLite PRIMARY KEY (which rejects NULL).
                tenant_id TEXT NOT NULL DEFAULT '',
                key TEXT NOT NULL,
                request_path TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                response_code INTEGER,
                response_body TEXT,
                locked_at TEXT,
                completed_at TEXT,
                expires_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, key)
            );

            CREATE TABLE IF NOT EXISTS webhook_events (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                provider TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 5,
                next_attempt_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(provider, event_id)
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_events_sweep ON webhook_events(status, next_attempt_at);

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                user_id TEXT,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                request_summary TEXT NOT NULL,
                response_code INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                ip TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_logs(resource_type, resource_id);
            CREATE INDEX IF NOT EXISTS idx_audit_tenant_time ON audit_logs(tenant_id, created_at);

            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                provider_name TEXT,
                provider_customer_id TEXT,
                email TEXT,
                name TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payment_methods (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                customer_id TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_payment_method_id TEXT NOT NULL,
                method_type TEXT NOT NULL,
                last4 TEXT,
                brand TEXT,
                is_default INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS disputes (
                id TEXT PRIMARY KEY,
                payment_id TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_dispute_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                reason TEXT,
                status TEXT NOT NULL,
                evidence_due_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                customer_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_invoice_id TEXT NOT NULL,
                due_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payouts (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                destination TEXT NOT NULL,
                status TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_payout_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                provider_name TEXT NOT NULL,
                provider_plan_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                interval TEXT NOT NULL,
                interval_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                customer_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                provider_subscription_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_period_end TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| ConductorError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='payments'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
