//! `AuditLog` repository (C11, spec §4.11). Append-only: there is no
//! update method, only `insert`, range reads and an age-based sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::{AuditLog, ConductorError};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{lock_poisoned, map_db_error};

pub struct AuditLogRepository {
    db: Arc<Database>,
}

impl AuditLogRepository {
    pub fn new(db: Arc<Database>) -> Self {
        AuditLogRepository { db }
    }

    pub fn insert(&self, entry: &AuditLog) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO audit_logs (id, tenant_id, user_id, action, resource_type,
                                      resource_id, request_summary, response_code, success,
                                      error, ip, user_agent, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                entry.id.to_string(),
                entry.tenant_id.map(|t| t.to_string()),
                entry.user_id,
                entry.action,
                entry.resource_type,
                entry.resource_id,
                entry.request_summary,
                entry.response_code,
                entry.success as i64,
                entry.error,
                entry.ip,
                entry.user_agent,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    pub fn find_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLog>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, user_id, action, resource_type, resource_id,
                        request_summary, response_code, success, error, ip, user_agent, created_at
                 FROM audit_logs WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY created_at DESC",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![resource_type, resource_id], row_to_entry)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }

    pub fn find_for_tenant_range(
        &self,
        tenant_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditLog>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, user_id, action, resource_type, resource_id,
                        request_summary, response_code, success, error, ip, user_agent, created_at
                 FROM audit_logs
                 WHERE tenant_id IS ?1 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at DESC",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(
                params![tenant_id.map(|t| t.to_string()), from.to_rfc3339(), to.to_rfc3339()],
                row_to_entry,
            )
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }

    /// Deletes rows older than `older_than`, for the retention-window sweeper
    /// (spec §4.11).
    pub fn sweep_older_than(&self, older_than: DateTime<Utc>) -> Result<u64, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let affected = conn
            .execute(
                "DELETE FROM audit_logs WHERE created_at < ?1",
                params![older_than.to_rfc3339()],
            )
            .map_err(map_db_error)?;
        Ok(affected as u64)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<AuditLog> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let created_at: String = row.get(12)?;
    Ok(AuditLog {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id
            .map(|t| Uuid::parse_str(&t))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "tenant_id".into(), rusqlite::types::Type::Text))?,
        user_id: row.get(2)?,
        action: row.get(3)?,
        resource_type: row.get(4)?,
        resource_id: row.get(5)?,
        request_summary: row.get(6)?,
        response_code: row.get(7)?,
        success: row.get::<_, i64>(8)? != 0,
        error: row.get(9)?,
        ip: row.get(10)?,
        user_agent: row.get(11)?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(12, "created_at".into(), rusqlite::types::Type::Text))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(resource_id: &str) -> AuditLog {
        AuditLog {
            id: Uuid::new_v4(),
            tenant_id: None,
            user_id: None,
            action: "create_charge".into(),
            resource_type: "payment".into(),
            resource_id: resource_id.into(),
            request_summary: "amount=2500 currency=USD".into(),
            response_code: 200,
            success: true,
            error: None,
            ip: Some("127.0.0.1".into()),
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_then_find_for_resource() {
        let repo = AuditLogRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        repo.insert(&entry("pay_1")).unwrap();
        let found = repo.find_for_resource("payment", "pay_1").unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn sweep_removes_only_older_rows() {
        let repo = AuditLogRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let mut old = entry("pay_old");
        old.created_at = Utc::now() - chrono::Duration::days(400);
        repo.insert(&old).unwrap();
        repo.insert(&entry("pay_new")).unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(365);
        let swept = repo.sweep_older_than(cutoff).unwrap();
        assert_eq!(swept, 1);
        assert_eq!(repo.find_for_resource("payment", "pay_old").unwrap().len(), 0);
        assert_eq!(repo.find_for_resource("payment", "pay_new").unwrap().len(), 1);
    }
}
