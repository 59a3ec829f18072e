//! `WebhookEvent` repository (C9 storage side, spec §3, §4.9). Unique on
//! `(provider, event_id)` — the constraint the inbound pipeline leans on
//! for at-most-once processing (spec §8 property 6).

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::{ConductorError, ProviderName, WebhookEvent, WebhookEventStatus};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{is_unique_violation, lock_poisoned, map_db_error};

pub struct WebhookEventRepository {
    db: Arc<Database>,
}

impl WebhookEventRepository {
    pub fn new(db: Arc<Database>) -> Self {
        WebhookEventRepository { db }
    }

    /// Inserts a new row for `(provider, event_id)`. A unique-constraint hit
    /// means this provider event was already seen; the caller (C9 step 2)
    /// treats that as "look up the existing row" rather than an error.
    pub fn insert(&self, event: &WebhookEvent) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "INSERT INTO webhook_events
                (id, tenant_id, provider, event_type, event_id, payload, status,
                 attempts, max_attempts, next_attempt_at, last_error, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                event.id.to_string(),
                event.tenant_id.map(|t| t.to_string()),
                event.provider.as_str(),
                event.event_type,
                event.event_id,
                event.payload.to_string(),
                status_str(event.status),
                event.attempts,
                event.max_attempts,
                event.next_attempt_at.map(|t| t.to_rfc3339()),
                event.last_error,
                event.created_at.to_rfc3339(),
            ],
        )
        .map(|_| ())
        .map_err(|e| {
            if is_unique_violation(&e) {
                ConductorError::Conflict("webhook event already recorded".to_string())
            } else {
                map_db_error(e)
            }
        })
    }

    pub fn find_by_provider_event(
        &self,
        provider: ProviderName,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT id, tenant_id, provider, event_type, event_id, payload, status,
                    attempts, max_attempts, next_attempt_at, last_error, created_at
             FROM webhook_events WHERE provider = ?1 AND event_id = ?2",
            params![provider.as_str(), event_id],
            row_to_event,
        )
        .optional()
        .map_err(map_db_error)
    }

    pub fn mark_processing(&self, id: Uuid) -> Result<(), ConductorError> {
        self.set_status(id, WebhookEventStatus::Processing)
    }

    pub fn mark_completed(&self, id: Uuid) -> Result<(), ConductorError> {
        self.set_status(id, WebhookEventStatus::Completed)
    }

    fn set_status(&self, id: Uuid, status: WebhookEventStatus) -> Result<(), ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE webhook_events SET status = ?1 WHERE id = ?2",
            params![status_str(status), id.to_string()],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    /// Records a handler failure: increments `attempts`, stores `last_error`,
    /// and either schedules `next_attempt_at` (status `retrying`) or marks
    /// the row terminally `failed` once `max_attempts` is reached (spec §4.9
    /// step 5).
    pub fn record_failure(
        &self,
        id: Uuid,
        attempts: u32,
        max_attempts: u32,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), ConductorError> {
        let status = if attempts >= max_attempts {
            WebhookEventStatus::Failed
        } else {
            WebhookEventStatus::Retrying
        };
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            "UPDATE webhook_events
             SET attempts = ?1, status = ?2, last_error = ?3, next_attempt_at = ?4
             WHERE id = ?5",
            params![
                attempts,
                status_str(status),
                error,
                next_attempt_at.map(|t| t.to_rfc3339()),
                id.to_string(),
            ],
        )
        .map(|_| ())
        .map_err(map_db_error)
    }

    /// Batch of rows due for a retry, for the background re-invocation
    /// worker (spec §4.9 final paragraph).
    pub fn due_for_retry(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<WebhookEvent>, ConductorError> {
        let conn = self.db.conn.lock().map_err(|_| lock_poisoned())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, provider, event_type, event_id, payload, status,
                        attempts, max_attempts, next_attempt_at, last_error, created_at
                 FROM webhook_events
                 WHERE status IN ('pending', 'retrying') AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                 ORDER BY created_at ASC LIMIT ?2",
            )
            .map_err(map_db_error)?;
        let rows = stmt
            .query_map(params![now.to_rfc3339(), limit], row_to_event)
            .map_err(map_db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_error)
    }
}

fn status_str(s: WebhookEventStatus) -> &'static str {
    match s {
        WebhookEventStatus::Pending => "pending",
        WebhookEventStatus::Processing => "processing",
        WebhookEventStatus::Completed => "completed",
        WebhookEventStatus::Failed => "failed",
        WebhookEventStatus::Retrying => "retrying",
    }
}

fn parse_status(s: &str) -> rusqlite::Result<WebhookEventStatus> {
    match s {
        "pending" => Ok(WebhookEventStatus::Pending),
        "processing" => Ok(WebhookEventStatus::Processing),
        "completed" => Ok(WebhookEventStatus::Completed),
        "failed" => Ok(WebhookEventStatus::Failed),
        "retrying" => Ok(WebhookEventStatus::Retrying),
        _ => Err(rusqlite::Error::InvalidColumnType(6, "status".into(), rusqlite::types::Type::Text)),
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let provider: String = row.get(2)?;
    let payload: String = row.get(5)?;
    let status: String = row.get(6)?;
    let next_attempt_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(11)?;

    Ok(WebhookEvent {
        id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        tenant_id: tenant_id
            .map(|t| Uuid::parse_str(&t))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "tenant_id".into(), rusqlite::types::Type::Text))?,
        provider: ProviderName::from_str(&provider)
            .map_err(|_| rusqlite::Error::InvalidColumnType(2, "provider".into(), rusqlite::types::Type::Text))?,
        event_type: row.get(3)?,
        event_id: row.get(4)?,
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        status: parse_status(&status)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        next_attempt_at: next_attempt_at.and_then(|s| s.parse().ok()),
        last_error: row.get(10)?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(11, "created_at".into(), rusqlite::types::Type::Text))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_id: &str) -> WebhookEvent {
        WebhookEvent {
            id: Uuid::new_v4(),
            tenant_id: None,
            provider: ProviderName::Stripe,
            event_type: "payment_intent.succeeded".into(),
            event_id: event_id.into(),
            payload: serde_json::json!({"id": event_id}),
            status: WebhookEventStatus::Pending,
            attempts: 0,
            max_attempts: 5,
            next_attempt_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_provider_event_id_conflicts() {
        let repo = WebhookEventRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        repo.insert(&event("evt_1")).unwrap();
        let second = repo.insert(&event("evt_1"));
        assert!(matches!(second, Err(ConductorError::Conflict(_))));
    }

    #[test]
    fn record_failure_marks_terminal_at_max_attempts() {
        let repo = WebhookEventRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let e = event("evt_2");
        repo.insert(&e).unwrap();
        repo.record_failure(e.id, 5, 5, "boom", None).unwrap();

        let found = repo.find_by_provider_event(ProviderName::Stripe, "evt_2").unwrap().unwrap();
        assert_eq!(found.status, WebhookEventStatus::Failed);
        assert_eq!(found.attempts, 5);
    }

    #[test]
    fn due_for_retry_respects_next_attempt_at() {
        let repo = WebhookEventRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let e = event("evt_3");
        repo.insert(&e).unwrap();
        let future = Utc::now() + chrono::Duration::seconds(60);
        repo.record_failure(e.id, 1, 5, "transient", Some(future)).unwrap();

        assert!(repo.due_for_retry(Utc::now(), 10).unwrap().is_empty());
        assert_eq!(repo.due_for_retry(future + chrono::Duration::seconds(1), 10).unwrap().len(), 1);
    }
}
