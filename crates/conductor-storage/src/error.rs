//! Maps `rusqlite` failures onto the canonical error taxonomy.

use conductor_types::ConductorError;

/// SQLITE_CONSTRAINT_UNIQUE's extended result code.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.extended_code == SQLITE_CONSTRAINT_UNIQUE)
}

pub fn map_db_error(err: rusqlite::Error) -> ConductorError {
    tracing::error!(error = %err, "database error");
    ConductorError::Internal("database error".to_string())
}

pub fn lock_poisoned() -> ConductorError {
    ConductorError::Internal("database lock poisoned".to_string())
}
