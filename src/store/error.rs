//! Store Errors

use crate::domain::DomainError;

pub type StoreResult<T> = Result<T, StoreError>;

/// SQLSTATE raised by `FOR UPDATE NOWAIT` when a row is already locked
pub const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE raised when an insert breaks a UNIQUE constraint
pub const UNIQUE_VIOLATION: &str = "23505";

/// Errors that can occur in the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Id does not resolve
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// No-wait lock already held by another transaction
    #[error("{entity} {id} is locked by another transaction")]
    LockConflict { entity: &'static str, id: i64 },

    /// A row with the same unique key already exists
    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: i64 },

    /// Persisted value could not be decoded into a domain type
    #[error("Corrupt {table} row: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: DomainError,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn lock_conflict(entity: &'static str, id: i64) -> Self {
        Self::LockConflict { entity, id }
    }

    pub fn duplicate(entity: &'static str, id: i64) -> Self {
        Self::Duplicate { entity, id }
    }

    /// Classify a sqlx error raised while touching `entity` `id`.
    pub fn from_sqlx(err: sqlx::Error, entity: &'static str, id: i64) -> Self {
        let code = match &err {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };

        if code.as_deref() == Some(LOCK_NOT_AVAILABLE) {
            Self::LockConflict { entity, id }
        } else if code.as_deref() == Some(UNIQUE_VIOLATION) {
            Self::Duplicate { entity, id }
        } else if matches!(err, sqlx::Error::RowNotFound) {
            Self::NotFound { entity, id }
        } else {
            Self::Database(err)
        }
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StoreError::from_sqlx(sqlx::Error::RowNotFound, "offer", 5);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "offer not found: 5");
    }

    #[test]
    fn test_other_errors_stay_database() {
        let err = StoreError::from_sqlx(sqlx::Error::PoolTimedOut, "offer", 5);
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_lock_conflict());
    }

    #[test]
    fn test_duplicate_message() {
        let err = StoreError::duplicate("contract for interest", 12);
        assert_eq!(err.to_string(), "contract for interest 12 already exists");
        assert!(!err.is_not_found());
    }
}
