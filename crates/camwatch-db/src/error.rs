//! Database error types.

use thiserror::Error;

use camwatch_models::StatusParseError;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl DbError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StatusParseError> for DbError {
    fn from(e: StatusParseError) -> Self {
        Self::Corrupt(e.to_string())
    }
}
