use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("You are not in a unit of work")]
    NotInUnitOfWork,

    #[error("You cannot start more than one unit of work at the same time")]
    UnitOfWorkAlreadyStarted,

    #[error("No transaction is active on this session")]
    NoActiveTransaction,

    #[error("A transaction is already active on this session")]
    TransactionAlreadyActive,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// True for errors raised by misuse of the unit-of-work lifecycle rather
    /// than by the database.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::NotInUnitOfWork
                | Self::UnitOfWorkAlreadyStarted
                | Self::NoActiveTransaction
                | Self::TransactionAlreadyActive
                | Self::SessionClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors() {
        assert!(AppError::UnitOfWorkAlreadyStarted.is_lifecycle());
        assert!(AppError::SessionClosed.is_lifecycle());
        assert!(!AppError::NotFound("song 3".to_string()).is_lifecycle());
        assert!(!AppError::Database(sea_orm::DbErr::RecordNotFound("artist".into())).is_lifecycle());
    }
}
