use thiserror::Error;

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for check_violation
const CHECK_VIOLATION: &str = "23514";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: Option<String> },
    CheckViolation { constraint: Option<String> },
    ConnectionFailed { message: String },
    PoolTimeout,
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Unknown {
            message: message.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolTimeout,
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionFailed {
                message: e.to_string(),
            },
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(str::to_string),
                },
                Some(CHECK_VIOLATION) => DatabaseErrorKind::CheckViolation {
                    constraint: db_err.constraint().map(str::to_string),
                },
                _ => DatabaseErrorKind::Unknown {
                    message: db_err.message().to_string(),
                },
            },
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionFailed { .. } | DatabaseErrorKind::PoolTimeout
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "Payment" => {
                AppErrorKind::Domain(DomainError::PaymentNotFound {
                    payment_id: id.clone(),
                })
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "Tenant" => {
                AppErrorKind::Domain(DomainError::TenantNotFound {
                    tenant_id: id.clone(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}
