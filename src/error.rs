//! Unified error handling for the rent ledger backend
//!
//! Every failure surfaced over HTTP is an `AppError`: it carries the HTTP
//! status, a machine-readable `ErrorCode`, a user-facing message and a
//! retryability flag. Module-local errors (`PaymentError`, `DatabaseError`,
//! `ConfigError`) convert into it at the service boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "TENANT_NOT_FOUND")]
    TenantNotFound,
    #[serde(rename = "ENROLLMENT_NOT_FOUND")]
    EnrollmentNotFound,
    #[serde(rename = "PAYMENT_METHOD_NOT_FOUND")]
    PaymentMethodNotFound,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "ALREADY_REFUNDED")]
    AlreadyRefunded,
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,
    #[serde(rename = "MANUAL_REFUND_REQUIRED")]
    ManualRefundRequired,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,

    // Auth
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,

    // Ledger
    #[serde(rename = "LEDGER_INCONSISTENCY")]
    LedgerInconsistency,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PaymentNotFound => "PAYMENT_NOT_FOUND",
            ErrorCode::TenantNotFound => "TENANT_NOT_FOUND",
            ErrorCode::EnrollmentNotFound => "ENROLLMENT_NOT_FOUND",
            ErrorCode::PaymentMethodNotFound => "PAYMENT_METHOD_NOT_FOUND",
            ErrorCode::RefundNotAllowed => "REFUND_NOT_ALLOWED",
            ErrorCode::AlreadyRefunded => "ALREADY_REFUNDED",
            ErrorCode::DuplicatePayment => "DUPLICATE_PAYMENT",
            ErrorCode::ManualRefundRequired => "MANUAL_REFUND_REQUIRED",
            ErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorCode::LedgerInconsistency => "LEDGER_INCONSISTENCY",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::PaymentProviderError => "PAYMENT_PROVIDER_ERROR",
            ErrorCode::RateLimitError => "RATE_LIMIT_ERROR",
            ErrorCode::ExternalServiceTimeout => "EXTERNAL_SERVICE_TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
        }
    }
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    PaymentNotFound { payment_id: String },
    TenantNotFound { tenant_id: String },
    /// No active autopay enrollment for the tenant
    EnrollmentNotFound { tenant_id: String },
    PaymentMethodNotFound { payment_method_id: String },
    /// Payment is not in a refundable state
    RefundNotAllowed { payment_id: String, status: String },
    AlreadyRefunded { payment_id: String },
    /// The tenant already has an active payment for the period
    DuplicatePayment { tenant_id: String, period: String },
    /// Payment was recorded offline and must be refunded offline
    ManualRefundRequired { payment_id: String, method: String },
    InvalidAmount { amount: String, reason: String },
}

/// Caller identity failures at the shared-secret seam
#[derive(Debug, Clone)]
pub enum AuthError {
    MissingCredentials,
    InvalidCredentials,
    MissingIdentity { header: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Webhook signature did not verify
    SignatureInvalid { message: String },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Auth(AuthError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn auth(err: AuthError) -> Self {
        Self::new(AppErrorKind::Auth(err))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::TenantNotFound { .. } => 404,
                DomainError::EnrollmentNotFound { .. } => 404,
                DomainError::PaymentMethodNotFound { .. } => 404,
                DomainError::RefundNotAllowed { .. } => 409, // Conflict
                DomainError::AlreadyRefunded { .. } => 409,
                DomainError::DuplicatePayment { .. } => 409,
                DomainError::ManualRefundRequired { .. } => 422, // Unprocessable Entity
                DomainError::InvalidAmount { .. } => 400,
            },
            AppErrorKind::Auth(_) => 401,
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        502 // Bad Gateway
                    }
                }
                ExternalError::SignatureInvalid { .. } => 401,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::TenantNotFound { .. } => ErrorCode::TenantNotFound,
                DomainError::EnrollmentNotFound { .. } => ErrorCode::EnrollmentNotFound,
                DomainError::PaymentMethodNotFound { .. } => ErrorCode::PaymentMethodNotFound,
                DomainError::RefundNotAllowed { .. } => ErrorCode::RefundNotAllowed,
                DomainError::AlreadyRefunded { .. } => ErrorCode::AlreadyRefunded,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
                DomainError::ManualRefundRequired { .. } => ErrorCode::ManualRefundRequired,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
            },
            AppErrorKind::Auth(_) => ErrorCode::Unauthorized,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::TenantNotFound { tenant_id } => {
                    format!("Tenant '{}' not found", tenant_id)
                }
                DomainError::EnrollmentNotFound { tenant_id } => {
                    format!("No active autopay enrollment for tenant '{}'", tenant_id)
                }
                DomainError::PaymentMethodNotFound { payment_method_id } => {
                    format!("Payment method '{}' not found", payment_method_id)
                }
                DomainError::RefundNotAllowed { payment_id, status } => {
                    format!(
                        "Payment '{}' cannot be refunded while it is {}",
                        payment_id, status
                    )
                }
                DomainError::AlreadyRefunded { payment_id } => {
                    format!("Payment '{}' has already been refunded", payment_id)
                }
                DomainError::DuplicatePayment { tenant_id, period } => {
                    format!(
                        "Tenant '{}' already has an active payment for {}",
                        tenant_id, period
                    )
                }
                DomainError::ManualRefundRequired { payment_id, method } => {
                    format!(
                        "Payment '{}' was recorded as {}; refund it offline",
                        payment_id, method
                    )
                }
                DomainError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingCredentials => "Missing authorization credentials".to_string(),
                AuthError::InvalidCredentials => "Invalid authorization credentials".to_string(),
                AuthError::MissingIdentity { header } => {
                    format!("Missing or invalid '{}' header", header)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    message,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        "Payment processor is temporarily unavailable. Please try again"
                            .to_string()
                    } else {
                        format!("Payment could not be processed: {}", message)
                    }
                }
                ExternalError::SignatureInvalid { .. } => "Invalid webhook signature".to_string(),
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!(
                            "Rate limit exceeded for {}. Please try again later",
                            service
                        )
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid '{}': {}", field, reason)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) | AppErrorKind::Auth(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::SignatureInvalid { .. } => false,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {}", context, self.user_message()),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs and From<PaymentError>
// in payments/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
