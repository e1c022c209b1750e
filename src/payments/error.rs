use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Invalid webhook payload: {message}")]
    WebhookPayloadError { message: String },

    #[error("Processor error: processor={processor}, message={message}")]
    ProcessorError {
        processor: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn processor(message: impl Into<String>, retryable: bool) -> Self {
        PaymentError::ProcessorError {
            processor: "stripe".to_string(),
            message: message.into(),
            provider_code: None,
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::WebhookPayloadError { .. } => false,
            PaymentError::ProcessorError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::WebhookPayloadError { .. } => 400,
            PaymentError::ProcessorError { .. } => 502,
        }
    }

    /// The processor's own message, shown to the payer so they can retry.
    pub fn processor_message(&self) -> &str {
        match self {
            PaymentError::ValidationError { message, .. }
            | PaymentError::PaymentDeclinedError { message, .. }
            | PaymentError::NetworkError { message }
            | PaymentError::RateLimitError { message, .. }
            | PaymentError::WebhookVerificationError { message }
            | PaymentError::WebhookPayloadError { message }
            | PaymentError::ProcessorError { message, .. } => message,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::PaymentDeclinedError { message, .. } => {
                format!("Payment was declined: {}", message)
            }
            PaymentError::NetworkError { .. } => {
                "Payment processor is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment processor. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::WebhookPayloadError { .. } => "Invalid webhook payload".to_string(),
            PaymentError::ProcessorError { message, .. } => {
                format!("Payment processor returned an error: {}", message)
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "payment processor".to_string(),
                retry_after: retry_after_seconds,
            })),
            PaymentError::WebhookVerificationError { message } => {
                AppError::new(AppErrorKind::External(ExternalError::SignatureInvalid {
                    message,
                }))
            }
            other => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "stripe".to_string(),
                message: other.processor_message().to_string(),
                is_retryable: other.is_retryable(),
            })),
        }
    }
}
