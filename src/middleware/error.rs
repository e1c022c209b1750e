//! Error response formatting
//!
//! Every handler error renders with the same JSON structure: machine-readable
//! error code, user-facing message, request id and retryability.

use crate::error::{AppError, AppErrorKind, ErrorCode, ValidationError};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        let response = Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        };

        match &error.kind {
            AppErrorKind::Validation(ValidationError::InvalidField { field, reason }) => {
                response.with_details(json!({ "field": field, "error": reason }))
            }
            AppErrorKind::Validation(ValidationError::InvalidAmount { amount, reason }) => {
                response.with_details(json!({ "amount": amount, "error": reason }))
            }
            AppErrorKind::Validation(ValidationError::MissingField { field }) => {
                response.with_details(json!({ "field": field }))
            }
            _ => response,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Generic body for 500s; the cause stays in the logs.
    pub fn internal_error(request_id: Option<String>, retryable: bool) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(retryable),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = %self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "request failed"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = %self.error_code().as_str(),
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "request rejected"
            );
        }

        let body = if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            ErrorResponse::internal_error(self.request_id.clone(), self.is_retryable())
        } else {
            ErrorResponse::from_app_error(&self)
        };
        (status_code, Json(body)).into_response()
    }
}

pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainError, InfrastructureError};

    #[test]
    fn already_refunded_keeps_request_id() {
        let app_error = AppError::domain(DomainError::AlreadyRefunded {
            payment_id: "pay_1".to_string(),
        })
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::AlreadyRefunded);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(error_response.message.contains("already been refunded"));
        assert!(error_response.details.is_none());
    }

    #[test]
    fn invalid_field_carries_details() {
        let error = AppError::invalid_field("period_start", "must be on or before period_end");
        let response = ErrorResponse::from_app_error(&error);

        assert_eq!(response.error, ErrorCode::ValidationError);
        let details = response.details.unwrap();
        assert_eq!(details["field"], "period_start");
        assert_eq!(details["error"], "must be on or before period_end");
    }

    #[test]
    fn negative_amount_is_bad_request() {
        let response = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn duplicate_payment_is_conflict() {
        let response = AppError::domain(DomainError::DuplicatePayment {
            tenant_id: "t1".to_string(),
            period: "2025-03-01..2025-03-31".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn database_error_is_masked() {
        let response = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "relation payments does not exist".to_string(),
            is_retryable: false,
        }))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
