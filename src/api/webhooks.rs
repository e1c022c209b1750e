use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /webhooks/processor
///
/// The raw body is handed to the reconciler untouched; the signature covers
/// the exact bytes. Anything except a transient store failure is answered
/// with 200 so the processor stops redelivering.
pub async fn processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let attach = |err: AppError| match &request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("webhook missing signature header");
            attach(AppError::invalid_field(
                SIGNATURE_HEADER,
                "signature header is required",
            ))
        })?;

    let outcome = state
        .reconciler
        .handle(&body, signature)
        .await
        .map_err(|e| attach(e.into()))?;

    info!(outcome = ?outcome, "webhook handled");
    Ok(Json(json!({ "received": true, "result": outcome })))
}
