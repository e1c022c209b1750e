use axum::{body::Bytes, extract::State, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use crate::api::AppState;
use crate::error::AppError;
use crate::middleware::auth::CronCaller;
use crate::payments::types::BillingPeriod;
use crate::services::BillingRunSummary;

#[derive(Debug, Default, Deserialize)]
pub struct RunBillingRequest {
    /// Any date inside the month to bill. Defaults to today.
    pub period_start: Option<NaiveDate>,
}

/// POST /api/billing/run
///
/// Body is optional; an empty body bills the current month.
pub async fn run_billing(
    State(state): State<AppState>,
    _caller: CronCaller,
    body: Bytes,
) -> Result<Json<BillingRunSummary>, AppError> {
    let request: RunBillingRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunBillingRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::invalid_field("period_start", e.to_string()))?
    };

    let period = BillingPeriod::month_of(
        request
            .period_start
            .unwrap_or_else(|| Utc::now().date_naive()),
    );
    info!(period = %period, "billing run requested");

    let summary = state.billing.run(period).await?;
    Ok(Json(summary))
}
