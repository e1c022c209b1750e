//! Shared-secret and identity-header extractors.
//!
//! Identity itself is established upstream; these extractors only check the
//! shared secrets and read the identity headers that upstream sets.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::utils::secure_eq;

pub const ADMIN_ID_HEADER: &str = "x-admin-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub cron_secret: String,
    pub admin_token: String,
}

/// Caller presented the billing cron secret.
#[derive(Debug, Clone, Copy)]
pub struct CronCaller;

#[derive(Debug, Clone, Copy)]
pub struct AdminIdentity(pub Uuid);

#[derive(Debug, Clone, Copy)]
pub struct TenantIdentity(pub Uuid);

fn with_request_id(err: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}

/// Constant-time bearer check. An unset secret rejects every caller.
pub fn require_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| AppError::auth(AuthError::MissingCredentials))?;

    if expected.is_empty() || !secure_eq(presented.as_bytes(), expected.as_bytes()) {
        return Err(AppError::auth(AuthError::InvalidCredentials));
    }
    Ok(())
}

pub fn identity_header(headers: &HeaderMap, name: &str) -> Result<Uuid, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| {
            AppError::auth(AuthError::MissingIdentity {
                header: name.to_string(),
            })
        })
}

impl<S> FromRequestParts<S> for CronCaller
where
    AuthConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthConfig::from_ref(state);
        require_bearer(&parts.headers, &auth.cron_secret)
            .map_err(|e| with_request_id(e, &parts.headers))?;
        Ok(CronCaller)
    }
}

impl<S> FromRequestParts<S> for AdminIdentity
where
    AuthConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthConfig::from_ref(state);
        require_bearer(&parts.headers, &auth.admin_token)
            .and_then(|_| identity_header(&parts.headers, ADMIN_ID_HEADER))
            .map(AdminIdentity)
            .map_err(|e| with_request_id(e, &parts.headers))
    }
}

impl<S> FromRequestParts<S> for TenantIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_header(&parts.headers, TENANT_ID_HEADER)
            .map(TenantIdentity)
            .map_err(|e| with_request_id(e, &parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn bearer_must_match() {
        let ok = headers(&[("authorization", "Bearer s3cret")]);
        assert!(require_bearer(&ok, "s3cret").is_ok());

        let wrong = headers(&[("authorization", "Bearer nope")]);
        assert_eq!(require_bearer(&wrong, "s3cret").unwrap_err().status_code(), 401);

        assert!(require_bearer(&HeaderMap::new(), "s3cret").is_err());
    }

    #[test]
    fn empty_secret_rejects_everyone() {
        let h = headers(&[("authorization", "Bearer ")]);
        assert!(require_bearer(&h, "").is_err());
    }

    #[test]
    fn identity_header_requires_uuid() {
        let id = Uuid::new_v4();
        let h = headers(&[(TENANT_ID_HEADER, &id.to_string())]);
        assert_eq!(identity_header(&h, TENANT_ID_HEADER).unwrap(), id);

        let bad = headers(&[(TENANT_ID_HEADER, "tenant-7")]);
        assert!(identity_header(&bad, TENANT_ID_HEADER).is_err());
    }
}
