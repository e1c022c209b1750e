use crate::database::error::DatabaseError;
use crate::database::repository::TenantReader;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// What billing needs to know about a tenant. Read-only; owned by the
/// tenant/property side of the portal.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TenantBillingProfile {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub base_rent: BigDecimal,
    pub email: String,
    pub full_name: String,
}

pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantReader for TenantRepository {
    async fn billing_profile(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantBillingProfile>, DatabaseError> {
        sqlx::query_as::<_, TenantBillingProfile>(
            "SELECT tenant_id, user_id, property_id, base_rent, email, full_name
             FROM tenant_billing_profiles
             WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
