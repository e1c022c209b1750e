use crate::database::error::DatabaseError;
use crate::database::repository::EnrollmentStore;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const ENROLLMENT_COLUMNS: &str =
    "id, tenant_id, payment_method_id, is_active, discount_amount, enrolled_at, cancelled_at, updated_at";

/// Autopay enrollment entity (one row per tenant)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AutopayEnrollment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub payment_method_id: Uuid,
    pub is_active: bool,
    pub discount_amount: BigDecimal,
    pub enrolled_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AutopayEnrollment {
    pub fn is_billable(&self) -> bool {
        self.is_active && self.cancelled_at.is_none()
    }
}

/// Repository for autopay enrollments
pub struct EnrollmentRepository {
    pool: PgPool,
}

impl EnrollmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentStore for EnrollmentRepository {
    async fn list_active(&self) -> Result<Vec<AutopayEnrollment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM autopay_enrollments \
             WHERE is_active = true AND cancelled_at IS NULL \
             ORDER BY enrolled_at ASC",
            ENROLLMENT_COLUMNS
        );
        sqlx::query_as::<_, AutopayEnrollment>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<AutopayEnrollment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM autopay_enrollments WHERE tenant_id = $1",
            ENROLLMENT_COLUMNS
        );
        sqlx::query_as::<_, AutopayEnrollment>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_active(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
        discount_amount: &BigDecimal,
    ) -> Result<AutopayEnrollment, DatabaseError> {
        let sql = format!(
            "INSERT INTO autopay_enrollments (tenant_id, payment_method_id, is_active, discount_amount) \
             VALUES ($1, $2, true, $3) \
             ON CONFLICT (tenant_id) DO UPDATE \
             SET payment_method_id = EXCLUDED.payment_method_id, \
                 discount_amount = EXCLUDED.discount_amount, \
                 is_active = true, cancelled_at = NULL, updated_at = NOW() \
             RETURNING {}",
            ENROLLMENT_COLUMNS
        );
        sqlx::query_as::<_, AutopayEnrollment>(&sql)
            .bind(tenant_id)
            .bind(payment_method_id)
            .bind(discount_amount)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn cancel(&self, tenant_id: Uuid) -> Result<Option<AutopayEnrollment>, DatabaseError> {
        let sql = format!(
            "UPDATE autopay_enrollments \
             SET is_active = false, cancelled_at = NOW(), updated_at = NOW() \
             WHERE tenant_id = $1 AND is_active = true AND cancelled_at IS NULL \
             RETURNING {}",
            ENROLLMENT_COLUMNS
        );
        sqlx::query_as::<_, AutopayEnrollment>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
