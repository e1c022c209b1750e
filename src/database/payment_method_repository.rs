use crate::database::error::DatabaseError;
use crate::database::repository::PaymentMethodStore;
use crate::payments::types::PaymentMethodKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

/// Saved processor instrument. Only processor tokens are stored, never raw
/// account or card numbers.
#[derive(Debug, Clone, FromRow)]
pub struct SavedPaymentMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub processor_customer_id: String,
    pub processor_method_token: String,
    pub method_type: String,
    pub last4: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SavedPaymentMethod {
    pub fn kind(&self) -> Result<PaymentMethodKind, DatabaseError> {
        PaymentMethodKind::from_str(&self.method_type).map_err(|e| {
            DatabaseError::unknown(format!("payment method {}: {}", self.id, e))
        })
    }
}

/// Repository for saved payment methods
pub struct PaymentMethodRepository {
    pool: PgPool,
}

impl PaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find payment methods by user ID
    pub async fn find_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SavedPaymentMethod>, DatabaseError> {
        sqlx::query_as::<_, SavedPaymentMethod>(
            "SELECT id, user_id, processor_customer_id, processor_method_token, method_type,
                    last4, created_at
             FROM saved_payment_methods
             WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl PaymentMethodStore for PaymentMethodRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SavedPaymentMethod>, DatabaseError> {
        sqlx::query_as::<_, SavedPaymentMethod>(
            "SELECT id, user_id, processor_customer_id, processor_method_token, method_type,
                    last4, created_at
             FROM saved_payment_methods
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_customer_id(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .find_by_user_id(user_id)
            .await?
            .into_iter()
            .map(|method| method.processor_customer_id)
            .find(|customer_id| !customer_id.is_empty()))
    }
}
