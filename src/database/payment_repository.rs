use crate::database::error::DatabaseError;
use crate::database::repository::{
    CompletionDetails, InsertOutcome, PaymentStore, TransitionOutcome,
};
use crate::payments::types::{BillingPeriod, PaymentMethodType, PaymentStatus, PaymentType};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, tenant_id, property_id, amount, payment_type, payment_method, \
     status, period_start, period_end, due_date, processor_intent_id, processor_charge_id, \
     processor_fee_amount, is_autopay, recorded_by, payment_date, notes, created_at, updated_at";

/// Appends `$3` to the notes trail, newline separated.
const APPEND_NOTE: &str =
    "CASE WHEN notes IS NULL OR notes = '' THEN $3 ELSE notes || E'\\n' || $3 END";

/// Ledger row for one rent (or fee) obligation.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub property_id: Uuid,
    pub amount: BigDecimal,
    pub payment_type: PaymentType,
    pub payment_method: PaymentMethodType,
    pub status: PaymentStatus,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub processor_intent_id: Option<String>,
    pub processor_charge_id: Option<String>,
    pub processor_fee_amount: Option<BigDecimal>,
    pub is_autopay: bool,
    pub recorded_by: Option<Uuid>,
    pub payment_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn period(&self) -> Option<BillingPeriod> {
        match (self.period_start, self.period_end) {
            (Some(start), Some(end)) => Some(BillingPeriod { start, end }),
            _ => None,
        }
    }

    /// Whether a processor refund can be addressed to this row.
    pub fn has_processor_linkage(&self) -> bool {
        self.payment_method.is_processor_owned()
            && (self.processor_intent_id.is_some() || self.processor_charge_id.is_some())
    }
}

/// Fields supplied when a ledger row is created.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tenant_id: Uuid,
    pub property_id: Uuid,
    pub amount: BigDecimal,
    pub payment_type: PaymentType,
    pub payment_method: PaymentMethodType,
    pub status: PaymentStatus,
    pub period: Option<BillingPeriod>,
    pub due_date: NaiveDate,
    pub is_autopay: bool,
    pub recorded_by: Option<Uuid>,
    pub payment_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    tenant_id: Uuid,
    property_id: Uuid,
    amount: BigDecimal,
    payment_type: String,
    payment_method: String,
    status: String,
    period_start: Option<NaiveDate>,
    period_end: Option<NaiveDate>,
    due_date: NaiveDate,
    processor_intent_id: Option<String>,
    processor_charge_id: Option<String>,
    processor_fee_amount: Option<BigDecimal>,
    is_autopay: bool,
    recorded_by: Option<Uuid>,
    payment_date: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let corrupt = |e: crate::payments::error::PaymentError| {
            DatabaseError::unknown(format!("payment {}: {}", row.id, e))
        };
        Ok(Payment {
            payment_type: PaymentType::from_str(&row.payment_type).map_err(corrupt)?,
            payment_method: PaymentMethodType::from_str(&row.payment_method).map_err(corrupt)?,
            status: PaymentStatus::from_str(&row.status).map_err(corrupt)?,
            id: row.id,
            tenant_id: row.tenant_id,
            property_id: row.property_id,
            amount: row.amount,
            period_start: row.period_start,
            period_end: row.period_end,
            due_date: row.due_date,
            processor_intent_id: row.processor_intent_id,
            processor_charge_id: row.processor_charge_id,
            processor_fee_amount: row.processor_fee_amount,
            is_autopay: row.is_autopay,
            recorded_by: row.recorded_by,
            payment_date: row.payment_date,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_strings(statuses: &[PaymentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Postgres-backed payment ledger
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE {} = $1", PAYMENT_COLUMNS, predicate);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    /// Resolves a conditional UPDATE: when nothing matched, tells apart a
    /// missing row from one in a disallowed state.
    async fn finish_transition(
        &self,
        id: Uuid,
        updated: Option<(PaymentRow, String)>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        match updated {
            Some((row, previous)) => {
                let previous = PaymentStatus::from_str(&previous)
                    .map_err(|e| DatabaseError::unknown(e.to_string()))?;
                Ok(TransitionOutcome::Applied {
                    payment: Payment::try_from(row)?,
                    previous,
                })
            }
            None => match self.find_by_id(id).await? {
                Some(payment) => Ok(TransitionOutcome::Rejected { payment }),
                None => Ok(TransitionOutcome::NotFound),
            },
        }
    }

    /// Locks the row if its status is an allowed source for `target`, then
    /// applies `assignments`. Parameters `$1` and `$2` are the id and target
    /// status; `binds` follow from `$3`.
    async fn transition(
        &self,
        id: Uuid,
        target: PaymentStatus,
        assignments: &str,
        binds: Vec<Bind>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let sources = status_strings(&PaymentStatus::allowed_sources(target));
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let previous: Option<String> = sqlx::query_scalar(
            "SELECT status FROM payments WHERE id = $1 AND status = ANY($2) FOR UPDATE",
        )
        .bind(id)
        .bind(&sources)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(previous) = previous else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return self.finish_transition(id, None).await;
        };

        let sql = format!(
            "UPDATE payments SET {}, status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            assignments, PAYMENT_COLUMNS
        );
        let mut query = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .bind(target.as_str());
        for value in binds {
            query = match value {
                Bind::Text(text) => query.bind(text),
                Bind::Decimal(decimal) => query.bind(decimal),
                Bind::Timestamp(at) => query.bind(at),
            };
        }
        let row = query
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        self.finish_transition(id, Some((row, previous))).await
    }
}

enum Bind {
    Text(Option<String>),
    Decimal(Option<BigDecimal>),
    Timestamp(DateTime<Utc>),
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn insert(&self, payment: NewPayment) -> Result<InsertOutcome, DatabaseError> {
        let sql = format!(
            "INSERT INTO payments (tenant_id, property_id, amount, payment_type, payment_method, \
                 status, period_start, period_end, due_date, is_autopay, recorded_by, payment_date, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (tenant_id, period_start, period_end) \
                 WHERE status IN ('pending', 'processing', 'completed') \
             DO NOTHING \
             RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.tenant_id)
            .bind(payment.property_id)
            .bind(&payment.amount)
            .bind(payment.payment_type.as_str())
            .bind(payment.payment_method.as_str())
            .bind(payment.status.as_str())
            .bind(payment.period.map(|p| p.start))
            .bind(payment.period.map(|p| p.end))
            .bind(payment.due_date)
            .bind(payment.is_autopay)
            .bind(payment.recorded_by)
            .bind(payment.payment_date)
            .bind(&payment.notes)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(Payment::try_from(row)?)),
            None => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DatabaseError> {
        self.fetch_one_where("processor_intent_id", intent_id).await
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> Result<Option<Payment>, DatabaseError> {
        self.fetch_one_where("processor_charge_id", charge_id).await
    }

    async fn find_active_for_period(
        &self,
        tenant_id: Uuid,
        period: &BillingPeriod,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE tenant_id = $1 AND period_start = $2 AND period_end = $3 AND status = ANY($4) \
             LIMIT 1",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant_id)
            .bind(period.start)
            .bind(period.end)
            .bind(status_strings(&PaymentStatus::active()))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        intent_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.transition(
            id,
            PaymentStatus::Processing,
            "processor_intent_id = COALESCE(processor_intent_id, $3)",
            vec![Bind::Text(Some(intent_id.to_string()))],
        )
        .await
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        details: CompletionDetails,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.transition(
            id,
            PaymentStatus::Completed,
            "processor_intent_id = COALESCE(processor_intent_id, $3), \
             processor_charge_id = COALESCE($4, processor_charge_id), \
             processor_fee_amount = COALESCE($5, processor_fee_amount), \
             payment_date = $6",
            vec![
                Bind::Text(details.intent_id),
                Bind::Text(details.charge_id),
                Bind::Decimal(details.fee_amount),
                Bind::Timestamp(details.paid_at),
            ],
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        intent_id: Option<&str>,
        note: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let assignments = format!(
            "notes = {}, processor_intent_id = COALESCE(processor_intent_id, $4)",
            APPEND_NOTE
        );
        self.transition(
            id,
            PaymentStatus::Failed,
            &assignments,
            vec![
                Bind::Text(Some(note.to_string())),
                Bind::Text(intent_id.map(str::to_string)),
            ],
        )
        .await
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        note: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.transition(
            id,
            PaymentStatus::Refunded,
            &format!("notes = {}", APPEND_NOTE),
            vec![Bind::Text(Some(note.to_string()))],
        )
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}
