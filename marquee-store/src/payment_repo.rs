use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use marquee_core::error::{CoreError, CoreResult};
use marquee_core::payment::{
    CreateIntentRequest, PaymentMethod, PaymentRecord, PaymentStatus, WebhookUpdate,
};
use marquee_core::repository::PaymentRepository;

use crate::{db_err, is_unique_violation};

const PAYMENT_COLS: &str = "id, booking_id, amount_minor, currency, method, status, \
     transaction_id, failed_reason, processed_at, created_at";

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    amount_minor: i64,
    currency: String,
    method: String,
    status: String,
    transaction_id: Option<String>,
    failed_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_record(self) -> CoreResult<PaymentRecord> {
        let method = PaymentMethod::parse(&self.method)
            .ok_or_else(|| CoreError::internal(format!("unknown payment method: {}", self.method)))?;
        let status = PaymentStatus::parse(&self.status)
            .ok_or_else(|| CoreError::internal(format!("unknown payment status: {}", self.status)))?;
        Ok(PaymentRecord {
            id: self.id,
            booking_id: self.booking_id,
            amount_minor: self.amount_minor,
            currency: self.currency,
            method,
            status,
            transaction_id: self.transaction_id,
            failed_reason: self.failed_reason,
            processed_at: self.processed_at,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn create_intent(&self, req: CreateIntentRequest) -> CoreResult<PaymentRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let booking: Option<(String, String, i64, String)> = sqlx::query_as(
            "SELECT status, payment_status, total_minor, currency FROM bookings \
             WHERE id = $1 FOR UPDATE",
        )
        .bind(req.booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let (status, payment_status, total_minor, currency) =
            booking.ok_or_else(|| CoreError::not_found("Booking not found"))?;

        if status != "PENDING" && status != "AWAITING_PAYMENT" {
            return Err(CoreError::conflict(format!(
                "Booking is {status} and cannot accept payment"
            )));
        }
        if payment_status == "PAID" {
            return Err(CoreError::conflict("Booking already paid"));
        }

        let amount_minor = req.amount_minor.unwrap_or(total_minor);
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            booking_id: req.booking_id,
            amount_minor,
            currency,
            method: req.method,
            status: PaymentStatus::Pending,
            transaction_id: req.transaction_id.clone(),
            failed_reason: None,
            processed_at: None,
            created_at: now,
        };

        let inserted = sqlx::query(
            "INSERT INTO payments (id, booking_id, amount_minor, currency, method, status, \
                 transaction_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $7, $7)",
        )
        .bind(record.id)
        .bind(record.booking_id)
        .bind(record.amount_minor)
        .bind(&record.currency)
        .bind(record.method.as_str())
        .bind(&record.transaction_id)
        .bind(now)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(CoreError::conflict("transaction_id already used"));
            }
            return Err(db_err(e));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(PaymentRow::into_record).transpose()
    }

    async fn record_webhook(&self, update: WebhookUpdate) -> CoreResult<PaymentRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Locate by gateway reference first, then fall back to the latest
        // payment attempt for the booking.
        let row = if let Some(txn) = &update.transaction_id {
            let by_txn = sqlx::query_as::<_, PaymentRow>(&format!(
                "SELECT {PAYMENT_COLS} FROM payments WHERE transaction_id = $1 FOR UPDATE"
            ))
            .bind(txn)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            match (by_txn, update.booking_id) {
                (Some(row), _) => Some(row),
                (None, Some(booking_id)) => latest_for_booking(&mut tx, booking_id).await?,
                (None, None) => None,
            }
        } else if let Some(booking_id) = update.booking_id {
            latest_for_booking(&mut tx, booking_id).await?
        } else {
            return Err(CoreError::validation(
                "transaction_id or booking_id is required",
            ));
        };
        let row = row.ok_or_else(|| CoreError::not_found("Payment not found"))?;

        let processed_at = if update.status.is_settled() {
            Some(update.processed_at.unwrap_or(now))
        } else {
            row.processed_at
        };
        // The gateway may assign the transaction id at settlement time.
        let transaction_id = row
            .transaction_id
            .clone()
            .or_else(|| update.transaction_id.clone());

        sqlx::query(
            "UPDATE payments SET status = $2, failed_reason = $3, processed_at = $4, \
                 transaction_id = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(update.status.as_str())
        .bind(&update.failed_reason)
        .bind(processed_at)
        .bind(&transaction_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        let mut record = row.into_record()?;
        record.status = update.status;
        record.failed_reason = update.failed_reason;
        record.processed_at = processed_at;
        record.transaction_id = transaction_id;
        Ok(record)
    }
}

async fn latest_for_booking(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    booking_id: Uuid,
) -> CoreResult<Option<PaymentRow>> {
    sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {PAYMENT_COLS} FROM payments WHERE booking_id = $1 \
         ORDER BY created_at DESC LIMIT 1 FOR UPDATE"
    ))
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)
}
