use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an individual payment row. `transaction_id` is the idempotency
/// key: the gateway may deliver the same webhook several times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "PROCESSING" => Some(PaymentStatus::Processing),
            "PAID" => Some(PaymentStatus::Paid),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Cash,
    BankTransfer,
    Vnpay,
    Momo,
    Stripe,
    Paypal,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Cash => "CASH",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Vnpay => "VNPAY",
            PaymentMethod::Momo => "MOMO",
            PaymentMethod::Stripe => "STRIPE",
            PaymentMethod::Paypal => "PAYPAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CARD" => Some(PaymentMethod::Card),
            "CASH" => Some(PaymentMethod::Cash),
            "BANK_TRANSFER" => Some(PaymentMethod::BankTransfer),
            "VNPAY" => Some(PaymentMethod::Vnpay),
            "MOMO" => Some(PaymentMethod::Momo),
            "STRIPE" => Some(PaymentMethod::Stripe),
            "PAYPAL" => Some(PaymentMethod::Paypal),
            _ => None,
        }
    }
}

/// A single payment attempt against a booking. Amounts are in minor
/// currency units; compensating refunds carry a negative amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub failed_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateIntentRequest {
    pub booking_id: Uuid,
    pub method: PaymentMethod,
    pub amount_minor: Option<i64>,
    pub transaction_id: Option<String>,
}

/// Payload consumed from the payment gateway. Either `transaction_id` or
/// `booking_id` must be present to locate the payment row.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookUpdate {
    pub transaction_id: Option<String>,
    pub booking_id: Option<Uuid>,
    pub status: PaymentStatus,
    pub failed_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}
