//! Payment model
//!
//! Records of processor captures against a reservation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Capture attempt recorded
    #[default]
    Created,
    /// Processor approved the authorization
    Approved,
    /// Funds captured
    Completed,
    /// Processor rejected the capture
    Failed,
    /// Captured funds returned to the client
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Created => write!(f, "created"),
            PaymentStatus::Approved => write!(f, "approved"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl PaymentStatus {
    /// Parse from string (processor payloads use mixed case)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(PaymentStatus::Created),
            "approved" => Some(PaymentStatus::Approved),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Check if `next` is a legal one-way move from this status
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        matches!(
            (*self, next),
            (Created, Approved)
                | (Created, Completed)
                | (Approved, Completed)
                | (Created, Failed)
                | (Approved, Failed)
                | (Completed, Refunded)
        )
    }

    /// Check if no further transition is possible
    pub fn is_final(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }
}

/// What a refund does to the reservation it settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    /// Leave the reservation as it is; follow-up is manual
    #[default]
    KeepReservation,
    /// Force-cancel the reservation
    CancelReservation,
}

/// Payment entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier (UUID)
    pub id: Uuid,

    /// Owning reservation
    pub reservation_id: Uuid,

    /// Processor transaction identifier (unique)
    pub transaction_id: String,

    /// Captured amount
    pub amount: Decimal,

    /// ISO 4217 currency code
    pub currency: String,

    /// Current status
    pub status: PaymentStatus,

    /// Raw processor response
    pub payload: serde_json::Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Build a payment from a capture
    pub fn from_capture(capture: &PaymentCapture, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id: capture.reservation_id,
            transaction_id: capture.transaction_id.clone(),
            amount: capture.amount,
            currency: capture.currency.to_uppercase(),
            status: capture.processor_status,
            payload: capture.payload.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if this payment settles its reservation
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Capture reported by the payment processor
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentCapture {
    pub reservation_id: Uuid,

    #[validate(length(min = 1, max = 255, message = "Transaction id is required"))]
    pub transaction_id: String,

    pub amount: Decimal,

    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,

    pub processor_status: PaymentStatus,

    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Manual correction of a recorded payment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentChanges {
    pub status: Option<PaymentStatus>,
    pub payload: Option<serde_json::Value>,
}
