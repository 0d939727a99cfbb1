use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Amounts are kept to the cent: rounded half away from zero and always
/// carried with two decimal places so they serialize as `"12.50"`.
pub fn to_cents(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    BankTransfer,
    MobileMoney,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub customer: Uuid,
    pub total_amount: Decimal,
    pub description: String,
    pub status: InvoiceStatus,
    /// Pickups billed by this invoice, when generated from pickups.
    pub pickups: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn is_payable(&self) -> Result<(), String> {
        match self.status {
            InvoiceStatus::Pending | InvoiceStatus::Overdue => Ok(()),
            InvoiceStatus::Paid => Err("invoice is already paid".to_string()),
            InvoiceStatus::Cancelled => Err("invoice is cancelled".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_reference: String,
    pub payment_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Price of one pickup: a flat base fee plus a per-kilogram fee on the
/// estimated weight. `None` when the amount does not fit a `Decimal`.
pub fn price_pickup(weight_kg: Option<f64>, base_fee: Decimal, per_kg: Decimal) -> Option<Decimal> {
    let weight = Decimal::try_from(weight_kg.unwrap_or(0.0).max(0.0)).ok()?;
    let total = per_kg.checked_mul(weight)?.checked_add(base_fee)?;
    Some(to_cents(total))
}
