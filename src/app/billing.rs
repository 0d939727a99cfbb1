use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::invalid;
use crate::auth::Caller;
use crate::config::BillingConfig;
use crate::domain::billing::{price_pickup, to_cents};
use crate::domain::{Invoice, InvoiceStatus, Payment, PaymentMethod, RequestStatus};
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::storage::{InMemoryStorage, Tables};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvoiceInput {
    pub customer_id: Uuid,
    pub total_amount: Decimal,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct MarkPaidInput {
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub payment_reference: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateInput {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "pickup_ids must contain at least one id."))]
    pub pickup_ids: Vec<Uuid>,
}

fn can_view_invoice(caller: &Caller, invoice: &Invoice) -> bool {
    caller.is_elevated() || invoice.customer == caller.id()
}

/// Pickups already billed on an invoice that still stands.
fn is_billed(t: &Tables, pickup: Uuid) -> bool {
    t.invoices
        .values()
        .any(|i| i.status != InvoiceStatus::Cancelled && i.pickups.contains(&pickup))
}

pub struct BillingService<'a> {
    storage: &'a InMemoryStorage,
    config: &'a BillingConfig,
}

impl<'a> BillingService<'a> {
    pub fn new(storage: &'a InMemoryStorage, config: &'a BillingConfig) -> Self {
        Self { storage, config }
    }

    fn default_due_date(&self) -> NaiveDate {
        (Utc::now() + Duration::days(self.config.due_days)).date_naive()
    }

    pub fn list_invoices(&self, caller: &Caller) -> Vec<Invoice> {
        let mut invoices: Vec<Invoice> = self.storage.read(|t| {
            t.invoices
                .values()
                .filter(|i| can_view_invoice(caller, i))
                .cloned()
                .collect()
        });
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        invoices
    }

    pub fn get_invoice(&self, caller: &Caller, id: Uuid) -> Result<Invoice> {
        self.storage
            .read(|t| t.invoices.get(&id).cloned())
            .filter(|i| can_view_invoice(caller, i))
            .ok_or_else(|| ApiError::not_found("Invoice"))
    }

    pub fn create_invoice(&self, caller: &Caller, input: InvoiceInput) -> Result<Invoice> {
        caller.require_elevated()?;
        input.validate()?;
        if input.total_amount.is_sign_negative() {
            return Err(ApiError::bad_request("total_amount may not be negative"));
        }
        let invoice = Invoice {
            id: Uuid::new_v4(),
            customer: input.customer_id,
            total_amount: to_cents(input.total_amount),
            description: input.description.trim().to_string(),
            status: InvoiceStatus::Pending,
            pickups: Vec::new(),
            created_at: Utc::now(),
            due_date: Some(input.due_date.unwrap_or_else(|| self.default_due_date())),
            paid_date: None,
        };
        self.storage.write(|t| {
            if !t.users.contains_key(&invoice.customer) {
                return Err(ApiError::not_found("Customer"));
            }
            t.invoices.insert(invoice.id, invoice.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(invoice_id = %invoice.id, amount = %invoice.total_amount, "Created invoice");
        Ok(invoice)
    }

    /// Settle an invoice in full: exactly one payment for the invoice total
    /// is recorded and the invoice flips to `PAID`. Paying twice fails.
    /// Staff record payments; customers only read them.
    pub fn mark_paid(&self, caller: &Caller, id: Uuid, input: MarkPaidInput) -> Result<(Invoice, Payment)> {
        caller.require_elevated()?;
        input.validate()?;
        let now = Utc::now();
        let (invoice, payment) = self.storage.write(|t| {
            let invoice = t.invoices.get(&id).ok_or_else(|| ApiError::not_found("Invoice"))?;
            invoice.is_payable().map_err(invalid)?;

            let payment = Payment {
                id: Uuid::new_v4(),
                invoice: id,
                amount: invoice.total_amount,
                payment_method: input.payment_method,
                payment_reference: input.payment_reference.trim().to_string(),
                payment_date: now,
                created_at: now,
            };
            let invoice = t.invoices.get_mut(&id).ok_or_else(|| ApiError::not_found("Invoice"))?;
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_date = Some(now);
            let invoice = invoice.clone();
            t.payments.insert(payment.id, payment.clone());
            Ok::<_, ApiError>((invoice, payment))
        })?;

        metrics::invoice_paid();
        info!(invoice_id = %id, payment_id = %payment.id, "Invoice paid");
        Ok((invoice, payment))
    }

    /// Bill completed pickups of one customer. Pickups that are not the
    /// customer's, not completed, or already billed are left out; nothing
    /// billable is a 400.
    pub fn generate_from_pickups(&self, caller: &Caller, input: GenerateInput) -> Result<Invoice> {
        caller.require_elevated()?;
        input.validate()?;
        let now = Utc::now();
        let due_date = self.default_due_date();

        let invoice = self.storage.write(|t| {
            if !t.users.contains_key(&input.customer_id) {
                return Err(ApiError::not_found("Customer"));
            }
            let mut billed = Vec::new();
            let mut total = Decimal::ZERO;
            for id in &input.pickup_ids {
                let Some(pickup) = t.pickups.get(id) else {
                    continue;
                };
                let billable = pickup.requester == input.customer_id
                    && pickup.status == RequestStatus::Completed
                    && !is_billed(t, pickup.id)
                    && !billed.contains(id);
                if billable {
                    total = price_pickup(pickup.estimated_weight_kg, self.config.base_fee, self.config.per_kg_fee)
                        .and_then(|price| total.checked_add(price))
                        .ok_or_else(|| ApiError::bad_request("Invoice total is out of range."))?;
                    billed.push(*id);
                }
            }
            if billed.is_empty() {
                return Err(ApiError::bad_request("No completed, unbilled pickups for this customer."));
            }

            let invoice = Invoice {
                id: Uuid::new_v4(),
                customer: input.customer_id,
                total_amount: total,
                description: format!("Waste collection services ({} pickups)", billed.len()),
                status: InvoiceStatus::Pending,
                pickups: billed,
                created_at: now,
                due_date: Some(due_date),
                paid_date: None,
            };
            t.invoices.insert(invoice.id, invoice.clone());
            Ok::<_, ApiError>(invoice)
        })?;

        info!(
            invoice_id = %invoice.id,
            pickups = invoice.pickups.len(),
            amount = %invoice.total_amount,
            "Generated invoice from pickups"
        );
        Ok(invoice)
    }

    pub fn list_payments(&self, caller: &Caller) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self.storage.read(|t| {
            t.payments
                .values()
                .filter(|p| {
                    t.invoices
                        .get(&p.invoice)
                        .map_or(caller.is_elevated(), |i| can_view_invoice(caller, i))
                })
                .cloned()
                .collect()
        });
        payments.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        payments
    }

    pub fn get_payment(&self, caller: &Caller, id: Uuid) -> Result<Payment> {
        self.storage.read(|t| {
            t.payments
                .get(&id)
                .filter(|p| {
                    t.invoices
                        .get(&p.invoice)
                        .map_or(caller.is_elevated(), |i| can_view_invoice(caller, i))
                })
                .cloned()
                .ok_or_else(|| ApiError::not_found("Payment"))
        })
    }
}
