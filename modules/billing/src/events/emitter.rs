//! Domain event emission.
//!
//! Every successful reconciliation transition (plus invoice creation and
//! cancellation) produces one immutable [`DomainEvent`]. Emission happens
//! inside the transaction that applied the transition: the event is wrapped
//! in the platform envelope and written to the outbox, nothing else. The
//! background publisher and the webhook dispatcher take it from there, so
//! the emitting request never blocks on the network.

use chrono::{DateTime, NaiveDate, Utc};
use event_bus::EventEnvelope;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::events::outbox;
use crate::models::{Customer, Invoice, InvoiceStatus, Payment, PaymentStatus, SettlementKind};

/// Closed catalog of domain events observable by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    InvoiceCreated,
    InvoicePaid,
    InvoiceOverdue,
    InvoiceCancelled,
    PaymentCompleted,
    PaymentFailed,
    RefundCompleted,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::InvoiceCreated,
        EventKind::InvoicePaid,
        EventKind::InvoiceOverdue,
        EventKind::InvoiceCancelled,
        EventKind::PaymentCompleted,
        EventKind::PaymentFailed,
        EventKind::RefundCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InvoiceCreated => "invoice.created",
            EventKind::InvoicePaid => "invoice.paid",
            EventKind::InvoiceOverdue => "invoice.overdue",
            EventKind::InvoiceCancelled => "invoice.cancelled",
            EventKind::PaymentCompleted => "payment.completed",
            EventKind::PaymentFailed => "payment.failed",
            EventKind::RefundCompleted => "refund.completed",
        }
    }

    pub fn from_name(name: &str) -> Option<EventKind> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    fn aggregate_type(&self) -> &'static str {
        match self {
            EventKind::InvoiceCreated
            | EventKind::InvoicePaid
            | EventKind::InvoiceOverdue
            | EventKind::InvoiceCancelled => "invoice",
            EventKind::PaymentCompleted | EventKind::PaymentFailed => "payment",
            EventKind::RefundCompleted => "refund",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice state as captured at emission time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_date: Option<DateTime<Utc>>,
}

impl From<&Invoice> for InvoiceSnapshot {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            customer_id: invoice.customer_id,
            provider_id: invoice.provider_id,
            amount: invoice.amount,
            tax_amount: invoice.tax_amount,
            total_amount: invoice.total_amount,
            status: invoice.status,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            paid_date: invoice.paid_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub id: Uuid,
    pub payment_number: String,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_type: SettlementKind,
    pub gateway: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentSnapshot {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            payment_number: payment.payment_number.clone(),
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            status: payment.status,
            payment_type: payment.payment_type,
            gateway: payment.gateway.clone(),
            gateway_transaction_id: payment.gateway_transaction_id.clone(),
            processed_at: payment.processed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&Customer> for CustomerSnapshot {
    fn from(customer: &Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name.clone(),
            email: customer.email.clone(),
        }
    }
}

/// Immutable record of one state transition. Serialized as-is, this is the
/// body subscribers receive on their webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event: String,
    pub invoice: InvoiceSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentSnapshot>,
    pub customer: CustomerSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        kind: EventKind,
        invoice: &Invoice,
        payment: Option<&Payment>,
        customer: &Customer,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: kind.as_str().to_string(),
            invoice: invoice.into(),
            payment: payment.map(PaymentSnapshot::from),
            customer: customer.into(),
            timestamp: occurred_at,
        }
    }
}

/// Build the event, wrap it in the platform envelope and enqueue it to the
/// outbox within the caller's transaction. Returns the event id.
pub async fn emit(
    conn: &mut PgConnection,
    kind: EventKind,
    invoice: &Invoice,
    payment: Option<&Payment>,
    customer: &Customer,
    occurred_at: DateTime<Utc>,
) -> Result<Uuid, sqlx::Error> {
    let event = DomainEvent::new(kind, invoice, payment, customer, occurred_at);

    let mut envelope = EventEnvelope::new("billing".to_string(), event)
        .with_source_version(env!("CARGO_PKG_VERSION").to_string());
    envelope.occurred_at = occurred_at;

    let aggregate_id = match kind.aggregate_type() {
        "payment" | "refund" => payment.map(|p| p.id).unwrap_or(invoice.id),
        _ => invoice.id,
    };

    outbox::enqueue_event(
        conn,
        kind.as_str(),
        kind.aggregate_type(),
        &aggregate_id.to_string(),
        &envelope,
    )
    .await?;

    Ok(envelope.event_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::Value;

    fn sample_invoice() -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            invoice_number: "INV-2026-000001".to_string(),
            customer_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            amount: dec!(90.00),
            tax_amount: dec!(10.00),
            total_amount: dec!(100.00),
            status: InvoiceStatus::Paid,
            issue_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            paid_date: Some(Utc::now()),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_customer(id: Uuid) -> Customer {
        Customer {
            id,
            name: "Acme Corp".to_string(),
            email: "billing@acme.test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn catalog_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("invoice.deleted"), None);
    }

    #[test]
    fn event_body_has_wire_shape() {
        let invoice = sample_invoice();
        let customer = sample_customer(invoice.customer_id);
        let event = DomainEvent::new(
            EventKind::InvoicePaid,
            &invoice,
            None,
            &customer,
            Utc::now(),
        );

        let body: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(body["event"], "invoice.paid");
        assert_eq!(body["invoice"]["invoice_number"], "INV-2026-000001");
        assert_eq!(body["invoice"]["status"], "paid");
        assert_eq!(body["customer"]["name"], "Acme Corp");
        assert!(body["timestamp"].is_string());
        // No payment snapshot for invoice-level events without one
        assert!(body.get("payment").is_none());
    }
}
