use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ============================================================================
// STATUS ENUMS
// ============================================================================

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
    Archived,
}

/// Payment lifecycle status. Only `completed` payments count toward an
/// invoice's paid total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

/// Refund lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "refund_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Whether a payment or refund covers its target in full or partially
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "settlement_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Full,
    Partial,
}

/// Webhook delivery outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Customer record (invoice owner)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Service provider (invoice issuer, webhook subscription owner)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceProvider {
    pub id: Uuid,
    pub name: String,
    pub contact_email: String,
    pub created_at: DateTime<Utc>,
}

/// One outbound webhook endpoint of a service provider.
///
/// `events` holds names from the closed event catalog; the list is
/// validated when the subscription is written, not when it is read.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub url: String,
    #[serde(skip_serializing, default)]
    pub secret: Option<String>,
    pub active: bool,
    pub events: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Invoice row. `total_amount` is generated by the database as
/// `amount + tax_amount` and is never written by application code.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
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
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment applied toward one invoice
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub payment_number: String,
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub payment_method: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_type: SettlementKind,
    pub gateway: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Monetary reversal against exactly one payment
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub refund_number: String,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub processed_by: Option<Uuid>,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub refund_type: SettlementKind,
    pub reason: Option<String>,
    pub gateway: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One delivery of one event to one subscription.
///
/// `payload` holds the exact serialized body bytes; retries sign and send
/// these bytes unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub provider_id: Uuid,
    pub event_type: String,
    pub url: String,
    #[serde(skip_serializing, default)]
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub response_status: Option<i32>,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// REQUEST / RESPONSE BODIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateCustomerRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    pub contact_email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookSubscriptionRequest {
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub issue_date: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub gateway: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletePaymentRequest {
    pub gateway_transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FailPaymentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: Option<String>,
    /// Actor recording the refund; supplied by the caller, the service
    /// performs no authorization of its own.
    pub processed_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRefundRequest {
    pub gateway_refund_id: Option<String>,
}

/// Ledger totals as returned alongside an invoice
#[derive(Debug, Clone, Serialize)]
pub struct LedgerView {
    pub total_paid: Decimal,
    pub total_refunded: Decimal,
    pub net_paid: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Serialize)]
pub struct InvoiceWithLedger {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub ledger: LedgerView,
}

#[derive(Debug, Deserialize)]
pub struct ListDeliveriesQuery {
    pub provider_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Standard error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
