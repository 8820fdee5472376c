//! Contract tests for the event pipeline: a domain event wrapped in the
//! platform envelope must survive the trip across the bus and carry
//! everything the webhook dispatcher needs to fan it out.

use billing_rs::events::{CustomerSnapshot, DomainEvent, EventKind, InvoiceSnapshot};
use billing_rs::models::WebhookSubscription;
use billing_rs::webhooks::matching_subscriptions;
use chrono::{NaiveDate, Utc};
use event_bus::{EventBus, EventEnvelope, InMemoryBus};
use futures::StreamExt;
use rust_decimal_macros::dec;
use std::time::Duration;
use uuid::Uuid;

fn sample_event(provider_id: Uuid) -> DomainEvent {
    DomainEvent {
        event: EventKind::InvoicePaid.as_str().to_string(),
        invoice: InvoiceSnapshot {
            id: Uuid::new_v4(),
            invoice_number: "INV-2026-000007".to_string(),
            customer_id: Uuid::new_v4(),
            provider_id,
            amount: dec!(90.00),
            tax_amount: dec!(10.00),
            total_amount: dec!(100.00),
            status: billing_rs::models::InvoiceStatus::Paid,
            issue_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            paid_date: Some(Utc::now()),
        },
        payment: None,
        customer: CustomerSnapshot {
            id: Uuid::new_v4(),
            name: "Acme Corp".to_string(),
            email: "billing@acme.test".to_string(),
        },
        timestamp: Utc::now(),
    }
}

fn subscription(provider_id: Uuid, active: bool, events: Vec<&str>) -> WebhookSubscription {
    WebhookSubscription {
        id: Uuid::new_v4(),
        provider_id,
        url: "https://hooks.example.test/billing".to_string(),
        secret: Some("s3cr3t".to_string()),
        active,
        events: events.into_iter().map(String::from).collect(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn envelope_round_trips_across_the_bus() {
    let bus = InMemoryBus::new();
    let mut stream = bus.subscribe("billing.events.>").await.unwrap();

    let provider_id = Uuid::new_v4();
    let event = sample_event(provider_id);

    let envelope = EventEnvelope::new("billing".to_string(), event.clone())
        .with_source_version(env!("CARGO_PKG_VERSION").to_string());
    let event_id = envelope.event_id;

    let subject = format!("billing.events.{}", event.event);
    let payload = serde_json::to_vec(&envelope).unwrap();
    bus.publish(&subject, payload).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timeout")
        .expect("stream ended");

    assert_eq!(msg.subject, "billing.events.invoice.paid");

    // The dispatcher's view: envelope metadata plus a parseable payload.
    let received: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(
        received.get("event_id").and_then(|v| v.as_str()),
        Some(event_id.to_string().as_str())
    );
    assert_eq!(
        received.get("source_module").and_then(|v| v.as_str()),
        Some("billing")
    );

    let parsed: DomainEvent =
        serde_json::from_value(received.get("payload").unwrap().clone()).unwrap();
    assert_eq!(parsed.event, "invoice.paid");
    assert_eq!(parsed.invoice.provider_id, provider_id);
    assert_eq!(parsed.invoice.total_amount, dec!(100.00));
}

#[tokio::test]
async fn parsed_event_drives_subscription_matching() {
    let provider_id = Uuid::new_v4();
    let event = sample_event(provider_id);

    let subs = vec![
        subscription(provider_id, true, vec!["invoice.paid", "invoice.overdue"]),
        subscription(provider_id, true, vec!["payment.failed"]),
        subscription(provider_id, false, vec!["invoice.paid"]),
    ];

    let matched = matching_subscriptions(&subs, &event.event);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, subs[0].id);
}

#[test]
fn catalog_is_closed_and_stable() {
    let names: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "invoice.created",
            "invoice.paid",
            "invoice.overdue",
            "invoice.cancelled",
            "payment.completed",
            "payment.failed",
            "refund.completed",
        ]
    );
}

#[test]
fn webhook_body_shape_matches_the_wire_contract() {
    let event = sample_event(Uuid::new_v4());
    let body: serde_json::Value = serde_json::to_value(&event).unwrap();

    assert!(body.get("event").is_some(), "Missing event");
    assert!(body.get("invoice").is_some(), "Missing invoice");
    assert!(body.get("customer").is_some(), "Missing customer");
    assert!(body.get("timestamp").is_some(), "Missing timestamp");
    assert!(
        body.get("payment").is_none(),
        "payment must be omitted when absent"
    );

    let invoice = body.get("invoice").unwrap();
    assert!(invoice.get("invoice_number").is_some(), "Missing invoice_number");
    assert!(invoice.get("total_amount").is_some(), "Missing total_amount");
    assert!(invoice.get("status").is_some(), "Missing status");
}
