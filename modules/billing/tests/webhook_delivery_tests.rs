//! End-to-end tests of the webhook delivery attempt path: real HTTP, real
//! signing, against a local capture server.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use billing_rs::webhooks::{attempt_delivery, verify_signature, DeliveryOutcome};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(HeaderMap, String)>>>,
}

#[derive(Clone)]
struct HookState {
    captured: Captured,
    respond_with: u16,
    delay_ms: u64,
}

async fn hook(State(state): State<HookState>, headers: HeaderMap, body: String) -> StatusCode {
    if state.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(state.delay_ms)).await;
    }
    state.captured.requests.lock().unwrap().push((headers, body));
    StatusCode::from_u16(state.respond_with).unwrap()
}

async fn spawn_listener(respond_with: u16, delay_ms: u64) -> (String, Captured) {
    let captured = Captured::default();
    let state = HookState {
        captured: captured.clone(),
        respond_with,
        delay_ms,
    };

    let app = Router::new().route("/hook", post(hook)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), captured)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

fn sample_body() -> String {
    serde_json::json!({
        "event": "invoice.paid",
        "invoice": {
            "id": "7f6cf3f7-6e5f-4b46-9c35-08a3bb3c43e2",
            "invoice_number": "INV-2026-000042",
            "total_amount": "100.00",
            "status": "paid"
        },
        "customer": {
            "id": "c3a2d1a8-42a4-4b2e-8a3f-1b5f0c9b2e11",
            "name": "Acme Corp",
            "email": "billing@acme.test"
        },
        "timestamp": "2026-08-01T12:00:00Z"
    })
    .to_string()
}

// Scenario: subscription with a secret receives exactly one signed POST
// whose signature matches HMAC-SHA256(secret, body).
#[tokio::test]
async fn success_delivers_signed_payload() {
    let (url, captured) = spawn_listener(200, 0).await;
    let body = sample_body();

    let outcome = attempt_delivery(&client(), &url, "invoice.paid", Some("s3cr3t"), &body).await;
    assert_eq!(outcome, DeliveryOutcome::Delivered { status: 200 });

    let requests = captured.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);

    let (headers, received_body) = &requests[0];
    assert_eq!(received_body, &body, "body bytes must arrive unchanged");
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
    assert_eq!(
        headers.get("x-webhook-event").unwrap().to_str().unwrap(),
        "invoice.paid"
    );

    let signature = headers
        .get("x-webhook-signature")
        .expect("signature header present when a secret is configured")
        .to_str()
        .unwrap();
    assert!(verify_signature("s3cr3t", received_body.as_bytes(), signature));
    assert!(!verify_signature("wrong", received_body.as_bytes(), signature));
}

#[tokio::test]
async fn missing_secret_omits_signature_header() {
    let (url, captured) = spawn_listener(204, 0).await;
    let body = sample_body();

    let outcome = attempt_delivery(&client(), &url, "invoice.paid", None, &body).await;
    assert_eq!(outcome, DeliveryOutcome::Delivered { status: 204 });

    let requests = captured.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].0.get("x-webhook-signature").is_none());
    assert_eq!(
        requests[0].0.get("x-webhook-event").unwrap().to_str().unwrap(),
        "invoice.paid"
    );
}

// Scenario: endpoint returns HTTP 500; the attempt is a recorded failure,
// not an error raised to the caller.
#[tokio::test]
async fn server_error_is_a_failed_attempt() {
    let (url, _captured) = spawn_listener(500, 0).await;

    let outcome =
        attempt_delivery(&client(), &url, "invoice.paid", Some("s3cr3t"), &sample_body()).await;

    match outcome {
        DeliveryOutcome::Failed { status, error } => {
            assert_eq!(status, Some(500));
            assert!(error.contains("500"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_refused_is_a_failed_attempt() {
    // Nothing listens on the target; the connect error becomes a failure
    // with no HTTP status.
    let outcome = attempt_delivery(
        &client(),
        "http://127.0.0.1:1/hook",
        "invoice.paid",
        None,
        &sample_body(),
    )
    .await;

    match outcome {
        DeliveryOutcome::Failed { status, .. } => assert_eq!(status, None),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_endpoint_times_out_as_a_failed_attempt() {
    // Client timeout is 500ms; the endpoint stalls for 2s.
    let (url, _captured) = spawn_listener(200, 2_000).await;

    let outcome = attempt_delivery(&client(), &url, "invoice.paid", None, &sample_body()).await;

    match outcome {
        DeliveryOutcome::Failed { status, .. } => assert_eq!(status, None),
        other => panic!("expected timeout failure, got {other:?}"),
    }
}

#[tokio::test]
async fn redelivery_of_identical_body_signs_identically() {
    let (url, captured) = spawn_listener(200, 0).await;
    let body = sample_body();
    let client = client();

    for _ in 0..2 {
        let outcome =
            attempt_delivery(&client, &url, "refund.completed", Some("s3cr3t"), &body).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { status: 200 });
    }

    let requests = captured.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);

    let sig_a = requests[0].0.get("x-webhook-signature").unwrap();
    let sig_b = requests[1].0.get("x-webhook-signature").unwrap();
    assert_eq!(sig_a, sig_b, "same bytes, same secret, same signature");
}
