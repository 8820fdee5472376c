//! Webhook subscription validation and matching.
//!
//! Subscriptions carry an explicit schema (url, secret, active flag, event
//! list) and are validated when written, so the dispatcher can trust every
//! row it reads.

use crate::error::BillingError;
use crate::events::EventKind;
use crate::models::{CreateWebhookSubscriptionRequest, WebhookSubscription};

/// Validate a subscription before it is persisted.
pub fn validate_subscription(req: &CreateWebhookSubscriptionRequest) -> Result<(), BillingError> {
    let url = reqwest::Url::parse(&req.url)
        .map_err(|e| BillingError::validation(format!("invalid webhook url: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(BillingError::validation(
            "webhook url must use http or https",
        ));
    }

    if req.events.is_empty() {
        return Err(BillingError::validation(
            "subscription must list at least one event",
        ));
    }

    for name in &req.events {
        if EventKind::from_name(name).is_none() {
            return Err(BillingError::validation(format!(
                "unknown event name: {name}"
            )));
        }
    }

    if let Some(secret) = &req.secret {
        if secret.is_empty() {
            return Err(BillingError::validation(
                "webhook secret must not be empty when provided",
            ));
        }
    }

    Ok(())
}

/// Active subscriptions whose event list contains the given event name.
pub fn matching_subscriptions<'a>(
    subscriptions: &'a [WebhookSubscription],
    event_type: &str,
) -> Vec<&'a WebhookSubscription> {
    subscriptions
        .iter()
        .filter(|s| s.active && s.events.iter().any(|e| e == event_type))
        .collect()
}
