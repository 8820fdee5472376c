pub mod delivery;
pub mod dispatcher;
pub mod signature;
pub mod subscription;

pub use delivery::{attempt_delivery, run_delivery_worker, DeliveryConfig, DeliveryOutcome};
pub use dispatcher::start_webhook_dispatcher;
pub use signature::{sign_payload, verify_signature};
pub use subscription::{matching_subscriptions, validate_subscription};
