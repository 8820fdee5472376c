pub mod consumer;
pub mod dlq;
pub mod emitter;
pub mod outbox;
pub mod publisher;

pub use consumer::{is_event_processed, mark_event_processed};
pub use emitter::{CustomerSnapshot, DomainEvent, EventKind, InvoiceSnapshot, PaymentSnapshot};
pub use outbox::enqueue_event;
pub use publisher::run_publisher_task;
