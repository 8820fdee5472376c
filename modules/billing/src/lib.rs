//! Billing service: invoice reconciliation and webhook dispatch.
//!
//! Invoice status is derived from the ledger of completed payments and
//! refunds; every transition runs under a per-invoice row lock and emits
//! domain events through a transactional outbox. A background relay
//! publishes them on the event bus, where the webhook dispatcher fans them
//! out into signed, retried HTTP deliveries per subscriber.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod numbering;
pub mod routes;
pub mod sweeps;
pub mod webhooks;
