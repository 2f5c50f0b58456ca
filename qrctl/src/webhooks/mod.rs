//! Outgoing per-QR-code webhooks, delivered through a database outbox.
//!
//! - [`signing`]: hex HMAC-SHA256 signatures (shared with incoming Razorpay callbacks)
//! - [`events`]: event types, payloads and the enqueue helper
//! - [`dispatcher`]: background claim/sign/send/record loop

pub mod dispatcher;
pub mod events;
pub mod signing;

pub use dispatcher::WebhookDispatcher;
pub use events::{QrWebhookEvent, WebhookPayload, enqueue, enqueue_best_effort};
pub use signing::generate_secret;
