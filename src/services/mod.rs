//! Services of the cancellation workflow
pub mod directory;
pub mod inventory;
pub mod notifications;
pub mod orchestrator;
pub mod orders;
pub mod outbox;
pub mod publisher;
pub mod refunds;
