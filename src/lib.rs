//! Marketplace Orders
//!
//! Order cancellation and refund reconciliation for a multi-role marketplace
//! (customers, suppliers, admins, super-admins) backed by a hosted relational store.
//!
//! ## Features
//! - Cancellation validation and status transition
//! - Refund ledger with seller earnings deduction
//! - Inventory restoration for cancelled line items
//! - Customer, supplier and admin notifications
//! - Transactional outbox with a retrying relay worker

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod lookup;
pub mod services;

pub use config::Config;
pub use domain::aggregates::{Order, OrderError, OrderStatus, PaymentStatus};
pub use gateway::{DataGateway, GatewayError, InMemoryGateway, PgGateway};
pub use services::orchestrator::{CancellationError, CancellationOrchestrator};

use std::sync::Arc;

use crate::clock::Clock;
use crate::services::{
    directory::AccountDirectory, inventory::InventoryRestorer, notifications::NotificationEmitter,
    outbox::OutboxRelay, publisher::EventPublisher, refunds::RefundLedger,
};

// =============================================================================
// Service wiring
// =============================================================================

/// Every service of the cancellation workflow, built once at startup over one gateway.
#[derive(Clone)]
pub struct Services {
    pub notifications: Arc<NotificationEmitter>,
    pub relay: Arc<OutboxRelay>,
    pub orchestrator: Arc<CancellationOrchestrator>,
}

impl Services {
    pub fn build(
        gateway: Arc<dyn DataGateway>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let directory = Arc::new(AccountDirectory::new(
            gateway.clone(),
            clock.clone(),
            chrono::Duration::seconds(config.admin_cache_ttl_secs as i64),
        ));
        let notifications = Arc::new(NotificationEmitter::new(gateway.clone(), clock.clone()));
        let ledger = Arc::new(RefundLedger::new(
            gateway.clone(),
            directory.clone(),
            publisher.clone(),
            clock.clone(),
        ));
        let inventory = Arc::new(InventoryRestorer::new(gateway.clone()));
        let relay = Arc::new(OutboxRelay::new(
            gateway.clone(),
            directory,
            ledger,
            inventory,
            notifications.clone(),
            publisher,
            clock.clone(),
            config.outbox_policy(),
        ));
        let orchestrator = Arc::new(CancellationOrchestrator::new(gateway, relay.clone(), clock));
        Self { notifications, relay, orchestrator }
    }
}
