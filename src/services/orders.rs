//! Order repository over the gateway

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderItem};
use crate::gateway::{encode, DataGateway, Filter, GatewayExt, GatewayResult, Table};

#[derive(Clone)]
pub struct OrderRepository {
    gateway: Arc<dyn DataGateway>,
}

impl OrderRepository {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self { Self { gateway } }

    /// Loads the order row together with its line items in creation order.
    pub async fn load(&self, order_id: Uuid) -> GatewayResult<Option<Order>> {
        let found: Option<Order> = self.gateway.fetch_optional(Table::Orders, &Filter::by_id(order_id)).await?;
        let Some(order) = found else { return Ok(None) };
        let mut items: Vec<OrderItem> = self.gateway.fetch_all(Table::OrderItems, &Filter::new().eq("order_id", order_id)).await?;
        items.sort_by_key(|i| i.position);
        Ok(Some(order.with_items(items)))
    }

    /// Writes a new order and its items; checkout lives elsewhere, this serves seeding and tooling.
    pub async fn insert(&self, order: &Order) -> GatewayResult<()> {
        let mut batch = crate::gateway::WriteBatch::new().insert(Table::Orders, encode(Table::Orders, order)?);
        for item in order.items() {
            batch = batch.insert(Table::OrderItems, encode(Table::OrderItems, item)?);
        }
        self.gateway.commit(batch).await
    }
}
