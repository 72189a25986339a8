//! Inventory restoration for cancelled line items
//!
//! One call restores one line item. Per-item outcomes of a cancellation are
//! tracked by its outbox entries, so a missing product never blocks the rest.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::gateway::{DataGateway, Filter, GatewayError, GatewayExt, GatewayResult, Table, WriteBatch};

const MAX_CAS_ATTEMPTS: usize = 5;

pub struct InventoryRestorer {
    gateway: Arc<dyn DataGateway>,
}

impl InventoryRestorer {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self { Self { gateway } }

    /// Adds `quantity` back to the product's stock, committing `then` in the same batch.
    /// `Ok(false)` means the product no longer exists. A failed precondition inside
    /// `then` aborts without touching stock.
    pub async fn restore(&self, product_id: Uuid, quantity: u32, then: WriteBatch) -> GatewayResult<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let found: Option<Product> = self.gateway.fetch_optional(Table::Products, &Filter::by_id(product_id)).await?;
            let Some(mut product) = found else {
                tracing::warn!(%product_id, quantity, "Product missing, stock not restored");
                return Ok(false);
            };
            let previous = product.stock_quantity();
            product.restock(quantity);
            // Compare-and-set on the old counter so concurrent restocks are not lost.
            let batch = WriteBatch::new()
                .update(
                    Table::Products,
                    Filter::by_id(product_id).eq("stock_quantity", previous),
                    json!({ "stock_quantity": product.stock_quantity() }),
                )
                .append(then.clone());
            match self.gateway.commit(batch).await {
                Ok(()) => {
                    tracing::info!(%product_id, quantity, stock = product.stock_quantity().value(), "Stock restored");
                    return Ok(true);
                }
                Err(GatewayError::PreconditionFailed { table: Table::Products }) => {
                    tracing::debug!(%product_id, "Stock changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(GatewayError::PreconditionFailed { table: Table::Products })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{encode, InMemoryGateway, Op};

    async fn seed(gw: &InMemoryGateway, stock: u32) -> Product {
        let product = Product::create("Kettle", stock, Some(Uuid::now_v7()));
        gw.insert(Table::Products, encode(Table::Products, &product).unwrap()).await.unwrap();
        product
    }

    async fn stock_of(gw: &InMemoryGateway, id: Uuid) -> u32 {
        let product: Product = gw.fetch_optional(Table::Products, &Filter::by_id(id)).await.unwrap().unwrap();
        product.stock_quantity().value()
    }

    #[tokio::test]
    async fn test_restore_increments_stock() {
        let gw = InMemoryGateway::new();
        let p = seed(&gw, 2).await;
        let restorer = InventoryRestorer::new(Arc::new(gw.clone()));
        assert!(restorer.restore(p.id(), 3, WriteBatch::new()).await.unwrap());
        assert_eq!(stock_of(&gw, p.id()).await, 5);
    }

    #[tokio::test]
    async fn test_missing_product_reports_false() {
        let gw = InMemoryGateway::new();
        let restorer = InventoryRestorer::new(Arc::new(gw.clone()));
        assert_eq!(restorer.restore(Uuid::now_v7(), 4, WriteBatch::new()).await, Ok(false));
    }

    #[tokio::test]
    async fn test_concurrent_restocks_all_land() {
        let gw = InMemoryGateway::new();
        let p = seed(&gw, 0).await;
        let restorer = InventoryRestorer::new(Arc::new(gw.clone()));
        let (a, b, c) = tokio::join!(
            restorer.restore(p.id(), 1, WriteBatch::new()),
            restorer.restore(p.id(), 2, WriteBatch::new()),
            restorer.restore(p.id(), 4, WriteBatch::new()),
        );
        assert!(a.unwrap() && b.unwrap() && c.unwrap());
        assert_eq!(stock_of(&gw, p.id()).await, 7);
    }

    #[tokio::test]
    async fn test_companion_write_shares_the_commit() {
        let gw = InMemoryGateway::new();
        let p = seed(&gw, 10).await;
        gw.insert(Table::Outbox, json!({"id": "e1", "lease": 1, "status": "PENDING"})).await.unwrap();
        let restorer = InventoryRestorer::new(Arc::new(gw.clone()));
        let marker = |lease: u32| WriteBatch::new().update(Table::Outbox, Filter::by_id("e1").eq("lease", lease), json!({"status": "DONE"}));

        let err = restorer.restore(p.id(), 3, marker(7)).await.unwrap_err();
        assert_eq!(err, GatewayError::PreconditionFailed { table: Table::Outbox });
        assert_eq!(stock_of(&gw, p.id()).await, 10);

        gw.fail_on(Table::Outbox, Op::Update);
        assert!(matches!(restorer.restore(p.id(), 3, marker(1)).await, Err(GatewayError::Storage(_))));
        assert_eq!(stock_of(&gw, p.id()).await, 10);

        gw.clear_failures();
        assert!(restorer.restore(p.id(), 3, marker(1)).await.unwrap());
        assert_eq!(stock_of(&gw, p.id()).await, 13);
        assert_eq!(gw.rows(Table::Outbox)[0]["status"], "DONE");
    }
}
