//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    name: String,
    stock_quantity: Quantity,
    supplier_id: Option<Uuid>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(name: impl Into<String>, stock: u32, supplier_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), name: name.into(), stock_quantity: Quantity::new(stock),
            supplier_id, created_by: supplier_id, created_at: now, updated_at: now,
        }
    }

    /// Product listed by an account that is not recorded as its supplier.
    pub fn created_by_account(mut self, account_id: Uuid) -> Self { self.supplier_id = None; self.created_by = Some(account_id); self }

    pub fn id(&self) -> Uuid { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn stock_quantity(&self) -> Quantity { self.stock_quantity }
    pub fn supplier_id(&self) -> Option<Uuid> { self.supplier_id }
    pub fn created_by(&self) -> Option<Uuid> { self.created_by }

    /// Blind increment; saturates instead of overflowing.
    pub fn restock(&mut self, qty: u32) {
        self.stock_quantity = self.stock_quantity.add(qty);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_restock() {
        let mut p = Product::create("Mug", 4, Some(Uuid::now_v7()));
        p.restock(3);
        assert_eq!(p.stock_quantity().value(), 7);
    }
    #[test]
    fn test_created_by_account_clears_supplier() {
        let owner = Uuid::now_v7();
        let p = Product::create("Mug", 1, Some(Uuid::now_v7())).created_by_account(owner);
        assert_eq!((p.supplier_id(), p.created_by()), (None, Some(owner)));
    }
}
