//! Account directory
//!
//! Role-aware account lookups, the cached admin recipient list and supplier
//! resolution for an order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::domain::aggregates::{Order, Product};
use crate::domain::value_objects::Role;
use crate::gateway::{DataGateway, Filter, GatewayExt, GatewayResult, Table};
use crate::lookup::{LookupChain, LookupStrategy};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

pub struct AccountDirectory {
    gateway: Arc<dyn DataGateway>,
    admins: TtlCache<(), Vec<Uuid>>,
    suppliers: LookupChain<Order, Uuid>,
}

impl AccountDirectory {
    pub fn new(gateway: Arc<dyn DataGateway>, clock: Arc<dyn Clock>, admin_ttl: Duration) -> Self {
        let suppliers = LookupChain::new()
            .with(ItemSupplierField)
            .with(ProductSupplierColumn { gateway: gateway.clone() })
            .with(ProductCreatorAccount { gateway: gateway.clone() });
        Self { gateway, admins: TtlCache::new(clock, admin_ttl), suppliers }
    }

    pub async fn find(&self, role: Role, id: Uuid) -> GatewayResult<Option<Account>> {
        self.gateway.fetch_optional(role.table(), &Filter::by_id(id)).await
    }

    pub async fn list(&self, role: Role) -> GatewayResult<Vec<Account>> {
        self.gateway.fetch_all(role.table(), &Filter::new()).await
    }

    /// First role, in [`Role::ALL`] order, holding an account with this id.
    pub async fn resolve_role(&self, actor_id: Uuid) -> GatewayResult<Option<Role>> {
        for role in Role::ALL {
            if self.find(role, actor_id).await?.is_some() {
                return Ok(Some(role));
            }
        }
        Ok(None)
    }

    /// Ids of every admin and super-admin, cached for the configured TTL.
    pub async fn admin_recipients(&self) -> GatewayResult<Vec<Uuid>> {
        if let Some(ids) = self.admins.get(&()) {
            return Ok(ids);
        }
        let mut ids = Vec::new();
        for role in [Role::Admin, Role::SuperAdmin] {
            for account in self.list(role).await? {
                if !ids.contains(&account.id) { ids.push(account.id); }
            }
        }
        tracing::debug!(count = ids.len(), "Refreshed admin recipient cache");
        self.admins.insert((), ids.clone());
        Ok(ids)
    }

    /// Supplier responsible for the order, derived from its first line item.
    /// `Ok(None)` means no strategy applied; a storage error is returned as is.
    pub async fn resolve_supplier(&self, order: &Order) -> GatewayResult<Option<Uuid>> {
        let supplier = self.suppliers.resolve(order).await?;
        if supplier.is_none() {
            tracing::warn!(order_id = %order.id(), strategies = ?self.suppliers.names(), "No supplier could be derived");
        }
        Ok(supplier)
    }
}

async fn first_product(gateway: &dyn DataGateway, order: &Order) -> Option<GatewayResult<Product>> {
    let item = order.items().first()?;
    let found: GatewayResult<Option<Product>> = gateway.fetch_optional(Table::Products, &Filter::by_id(item.product_id)).await;
    match found {
        Ok(Some(product)) => Some(Ok(product)),
        Ok(None) => None,
        Err(e) => Some(Err(e)),
    }
}

struct ItemSupplierField;

#[async_trait]
impl LookupStrategy<Order, Uuid> for ItemSupplierField {
    fn name(&self) -> &'static str { "order_item.supplier_id" }

    async fn lookup(&self, order: &Order) -> Option<GatewayResult<Uuid>> {
        order.items().first()?.supplier_id.map(Ok)
    }
}

struct ProductSupplierColumn {
    gateway: Arc<dyn DataGateway>,
}

#[async_trait]
impl LookupStrategy<Order, Uuid> for ProductSupplierColumn {
    fn name(&self) -> &'static str { "product.supplier_id" }

    async fn lookup(&self, order: &Order) -> Option<GatewayResult<Uuid>> {
        match first_product(self.gateway.as_ref(), order).await? {
            Ok(product) => product.supplier_id().map(Ok),
            Err(e) => Some(Err(e)),
        }
    }
}

struct ProductCreatorAccount {
    gateway: Arc<dyn DataGateway>,
}

#[async_trait]
impl LookupStrategy<Order, Uuid> for ProductCreatorAccount {
    fn name(&self) -> &'static str { "product.created_by" }

    async fn lookup(&self, order: &Order) -> Option<GatewayResult<Uuid>> {
        let creator = match first_product(self.gateway.as_ref(), order).await? {
            Ok(product) => product.created_by()?,
            Err(e) => return Some(Err(e)),
        };
        match self.gateway.select(Role::Supplier.table(), &Filter::by_id(creator)).await {
            Ok(rows) if rows.is_empty() => None,
            Ok(_) => Some(Ok(creator)),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::aggregates::PaymentStatus;
    use crate::gateway::{encode, GatewayError, InMemoryGateway, Op};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn directory(gw: &InMemoryGateway, clock: Arc<ManualClock>) -> AccountDirectory {
        AccountDirectory::new(Arc::new(gw.clone()), clock, Duration::minutes(5))
    }

    async fn seed_product(gw: &InMemoryGateway, product: &Product) {
        gw.insert(Table::Products, encode(Table::Products, product).unwrap()).await.unwrap();
    }

    fn order_for(product_id: Uuid) -> Order {
        let mut order = Order::create(Uuid::now_v7(), PaymentStatus::Completed, Decimal::new(10, 0));
        order.add_item(product_id, 1, Decimal::new(10, 0));
        order
    }

    #[tokio::test]
    async fn test_supplier_from_item_field_first() {
        let gw = InMemoryGateway::new();
        let dir = directory(&gw, Arc::new(ManualClock::default()));
        let supplier = Uuid::now_v7();
        let mut order = Order::create(Uuid::now_v7(), PaymentStatus::Completed, Decimal::new(10, 0));
        order.add_item(Uuid::now_v7(), 1, Decimal::ONE).supplier_id = Some(supplier);
        order.add_item(Uuid::now_v7(), 1, Decimal::ONE).supplier_id = Some(Uuid::now_v7());
        assert_eq!(dir.resolve_supplier(&order).await, Ok(Some(supplier)));
    }

    #[tokio::test]
    async fn test_supplier_falls_back_to_product_then_creator() {
        let gw = InMemoryGateway::new();
        let dir = directory(&gw, Arc::new(ManualClock::default()));

        let supplier = Uuid::now_v7();
        let product = Product::create("Lamp", 5, Some(supplier));
        seed_product(&gw, &product).await;
        assert_eq!(dir.resolve_supplier(&order_for(product.id())).await, Ok(Some(supplier)));

        let owner = Uuid::now_v7();
        gw.insert(Table::Suppliers, json!({"id": owner, "name": "Acme"})).await.unwrap();
        let listed = Product::create("Desk", 2, None).created_by_account(owner);
        seed_product(&gw, &listed).await;
        assert_eq!(dir.resolve_supplier(&order_for(listed.id())).await, Ok(Some(owner)));

        let stranger = Product::create("Chair", 2, None).created_by_account(Uuid::now_v7());
        seed_product(&gw, &stranger).await;
        assert_eq!(dir.resolve_supplier(&order_for(stranger.id())).await, Ok(None));
    }

    #[tokio::test]
    async fn test_supplier_lookup_reports_storage_errors() {
        let gw = InMemoryGateway::new();
        let dir = directory(&gw, Arc::new(ManualClock::default()));
        let product = Product::create("Lamp", 5, Some(Uuid::now_v7()));
        seed_product(&gw, &product).await;

        gw.fail_on(Table::Products, Op::Select);
        assert!(matches!(dir.resolve_supplier(&order_for(product.id())).await, Err(GatewayError::Storage(_))));
        gw.clear_failures();
        assert_eq!(dir.resolve_supplier(&order_for(product.id())).await, Ok(product.supplier_id()));
    }

    #[tokio::test]
    async fn test_admin_recipients_cached_until_ttl() {
        let gw = InMemoryGateway::new();
        let clock = Arc::new(ManualClock::default());
        let dir = directory(&gw, clock.clone());
        let admin = Uuid::now_v7();
        let root = Uuid::now_v7();
        gw.insert(Table::Admins, json!({"id": admin})).await.unwrap();
        gw.insert(Table::SuperAdmins, json!({"id": root})).await.unwrap();
        assert_eq!(dir.admin_recipients().await.unwrap(), vec![admin, root]);

        gw.insert(Table::Admins, json!({"id": Uuid::now_v7()})).await.unwrap();
        assert_eq!(dir.admin_recipients().await.unwrap().len(), 2);
        clock.advance(Duration::minutes(5));
        assert_eq!(dir.admin_recipients().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_role_checks_each_table() {
        let gw = InMemoryGateway::new();
        let dir = directory(&gw, Arc::new(ManualClock::default()));
        let customer = Uuid::now_v7();
        gw.insert(Table::Customers, json!({"id": customer, "email": "a@example.com"})).await.unwrap();
        assert_eq!(dir.resolve_role(customer).await.unwrap(), Some(Role::Customer));
        assert_eq!(dir.resolve_role(Uuid::now_v7()).await.unwrap(), None);
        assert_eq!(dir.find(Role::Customer, customer).await.unwrap().unwrap().email.as_deref(), Some("a@example.com"));
    }
}
