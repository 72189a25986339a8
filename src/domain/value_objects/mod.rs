//! Value Objects for the marketplace

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::gateway::Table;

/// Cancellation reason, trimmed and bounded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reason(String);

impl Reason {
    pub const MAX_LEN: usize = 500;

    pub fn new(value: impl Into<String>) -> Result<Self, ReasonError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(ReasonError::Empty); }
        if value.chars().count() > Self::MAX_LEN { return Err(ReasonError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReasonError {
    #[error("Cancellation reason is empty")]
    Empty,
    #[error("Cancellation reason exceeds {} characters", Reason::MAX_LEN)]
    TooLong,
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
}

/// Account role; each role lives in its own table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Supplier,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Lookup order when an actor id must be attributed to a role.
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Admin, Role::Supplier, Role::Customer];

    pub fn table(self) -> Table {
        match self {
            Role::Customer => Table::Customers,
            Role::Supplier => Table::Suppliers,
            Role::Admin => Table::Admins,
            Role::SuperAdmin => Table::SuperAdmins,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { Role::Customer => "customer", Role::Supplier => "supplier", Role::Admin => "admin", Role::SuperAdmin => "super_admin" };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_reason() {
        assert_eq!(Reason::new("  customer request ").unwrap().as_str(), "customer request");
        assert_eq!(Reason::new("   "), Err(ReasonError::Empty));
        assert_eq!(Reason::new("x".repeat(501)), Err(ReasonError::TooLong));
    }
    #[test]
    fn test_quantity_add_saturates() { assert_eq!(Quantity::new(u32::MAX).add(3).value(), u32::MAX); }
    #[test]
    fn test_role_tables() {
        assert_eq!(Role::SuperAdmin.table(), Table::SuperAdmins);
    }
}
