//! Aggregates module
pub mod earnings;
pub mod notification;
pub mod order;
pub mod product;
pub mod refund;

pub use earnings::{EntryKind, SellerEarningEntry, SellerEarnings};
pub use notification::{Notification, NotificationKind};
pub use order::{Order, OrderError, OrderItem, OrderStatus, PaymentStatus};
pub use product::Product;
pub use refund::{RefundRequest, ReturnRecord, ReturnStatus};
