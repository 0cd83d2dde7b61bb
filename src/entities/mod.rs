pub mod address;
pub mod cart_item;
pub mod order;
pub mod order_address;
pub mod order_item;
pub mod order_update;
pub mod payment;
pub mod product;

pub use order::OrderStatus;
pub use payment::{PaymentProvider, PaymentStatus};
