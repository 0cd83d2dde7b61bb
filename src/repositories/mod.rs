//! Data access for the order aggregate and the stock ledger.
//!
//! Repositories borrow any [`sea_orm::ConnectionTrait`] so the same queries run
//! against the pool for plain reads and against a transaction inside a
//! [`UnitOfWork`](crate::db::UnitOfWork).

pub mod address_repository;
pub mod cart_repository;
pub mod order_repository;
pub mod payment_repository;
pub mod stock_ledger;

pub use address_repository::AddressRepository;
pub use cart_repository::CartRepository;
pub use order_repository::OrderRepository;
pub use payment_repository::PaymentRepository;
pub use stock_ledger::StockLedger;
