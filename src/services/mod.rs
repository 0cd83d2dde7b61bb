// Order lifecycle
pub mod checkout;
pub mod orders;
pub mod reconciler;

// Shopping cart
pub mod cart;

// Payment provider integration
pub mod payment_errors;
pub mod payment_gateway;

pub use cart::CartService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use payment_gateway::{PaymentGateway, StripeGateway};
pub use reconciler::PaymentReconciler;
