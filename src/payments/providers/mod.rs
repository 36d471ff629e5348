//! Payment provider implementations
//!
//! Concrete implementations of the Provider trait for external processors.

pub mod stripe;

pub use stripe::StripeProvider;
