//! Order lifecycle and checkout core for a printing-shop storefront.
//!
//! The crate covers the one storefront subsystem with real state and timing
//! concerns: the dual-backend cart, the checkout step that freezes prices and
//! promo discounts into an immutable order snapshot, the guarded order state
//! machine with its payment deadline, and the append-only audit ledger.

pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod ledger;
pub mod order;
pub mod promo;
pub mod service;
pub mod types;
pub mod utils;
