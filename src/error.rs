//! Error taxonomy for the cart, checkout and order subsystems.
//!
//! Every failure mode is a typed outcome returned to the caller; the one
//! deliberate exception is the audit-ledger append, which is decoupled from
//! the transition that triggered it (see `service`).

use crate::order::OrderStatus;

/// Persistence and codec failures shared by every store-backed component.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("store write/read failed: {0}")]
    Backend(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl StorageError {
    pub(crate) fn encode<E: std::fmt::Display>(err: minicbor::encode::Error<E>) -> Self {
        StorageError::Encode(err.to_string())
    }
}

/// Cart mutations are write-through; a failed remote write surfaces here and
/// leaves no optimistic local state behind.
#[derive(thiserror::Error, Debug)]
pub enum CartError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Typed rejection from the promotion resolver. Checkout reports these to the
/// caller instead of silently dropping the discount.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PromoRejection {
    #[error("promo code not found")]
    NotFound,
    #[error("promo code is not active")]
    Inactive,
    #[error("promo code is outside its validity window")]
    OutsideWindow,
}

#[derive(thiserror::Error, Debug)]
pub enum CheckoutError {
    #[error("no cart lines selected - nothing to check out")]
    EmptySelection,
    #[error(transparent)]
    Promotion(#[from] PromoRejection),
    #[error("order id generation kept colliding after {attempts} attempts")]
    IdentifierCollision { attempts: u32 },
    #[error("unknown payment method '{0}'")]
    UnknownPaymentMethod(String),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(thiserror::Error, Debug)]
pub enum TransitionError {
    #[error("order {order_id}: transition {from:?} -> {to:?} is not permitted")]
    Illegal {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("order {0} not found")]
    NotFound(String),
    #[error("order {0} can no longer be paid - it has expired")]
    Expired(String),
    #[error("order {0} has not reached its payment deadline yet")]
    NotDue(String),
    #[error("order {order_id}: concurrent writers, gave up after {attempts} attempts")]
    Contended { order_id: String, attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}
