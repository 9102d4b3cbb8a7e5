//! Domain-specific error types for the round market
//!
//! Checks run before any shared state is touched, so a failed check leaves the
//! market exactly as it found it. A `Registry` error raised mid-commit is the
//! exception. Payouts refused after commit are not errors at all: they are
//! parked on the market as unsettled.

use thiserror::Error;

use crate::market::registry::RegistryError;
use crate::market::settlement::PaymentError;
use crate::market::types::Address;

/// Coarse classification of a [`MarketError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Zero or otherwise invalid input
    Validation,
    /// Selling more than owned or approved
    InsufficientBalance,
    /// Operation not allowed in the current round/vault state
    State,
    /// Overflow in price or payment math
    Arithmetic,
    /// Failure reported by a collaborator (registry, payments)
    External,
}

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Payment {payment} buys zero units at unit price {unit_price}")]
    ZeroQuantityPurchase { payment: u128, unit_price: u128 },

    #[error("Requested quantity must be greater than zero")]
    ZeroQuantityRequested,

    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Top size must be greater than zero")]
    InvalidTopSize,

    #[error("Insufficient unsold balance: requested {requested}, available {available}")]
    InsufficientUnsoldBalance { requested: u64, available: u64 },

    #[error("Insufficient approved balance: requested {requested}, approved {approved}")]
    InsufficientApprovedBalance { requested: u64, approved: u64 },

    #[error("Round not found: {0}")]
    RoundNotFound(usize),

    #[error("Round {index} not finished: ends at {ends_at}")]
    RoundNotFinished { index: usize, ends_at: u64 },

    #[error("Caller {0} is not the winner of this round")]
    NotWinner(Address),

    #[error("Prize of round {0} already redeemed")]
    AlreadyRedeemed(usize),

    #[error("Caller {0} is not the market owner")]
    NotOwner(Address),

    #[error("Commission vault is empty")]
    NothingToWithdraw,

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("Unit price of round {0} is zero")]
    ZeroUnitPrice(usize),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarketError::ZeroQuantityPurchase { .. }
            | MarketError::ZeroQuantityRequested
            | MarketError::InvalidQuantity
            | MarketError::InvalidTopSize => ErrorKind::Validation,
            MarketError::InsufficientUnsoldBalance { .. }
            | MarketError::InsufficientApprovedBalance { .. } => ErrorKind::InsufficientBalance,
            MarketError::RoundNotFound(_)
            | MarketError::RoundNotFinished { .. }
            | MarketError::NotWinner(_)
            | MarketError::AlreadyRedeemed(_)
            | MarketError::NotOwner(_)
            | MarketError::NothingToWithdraw => ErrorKind::State,
            MarketError::Overflow(_) | MarketError::ZeroUnitPrice(_) => ErrorKind::Arithmetic,
            MarketError::Payment(_) | MarketError::Registry(_) => ErrorKind::External,
        }
    }
}

/// Result type alias for market operations
pub type MarketResult<T> = Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_display() {
        let err = MarketError::InsufficientUnsoldBalance {
            requested: 5,
            available: 2,
        };
        assert!(err.to_string().contains("requested 5"));
        assert!(err.to_string().contains("available 2"));
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(MarketError::InvalidTopSize.kind(), ErrorKind::Validation);
        assert_eq!(MarketError::AlreadyRedeemed(0).kind(), ErrorKind::State);
        assert_eq!(MarketError::Overflow("price").kind(), ErrorKind::Arithmetic);
        assert_eq!(MarketError::ZeroUnitPrice(1).kind(), ErrorKind::Arithmetic);
    }

    #[test]
    fn test_payment_error_converts() {
        let err: MarketError = PaymentError::Unavailable("offline".into()).into();
        assert!(matches!(err, MarketError::Payment(_)));
        assert_eq!(err.kind(), ErrorKind::External);
    }
}
