//! Value transfer seam: resale proceeds, prizes and commission withdrawals.
//!
//! Operations build their full list of payouts up front, dry-run every one of
//! them through [`PaymentSink::check`] before committing state, and only then
//! call [`PaymentSink::pay`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::market::types::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutReason {
    /// Proceeds to a seller whose approved units were bought
    Resale { round: usize },
    /// Winner redemption
    Prize { round: usize },
    /// Owner withdrawing the commission vault
    Commission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub to: Address,
    pub amount: u128,
    pub reason: PayoutReason,
}

#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    #[error("Payment of {amount} to {to} rejected: {reason}")]
    Rejected {
        to: Address,
        amount: u128,
        reason: String,
    },

    #[error("Payment backend unavailable: {0}")]
    Unavailable(String),
}

pub trait PaymentSink: Send + Sync {
    /// Dry-run a payout. Called before the owning operation commits.
    fn check(&self, _payout: &Payout) -> Result<(), PaymentError> {
        Ok(())
    }

    fn pay(&self, payout: &Payout) -> Result<(), PaymentError>;
}

/// Sink that records every payout in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    paid: Mutex<Vec<Payout>>,
    blocked: Mutex<BTreeSet<Address>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all future payouts to `to`
    pub fn block(&self, to: &Address) {
        self.blocked.lock().insert(to.clone());
    }

    pub fn unblock(&self, to: &Address) {
        self.blocked.lock().remove(to);
    }

    pub fn payouts(&self) -> Vec<Payout> {
        self.paid.lock().clone()
    }

    pub fn total_paid_to(&self, to: &Address) -> u128 {
        self.paid
            .lock()
            .iter()
            .filter(|p| &p.to == to)
            .map(|p| p.amount)
            .sum()
    }

    fn refuse_if_blocked(&self, payout: &Payout) -> Result<(), PaymentError> {
        if self.blocked.lock().contains(&payout.to) {
            return Err(PaymentError::Rejected {
                to: payout.to.clone(),
                amount: payout.amount,
                reason: "recipient blocked".to_string(),
            });
        }
        Ok(())
    }
}

impl PaymentSink for RecordingSink {
    fn check(&self, payout: &Payout) -> Result<(), PaymentError> {
        self.refuse_if_blocked(payout)
    }

    fn pay(&self, payout: &Payout) -> Result<(), PaymentError> {
        self.refuse_if_blocked(payout)?;
        self.paid.lock().push(payout.clone());
        Ok(())
    }
}

/// Dry-run every payout, stopping at the first refusal
pub fn check_all(sink: &dyn PaymentSink, payouts: &[Payout]) -> Result<(), PaymentError> {
    payouts.iter().try_for_each(|p| sink.check(p))
}

/// Issue payouts in order once state has been committed. Every payout is
/// attempted; the refused ones are returned.
pub fn pay_all(sink: &dyn PaymentSink, payouts: &[Payout]) -> Vec<Payout> {
    let mut failed = Vec::new();
    for payout in payouts {
        match sink.pay(payout) {
            Ok(()) => tracing::debug!(
                "[SETTLE] paid {} to {} ({:?})",
                payout.amount,
                payout.to,
                payout.reason
            ),
            Err(e) => {
                tracing::error!(
                    "[SETTLE] payout failed after commit: to={} amount={} reason={:?}: {}",
                    payout.to,
                    payout.amount,
                    payout.reason,
                    e
                );
                failed.push(payout.clone());
            }
        }
    }
    failed
}
