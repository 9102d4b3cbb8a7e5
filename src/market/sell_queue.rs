//! Resale queue: holders approve units of the current round for sale and
//! buyers are matched against those approvals before anything is minted.
//!
//! Matching order is approval creation order, ties broken by holder address.
//! An approval that drops to zero leaves the queue; approving again later
//! puts the holder at the back.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::errors::{MarketError, MarketResult};
use crate::market::types::{net_of_percent, Address, Round};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellApproval {
    /// Creation sequence within the round
    pub seq: u64,
    pub quantity: u64,
}

/// Approvals for a single round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundApprovals {
    approvals: BTreeMap<Address, SellApproval>,
    next_seq: u64,
    #[serde(skip)]
    order: BTreeSet<(u64, Address)>,
}

impl RoundApprovals {
    fn reindex(&mut self) {
        self.order = self
            .approvals
            .iter()
            .map(|(addr, a)| (a.seq, addr.clone()))
            .collect();
    }

    fn approved_of(&self, holder: &Address) -> u64 {
        self.approvals.get(holder).map(|a| a.quantity).unwrap_or(0)
    }

    fn increase(&mut self, holder: &Address, quantity: u64) {
        match self.approvals.get_mut(holder) {
            Some(a) => a.quantity += quantity,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.approvals
                    .insert(holder.clone(), SellApproval { seq, quantity });
                self.order.insert((seq, holder.clone()));
            }
        }
    }

    fn decrease(&mut self, holder: &Address, quantity: u64) {
        let emptied = match self.approvals.get_mut(holder) {
            Some(a) => {
                a.quantity = a.quantity.saturating_sub(quantity);
                (a.quantity == 0).then_some(a.seq)
            }
            None => None,
        };
        if let Some(seq) = emptied {
            self.approvals.remove(holder);
            self.order.remove(&(seq, holder.clone()));
        }
    }
}

/// Units taken from one seller by a single buy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub seller: Address,
    pub quantity: u64,
    /// Total owed to the seller
    pub payout: u128,
    /// Total routed to the commission vault
    pub commission: u128,
}

/// Per-round approval tables, indexed like the round list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SellQueue {
    rounds: Vec<RoundApprovals>,
}

impl SellQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the matching order after deserialization
    pub(crate) fn reindex(&mut self) {
        self.rounds.iter_mut().for_each(RoundApprovals::reindex);
    }

    fn round_entry(&mut self, round_index: usize) -> &mut RoundApprovals {
        if self.rounds.len() <= round_index {
            self.rounds.resize_with(round_index + 1, RoundApprovals::default);
        }
        &mut self.rounds[round_index]
    }

    pub fn approved_of(&self, round_index: usize, holder: &Address) -> u64 {
        self.rounds
            .get(round_index)
            .map(|r| r.approved_of(holder))
            .unwrap_or(0)
    }

    pub fn total_approved(&self, round_index: usize) -> u64 {
        self.rounds
            .get(round_index)
            .map(|r| r.approvals.values().map(|a| a.quantity).sum())
            .unwrap_or(0)
    }

    /// Sellers in matching order with their approved quantity
    pub fn sellers(&self, round_index: usize) -> Vec<(Address, u64)> {
        self.rounds
            .get(round_index)
            .map(|r| {
                r.order
                    .iter()
                    .map(|(_, addr)| (addr.clone(), r.approved_of(addr)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Approve `quantity` more units of `holder`'s round balance for sale
    pub fn approve(
        &mut self,
        round: &mut Round,
        round_index: usize,
        holder: &Address,
        quantity: u64,
        round_balance: u64,
    ) -> MarketResult<u64> {
        if quantity == 0 {
            return Err(MarketError::InvalidQuantity);
        }
        let already = self.approved_of(round_index, holder);
        let available = round_balance.saturating_sub(already);
        if quantity > available {
            return Err(MarketError::InsufficientUnsoldBalance {
                requested: quantity,
                available,
            });
        }

        self.round_entry(round_index).increase(holder, quantity);
        round.unit_count_for_sale += quantity;
        debug!(
            "[SELL] {} approved {} (total {}) in round {}",
            holder,
            quantity,
            already + quantity,
            round_index
        );
        Ok(already + quantity)
    }

    /// Withdraw `quantity` units from `holder`'s approval
    pub fn disapprove(
        &mut self,
        round: &mut Round,
        round_index: usize,
        holder: &Address,
        quantity: u64,
    ) -> MarketResult<u64> {
        if quantity == 0 {
            return Err(MarketError::InvalidQuantity);
        }
        let approved = self.approved_of(round_index, holder);
        if quantity > approved {
            return Err(MarketError::InsufficientApprovedBalance {
                requested: quantity,
                approved,
            });
        }

        self.round_entry(round_index).decrease(holder, quantity);
        round.unit_count_for_sale = round.unit_count_for_sale.saturating_sub(quantity);
        debug!(
            "[SELL] {} withdrew {} (left {}) in round {}",
            holder,
            quantity,
            approved - quantity,
            round_index
        );
        Ok(approved - quantity)
    }

    /// Work out which sellers a buy of `requested` units would consume.
    ///
    /// Read-only; the buyer's own approval is skipped and the result never
    /// covers more than `requested` units.
    pub fn plan_fills(
        &self,
        round_index: usize,
        buyer: &Address,
        requested: u64,
        unit_price: u128,
        trade_commission_percent: u8,
    ) -> MarketResult<Vec<Fill>> {
        let Some(table) = self.rounds.get(round_index) else {
            return Ok(Vec::new());
        };

        let unit_payout = net_of_percent(unit_price, trade_commission_percent)
            .ok_or(MarketError::Overflow("resale payout"))?;
        let unit_commission = unit_price - unit_payout;

        let mut fills = Vec::new();
        let mut remaining = requested;
        for (_, seller) in &table.order {
            if remaining == 0 {
                break;
            }
            if seller == buyer {
                continue;
            }
            let take = remaining.min(table.approved_of(seller));
            if take == 0 {
                continue;
            }

            let payout = unit_payout
                .checked_mul(take as u128)
                .ok_or(MarketError::Overflow("resale payout"))?;
            let commission = unit_commission
                .checked_mul(take as u128)
                .ok_or(MarketError::Overflow("resale commission"))?;

            fills.push(Fill {
                seller: seller.clone(),
                quantity: take,
                payout,
                commission,
            });
            remaining -= take;
        }

        Ok(fills)
    }

    /// Consume the approval side of a planned fill
    pub(crate) fn apply_fill(&mut self, round: &mut Round, round_index: usize, fill: &Fill) {
        self.round_entry(round_index)
            .decrease(&fill.seller, fill.quantity);
        round.unit_count_for_sale = round.unit_count_for_sale.saturating_sub(fill.quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::RoundParams;

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    fn round() -> Round {
        Round::new(0, RoundParams::default())
    }

    #[test]
    fn test_approve_within_balance() {
        let mut q = SellQueue::new();
        let mut r = round();
        assert_eq!(q.approve(&mut r, 0, &addr("a"), 1, 1).unwrap(), 1);
        assert_eq!(q.approved_of(0, &addr("a")), 1);
        assert_eq!(r.unit_count_for_sale, 1);
    }

    #[test]
    fn test_approve_beyond_unsold_balance_fails_without_change() {
        let mut q = SellQueue::new();
        let mut r = round();
        q.approve(&mut r, 0, &addr("a"), 1, 1).unwrap();

        let err = q.approve(&mut r, 0, &addr("a"), 1, 1).unwrap_err();
        assert!(matches!(
            err,
            MarketError::InsufficientUnsoldBalance {
                requested: 1,
                available: 0
            }
        ));
        assert_eq!(q.approved_of(0, &addr("a")), 1);
        assert_eq!(r.unit_count_for_sale, 1);
    }

    #[test]
    fn test_approve_zero_rejected() {
        let mut q = SellQueue::new();
        let mut r = round();
        assert!(matches!(
            q.approve(&mut r, 0, &addr("a"), 0, 5),
            Err(MarketError::InvalidQuantity)
        ));
    }

    #[test]
    fn test_disapprove() {
        let mut q = SellQueue::new();
        let mut r = round();
        q.approve(&mut r, 0, &addr("a"), 3, 3).unwrap();

        assert!(matches!(
            q.disapprove(&mut r, 0, &addr("a"), 4),
            Err(MarketError::InsufficientApprovedBalance {
                requested: 4,
                approved: 3
            })
        ));
        assert_eq!(q.disapprove(&mut r, 0, &addr("a"), 3).unwrap(), 0);
        assert_eq!(r.unit_count_for_sale, 0);
        assert!(q.sellers(0).is_empty());
    }

    #[test]
    fn test_plan_follows_creation_order_and_skips_buyer() {
        let mut q = SellQueue::new();
        let mut r = round();
        q.approve(&mut r, 0, &addr("zed"), 2, 2).unwrap();
        q.approve(&mut r, 0, &addr("amy"), 2, 2).unwrap();
        q.approve(&mut r, 0, &addr("buyer"), 5, 5).unwrap();

        let fills = q.plan_fills(0, &addr("buyer"), 3, 100, 10).unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].seller, addr("zed"));
        assert_eq!(fills[0].quantity, 2);
        assert_eq!(fills[0].payout, 180);
        assert_eq!(fills[0].commission, 20);
        assert_eq!(fills[1].seller, addr("amy"));
        assert_eq!(fills[1].quantity, 1);
    }

    #[test]
    fn test_plan_never_exceeds_outstanding() {
        let mut q = SellQueue::new();
        let mut r = round();
        q.approve(&mut r, 0, &addr("a"), 2, 2).unwrap();

        let fills = q.plan_fills(0, &addr("b"), 10, 100, 0).unwrap();
        let filled: u64 = fills.iter().map(|f| f.quantity).sum();
        assert_eq!(filled, 2);
        assert!(q.plan_fills(4, &addr("b"), 10, 100, 0).unwrap().is_empty());
    }

    #[test]
    fn test_emptied_approval_requeues_at_back() {
        let mut q = SellQueue::new();
        let mut r = round();
        q.approve(&mut r, 0, &addr("a"), 1, 5).unwrap();
        q.approve(&mut r, 0, &addr("b"), 1, 5).unwrap();

        let fills = q.plan_fills(0, &addr("c"), 1, 10, 0).unwrap();
        q.apply_fill(&mut r, 0, &fills[0]);
        q.approve(&mut r, 0, &addr("a"), 1, 4).unwrap();

        let order: Vec<Address> = q.sellers(0).into_iter().map(|(a, _)| a).collect();
        assert_eq!(order, vec![addr("b"), addr("a")]);
        assert_eq!(r.unit_count_for_sale, 2);
    }

    #[test]
    fn test_reindex_after_deserialize() {
        let mut q = SellQueue::new();
        let mut r = round();
        q.approve(&mut r, 0, &addr("a"), 1, 1).unwrap();
        q.approve(&mut r, 0, &addr("b"), 2, 2).unwrap();

        let json = serde_json::to_string(&q).unwrap();
        let mut restored: SellQueue = serde_json::from_str(&json).unwrap();
        assert!(restored.sellers(0).is_empty());
        restored.reindex();
        assert_eq!(restored.sellers(0), q.sellers(0));
    }
}
