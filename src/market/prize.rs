//! Prize pool, leading contributor tracking and the commission vault.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{MarketError, MarketResult};
use crate::market::rounds::RoundScope;
use crate::market::types::{net_of_percent, Address, Round};

/// Accumulated trade and winner commissions awaiting the owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionVault {
    balance: u128,
}

impl CommissionVault {
    pub fn balance(&self) -> u128 {
        self.balance
    }

    /// Balance after crediting `amount`, without applying it
    pub fn preview_credit(&self, amount: u128) -> MarketResult<u128> {
        self.balance
            .checked_add(amount)
            .ok_or(MarketError::Overflow("commission vault"))
    }

    pub(crate) fn credit(&mut self, amount: u128) -> MarketResult<()> {
        self.balance = self.preview_credit(amount)?;
        Ok(())
    }

    /// Read and zero in one step
    pub(crate) fn take(&mut self) -> u128 {
        std::mem::take(&mut self.balance)
    }
}

/// Effects of a primary (minted) purchase, computed before anything changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryPurchase {
    pub cost: u128,
    pub prize_sum: u128,
    pub unit_count: u64,
    pub contribution: u128,
    pub takes_lead: bool,
}

pub fn plan_primary_purchase(
    round: &Round,
    scope: &RoundScope,
    buyer: &Address,
    quantity: u64,
    unit_price: u128,
) -> MarketResult<PrimaryPurchase> {
    let cost = unit_price
        .checked_mul(quantity as u128)
        .ok_or(MarketError::Overflow("purchase cost"))?;
    let prize_sum = round
        .prize_sum
        .checked_add(cost)
        .ok_or(MarketError::Overflow("prize sum"))?;
    let unit_count = round
        .unit_count
        .checked_add(quantity)
        .ok_or(MarketError::Overflow("unit count"))?;
    let contribution = scope
        .contribution_of(buyer)
        .checked_add(cost)
        .ok_or(MarketError::Overflow("contribution"))?;

    // Strictly greater: on a tie the earlier leader keeps the lead
    let takes_lead = match &round.leading_contributor {
        None => true,
        Some(leader) if leader == buyer => true,
        Some(leader) => contribution > scope.contribution_of(leader),
    };

    Ok(PrimaryPurchase {
        cost,
        prize_sum,
        unit_count,
        contribution,
        takes_lead,
    })
}

pub(crate) fn apply_primary_purchase(
    round: &mut Round,
    scope: &mut RoundScope,
    buyer: &Address,
    plan: &PrimaryPurchase,
) {
    round.prize_sum = plan.prize_sum;
    round.unit_count = plan.unit_count;
    scope.set_contribution(buyer, plan.contribution);
    if plan.takes_lead && round.leading_contributor.as_ref() != Some(buyer) {
        info!(
            "[PRIZE] new leading contributor {} with {} (prize {})",
            buyer, plan.contribution, plan.prize_sum
        );
        round.leading_contributor = Some(buyer.clone());
    }
    round.add_participant(buyer);
}

/// Split of a redeemed prize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrizeRedemption {
    pub winner_payout: u128,
    pub commission: u128,
}

/// Validate a prize withdrawal and compute the split
pub fn plan_prize_withdrawal(
    round: &Round,
    round_index: usize,
    caller: &Address,
    now: u64,
) -> MarketResult<PrizeRedemption> {
    if round.is_active(now) {
        return Err(MarketError::RoundNotFinished {
            index: round_index,
            ends_at: round.ends_at(),
        });
    }
    if round.leading_contributor.as_ref() != Some(caller) {
        return Err(MarketError::NotWinner(caller.clone()));
    }
    if round.prize_redeemed {
        return Err(MarketError::AlreadyRedeemed(round_index));
    }

    let winner_payout = net_of_percent(round.prize_sum, round.params.winner_commission_percent)
        .ok_or(MarketError::Overflow("winner payout"))?;
    Ok(PrizeRedemption {
        winner_payout,
        commission: round.prize_sum - winner_payout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::RoundParams;

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    fn buy(round: &mut Round, scope: &mut RoundScope, who: &str, qty: u64, price: u128) {
        let plan = plan_primary_purchase(round, scope, &addr(who), qty, price).unwrap();
        apply_primary_purchase(round, scope, &addr(who), &plan);
    }

    #[test]
    fn test_larger_contributor_takes_lead() {
        let mut round = Round::new(0, RoundParams::default());
        let mut scope = RoundScope::default();

        buy(&mut round, &mut scope, "a", 10, 100);
        assert_eq!(round.leading_contributor, Some(addr("a")));

        buy(&mut round, &mut scope, "b", 20, 100);
        assert_eq!(round.leading_contributor, Some(addr("b")));
        assert_eq!(round.prize_sum, 3_000);
        assert_eq!(round.unit_count, 30);
        assert_eq!(round.participants, vec![addr("a"), addr("b")]);
    }

    #[test]
    fn test_tie_keeps_previous_leader() {
        let mut round = Round::new(0, RoundParams::default());
        let mut scope = RoundScope::default();

        buy(&mut round, &mut scope, "a", 5, 100);
        buy(&mut round, &mut scope, "b", 5, 100);
        assert_eq!(round.leading_contributor, Some(addr("a")));

        // Cumulative spend counts
        buy(&mut round, &mut scope, "b", 1, 100);
        assert_eq!(round.leading_contributor, Some(addr("b")));
    }

    #[test]
    fn test_withdrawal_checks_in_order() {
        let params = RoundParams {
            game_duration: 100,
            winner_commission_percent: 10,
            ..Default::default()
        };
        let mut round = Round::new(0, params);
        let mut scope = RoundScope::default();
        buy(&mut round, &mut scope, "a", 10, 100);

        assert!(matches!(
            plan_prize_withdrawal(&round, 0, &addr("a"), 99),
            Err(MarketError::RoundNotFinished { index: 0, ends_at: 100 })
        ));
        assert!(matches!(
            plan_prize_withdrawal(&round, 0, &addr("b"), 100),
            Err(MarketError::NotWinner(_))
        ));

        let split = plan_prize_withdrawal(&round, 0, &addr("a"), 100).unwrap();
        assert_eq!(split.winner_payout, 900);
        assert_eq!(split.commission, 100);

        round.prize_redeemed = true;
        assert!(matches!(
            plan_prize_withdrawal(&round, 0, &addr("a"), 100),
            Err(MarketError::AlreadyRedeemed(0))
        ));
    }

    #[test]
    fn test_no_leader_means_no_winner() {
        let round = Round::new(0, RoundParams::default());
        assert!(matches!(
            plan_prize_withdrawal(&round, 0, &addr("a"), u64::MAX),
            Err(MarketError::NotWinner(_))
        ));
    }

    #[test]
    fn test_vault_take_zeroes() {
        let mut vault = CommissionVault::default();
        vault.credit(40).unwrap();
        vault.credit(2).unwrap();
        assert_eq!(vault.take(), 42);
        assert_eq!(vault.balance(), 0);
    }

    #[test]
    fn test_vault_overflow() {
        let mut vault = CommissionVault::default();
        vault.credit(u128::MAX).unwrap();
        assert!(vault.credit(1).is_err());
        assert_eq!(vault.balance(), u128::MAX);
    }
}
