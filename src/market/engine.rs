use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MarketConfig;
use crate::errors::{MarketError, MarketResult};
use crate::market::leaderboard::Leaderboard;
use crate::market::pricing;
use crate::market::prize::{self, CommissionVault, PrimaryPurchase};
use crate::market::registry::OwnershipRegistry;
use crate::market::rounds::{RoundBook, RoundScope};
use crate::market::sell_queue::{Fill, SellQueue};
use crate::market::settlement::{self, PaymentSink, Payout, PayoutReason};
use crate::market::types::{Address, Round, RoundParams, UnitId};

/// Everything the engine owns, in one serializable value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub(crate) rounds: RoundBook,
    pub(crate) sell_queue: SellQueue,
    pub(crate) vault: CommissionVault,
    pub(crate) leaderboard: Leaderboard,
    /// Payouts refused after their operation committed, oldest first
    #[serde(default)]
    pub(crate) unsettled: Vec<Payout>,
}

impl MarketState {
    pub fn new(params: RoundParams, now: u64) -> Self {
        Self {
            rounds: RoundBook::new(params, now),
            sell_queue: SellQueue::new(),
            vault: CommissionVault::default(),
            leaderboard: Leaderboard::new(),
            unsettled: Vec::new(),
        }
    }

    pub fn rounds(&self) -> &RoundBook {
        &self.rounds
    }

    pub fn commission_vault(&self) -> u128 {
        self.vault.balance()
    }

    pub fn unsettled(&self) -> &[Payout] {
        &self.unsettled
    }

    /// Rebuild in-memory indexes that are not serialized
    pub(crate) fn reindex(&mut self) {
        self.sell_queue.reindex();
        self.leaderboard.reindex();
    }
}

/// Outcome of a successful `buy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyReceipt {
    pub round_index: usize,
    pub unit_price: u128,
    /// Units transferred to the buyer (resale + minted)
    pub units_bought: u64,
    pub from_sellers: u64,
    pub minted: u64,
    /// `units_bought * unit_price`
    pub spent: u128,
    /// Unspent remainder of the payment, left for the caller to settle
    pub change: u128,
    /// Seller payouts the sink refused after the buy committed. They are
    /// also kept on the market for `retry_unsettled`.
    pub unsettled: Vec<Payout>,
}

struct Inner {
    state: MarketState,
    registry: Box<dyn OwnershipRegistry>,
}

/// Round engine. Every operation runs to completion under one lock:
/// validate and plan, dry-run payouts, commit, then pay.
pub struct Market {
    owner: Address,
    inner: Mutex<Inner>,
    payments: Arc<dyn PaymentSink>,
    clock: Arc<dyn Clock>,
}

impl Market {
    /// Open a market whose first round starts now
    pub fn new(
        config: &MarketConfig,
        registry: Box<dyn OwnershipRegistry>,
        payments: Arc<dyn PaymentSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = MarketState::new(config.params, clock.now());
        Self::with_state(config.owner.clone(), state, registry, payments, clock)
    }

    /// Resume from a previously saved state
    pub fn with_state(
        owner: Address,
        mut state: MarketState,
        registry: Box<dyn OwnershipRegistry>,
        payments: Arc<dyn PaymentSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        state.reindex();
        info!(
            "[MARKET] ready: owner={} rounds={} vault={}",
            owner,
            state.rounds.len(),
            state.vault.balance()
        );
        Self {
            owner,
            inner: Mutex::new(Inner { state, registry }),
            payments,
            clock,
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// The zero address never owns the market, even when configured as owner
    fn ensure_owner(&self, caller: &Address) -> MarketResult<()> {
        if self.owner.is_zero() || caller != &self.owner {
            return Err(MarketError::NotOwner(caller.clone()));
        }
        Ok(())
    }

    /// Buy as many units as `payment` covers at the current price.
    ///
    /// Approved resale units are consumed first (the buyer's own are
    /// skipped); the rest is minted and feeds the round's prize.
    pub fn buy(&self, buyer: &Address, payment: u128) -> MarketResult<BuyReceipt> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Inner { state, registry } = &mut *inner;

        let (round_index, staged) = state.rounds.resolve_active(now);
        let round_view = match &staged {
            Some(r) => r,
            None => state.rounds.round(round_index)?,
        };

        let unit_price = pricing::current_price(round_view, now)?;
        let quantity = payment
            .checked_div(unit_price)
            .ok_or(MarketError::ZeroUnitPrice(round_index))?;
        let quantity =
            u64::try_from(quantity).map_err(|_| MarketError::Overflow("purchase quantity"))?;
        if quantity == 0 {
            return Err(MarketError::ZeroQuantityPurchase {
                payment,
                unit_price,
            });
        }

        let fills = state.sell_queue.plan_fills(
            round_index,
            buyer,
            quantity,
            unit_price,
            round_view.params.trade_commission_percent,
        )?;
        let from_sellers: u64 = fills.iter().map(|f| f.quantity).sum();
        let minted = quantity - from_sellers;

        let primary = if minted > 0 {
            let empty_scope = RoundScope::default();
            let scope = if staged.is_some() {
                &empty_scope
            } else {
                state.rounds.scope(round_index)?
            };
            Some(prize::plan_primary_purchase(
                round_view, scope, buyer, minted, unit_price,
            )?)
        } else {
            None
        };

        let commission = sum_commission(&fills)?;
        state.vault.preview_credit(commission)?;
        let spent = unit_price
            .checked_mul(quantity as u128)
            .ok_or(MarketError::Overflow("purchase cost"))?;

        let payouts = resale_payouts(&fills, round_index);
        settlement::check_all(self.payments.as_ref(), &payouts)?;

        // Commit
        let minted_ids = if minted > 0 {
            registry.mint(buyer, minted)?
        } else {
            Vec::new()
        };
        if staged.is_some() {
            state.rounds.open_round(now);
        }
        let touched = commit_fills(state, &mut **registry, round_index, buyer, &fills)?;
        state.vault.credit(commission)?;
        if let Some(plan) = &primary {
            commit_primary(state, round_index, buyer, minted_ids, plan)?;
        }
        let (round, _) = state.rounds.entry_mut(round_index)?;
        round.add_participant(buyer);

        refresh_balances(state, &**registry, buyer, &touched);

        info!(
            "[MARKET] buy: buyer={} round={} price={} units={} (resale={} minted={})",
            buyer, round_index, unit_price, quantity, from_sellers, minted
        );

        let unsettled = settle(self.payments.as_ref(), state, &payouts);

        Ok(BuyReceipt {
            round_index,
            unit_price,
            units_bought: quantity,
            from_sellers,
            minted,
            spent,
            change: payment - spent,
            unsettled,
        })
    }

    /// Buy up to `requested` units from sellers only, at the current price.
    /// Never mints; returns how many were filled.
    pub fn buy_from_sellers(&self, buyer: &Address, requested: u64) -> MarketResult<u64> {
        if requested == 0 {
            return Err(MarketError::ZeroQuantityRequested);
        }

        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Inner { state, registry } = &mut *inner;

        let (round_index, staged) = state.rounds.resolve_active(now);
        let round_view = match &staged {
            Some(r) => r,
            None => state.rounds.round(round_index)?,
        };
        let unit_price = pricing::current_price(round_view, now)?;

        let fills = state.sell_queue.plan_fills(
            round_index,
            buyer,
            requested,
            unit_price,
            round_view.params.trade_commission_percent,
        )?;
        let filled: u64 = fills.iter().map(|f| f.quantity).sum();
        let commission = sum_commission(&fills)?;
        state.vault.preview_credit(commission)?;

        let payouts = resale_payouts(&fills, round_index);
        settlement::check_all(self.payments.as_ref(), &payouts)?;

        // Commit
        if staged.is_some() {
            state.rounds.open_round(now);
        }
        let touched = commit_fills(state, &mut **registry, round_index, buyer, &fills)?;
        state.vault.credit(commission)?;
        if filled > 0 {
            let (round, _) = state.rounds.entry_mut(round_index)?;
            round.add_participant(buyer);
            refresh_balances(state, &**registry, buyer, &touched);
        }

        info!(
            "[MARKET] resale buy: buyer={} round={} requested={} filled={}",
            buyer, round_index, requested, filled
        );

        settle(self.payments.as_ref(), state, &payouts);
        Ok(filled)
    }

    /// Put `quantity` of the caller's unsold units in the active round up for sale
    pub fn approve_to_sell(&self, holder: &Address, quantity: u64) -> MarketResult<u64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let state = &mut inner.state;

        let (round_index, staged) = state.rounds.resolve_active(now);
        if staged.is_some() {
            // A round that has not opened yet holds nothing
            if quantity == 0 {
                return Err(MarketError::InvalidQuantity);
            }
            return Err(MarketError::InsufficientUnsoldBalance {
                requested: quantity,
                available: 0,
            });
        }

        let (round, scope) = state.rounds.entry_mut(round_index)?;
        let balance = scope.balance_of(holder);
        state
            .sell_queue
            .approve(round, round_index, holder, quantity, balance)
    }

    /// Take `quantity` units of the caller back off the market
    pub fn disapprove_to_sell(&self, holder: &Address, quantity: u64) -> MarketResult<u64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let state = &mut inner.state;

        let (round_index, staged) = state.rounds.resolve_active(now);
        if staged.is_some() {
            if quantity == 0 {
                return Err(MarketError::InvalidQuantity);
            }
            return Err(MarketError::InsufficientApprovedBalance {
                requested: quantity,
                approved: 0,
            });
        }

        let round = state.rounds.round_mut(round_index)?;
        state
            .sell_queue
            .disapprove(round, round_index, holder, quantity)
    }

    /// Redeem the prize of an ended round. Only the leading contributor may
    /// call this, once.
    pub fn withdraw_prize(&self, round_index: usize, caller: &Address) -> MarketResult<u128> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let state = &mut inner.state;

        let round = state.rounds.round(round_index)?;
        let split = prize::plan_prize_withdrawal(round, round_index, caller, now)?;
        state.vault.preview_credit(split.commission)?;

        let payout = Payout {
            to: caller.clone(),
            amount: split.winner_payout,
            reason: PayoutReason::Prize { round: round_index },
        };
        self.payments.check(&payout)?;

        state.rounds.round_mut(round_index)?.prize_redeemed = true;
        state.vault.credit(split.commission)?;
        info!(
            "[PRIZE] round {} redeemed by {}: payout={} commission={}",
            round_index, caller, split.winner_payout, split.commission
        );

        if split.winner_payout > 0 {
            settle(self.payments.as_ref(), state, std::slice::from_ref(&payout));
        }
        Ok(split.winner_payout)
    }

    /// Owner-only: drain the commission vault
    pub fn withdraw_commission(&self, caller: &Address) -> MarketResult<u128> {
        self.ensure_owner(caller)?;
        let mut inner = self.inner.lock();
        let state = &mut inner.state;

        let amount = state.vault.balance();
        if amount == 0 {
            return Err(MarketError::NothingToWithdraw);
        }
        let payout = Payout {
            to: caller.clone(),
            amount,
            reason: PayoutReason::Commission,
        };
        self.payments.check(&payout)?;

        state.vault.take();
        info!("[VAULT] commission withdrawn: {} to {}", amount, caller);

        settle(self.payments.as_ref(), state, std::slice::from_ref(&payout));
        Ok(amount)
    }

    /// Owner-only: stage parameters for the next round
    pub fn update_pending_params(&self, caller: &Address, params: RoundParams) -> MarketResult<()> {
        self.ensure_owner(caller)?;
        if params.game_duration == 0 || params.initial_unit_price == 0 {
            warn!("[ROUNDS] staging degenerate params: {:?}", params);
        }
        self.inner.lock().state.rounds.update_pending(params);
        Ok(())
    }

    /// Owner-only: open a new round now, even if the current one is running
    pub fn start_new_round(&self, caller: &Address) -> MarketResult<usize> {
        self.ensure_owner(caller)?;
        let now = self.clock.now();
        Ok(self.inner.lock().state.rounds.open_round(now))
    }

    /// Payouts still owed after a post-commit refusal
    pub fn unsettled_payouts(&self) -> Vec<Payout> {
        self.inner.lock().state.unsettled.clone()
    }

    /// Attempt every unsettled payout again. Returns those still refused.
    pub fn retry_unsettled(&self) -> Vec<Payout> {
        let mut inner = self.inner.lock();
        let pending = std::mem::take(&mut inner.state.unsettled);
        if pending.is_empty() {
            return pending;
        }
        let failed = settlement::pay_all(self.payments.as_ref(), &pending);
        info!(
            "[SETTLE] retried {} unsettled payouts, {} still refused",
            pending.len(),
            failed.len()
        );
        inner.state.unsettled = failed.clone();
        failed
    }

    pub fn balance_of(&self, who: &Address) -> u64 {
        self.inner.lock().registry.balance_of(who)
    }

    /// Units `who` has approved for sale in the active round
    pub fn balance_selling_of(&self, who: &Address) -> u64 {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state.rounds.resolve_active(now) {
            (index, None) => inner.state.sell_queue.approved_of(index, who),
            (_, Some(_)) => 0,
        }
    }

    pub fn owner_of(&self, id: UnitId) -> Option<Address> {
        self.inner.lock().registry.owner_of(id)
    }

    /// Unit price in the active round (a fresh round's base price if the
    /// last one has expired)
    pub fn current_price(&self) -> MarketResult<u128> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state.rounds.resolve_active(now) {
            (_, Some(staged)) => pricing::current_price(&staged, now),
            (index, None) => pricing::current_price(inner.state.rounds.round(index)?, now),
        }
    }

    pub fn top(&self, k: usize) -> MarketResult<(Vec<Address>, Vec<u64>)> {
        self.inner.lock().state.leaderboard.top(k)
    }

    pub fn round_count(&self) -> usize {
        self.inner.lock().state.rounds.len()
    }

    pub fn round_at(&self, index: usize) -> MarketResult<Round> {
        self.inner.lock().state.rounds.round(index).cloned()
    }

    pub fn pending_params(&self) -> RoundParams {
        *self.inner.lock().state.rounds.pending()
    }

    pub fn commission_vault(&self) -> u128 {
        self.inner.lock().state.vault.balance()
    }

    /// Copy of the engine state for persistence
    pub fn snapshot(&self) -> MarketState {
        self.inner.lock().state.clone()
    }

    /// Replace the engine state. The registry must already match it.
    pub fn restore(&self, mut state: MarketState) {
        state.reindex();
        let mut inner = self.inner.lock();
        inner.state = state;
        info!("[MARKET] state restored: rounds={}", inner.state.rounds.len());
    }
}

/// Pay a committed batch, parking refusals on the state. Returns the refusals.
fn settle(sink: &dyn PaymentSink, state: &mut MarketState, payouts: &[Payout]) -> Vec<Payout> {
    let failed = settlement::pay_all(sink, payouts);
    state.unsettled.extend(failed.iter().cloned());
    failed
}

fn sum_commission(fills: &[Fill]) -> MarketResult<u128> {
    fills.iter().try_fold(0u128, |acc, f| {
        acc.checked_add(f.commission)
            .ok_or(MarketError::Overflow("resale commission"))
    })
}

fn resale_payouts(fills: &[Fill], round_index: usize) -> Vec<Payout> {
    fills
        .iter()
        .filter(|f| f.payout > 0)
        .map(|f| Payout {
            to: f.seller.clone(),
            amount: f.payout,
            reason: PayoutReason::Resale { round: round_index },
        })
        .collect()
}

/// Move planned resale units to the buyer. Returns the sellers touched.
fn commit_fills(
    state: &mut MarketState,
    registry: &mut dyn OwnershipRegistry,
    round_index: usize,
    buyer: &Address,
    fills: &[Fill],
) -> MarketResult<Vec<Address>> {
    let mut sellers = Vec::with_capacity(fills.len());
    for fill in fills {
        let (round, scope) = state.rounds.entry_mut(round_index)?;
        for id in scope.peek_units(&fill.seller, fill.quantity) {
            registry.transfer(id, buyer)?;
            scope.move_unit(id, &fill.seller, buyer);
        }
        state.sell_queue.apply_fill(round, round_index, fill);
        debug!(
            "[SELL] {} sold {} to {} (payout={} commission={})",
            fill.seller, fill.quantity, buyer, fill.payout, fill.commission
        );
        sellers.push(fill.seller.clone());
    }
    Ok(sellers)
}

fn commit_primary(
    state: &mut MarketState,
    round_index: usize,
    buyer: &Address,
    minted_ids: Vec<UnitId>,
    plan: &PrimaryPurchase,
) -> MarketResult<()> {
    let (round, scope) = state.rounds.entry_mut(round_index)?;
    scope.add_units(buyer, minted_ids);
    prize::apply_primary_purchase(round, scope, buyer, plan);
    Ok(())
}

fn refresh_balances(
    state: &mut MarketState,
    registry: &dyn OwnershipRegistry,
    buyer: &Address,
    sellers: &[Address],
) {
    let mut seen = BTreeSet::new();
    for who in std::iter::once(buyer).chain(sellers.iter()) {
        if seen.insert(who.clone()) {
            state
                .leaderboard
                .record_balance(who, registry.balance_of(who));
        }
    }
}
