//! Round lifecycle: the append-only round list, staged parameters for the
//! next round, and the per-round holdings used for resale approvals.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::errors::{MarketError, MarketResult};
use crate::market::types::{Address, Round, RoundParams, UnitId};

/// Units held and primary spend per holder, restricted to one round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundScope {
    units: BTreeMap<Address, BTreeSet<UnitId>>,
    contributions: BTreeMap<Address, u128>,
}

impl RoundScope {
    pub fn balance_of(&self, holder: &Address) -> u64 {
        self.units.get(holder).map(|s| s.len() as u64).unwrap_or(0)
    }

    pub fn contribution_of(&self, holder: &Address) -> u128 {
        self.contributions.get(holder).copied().unwrap_or(0)
    }

    /// Lowest `count` unit ids held by `holder` in this round
    pub fn peek_units(&self, holder: &Address, count: u64) -> Vec<UnitId> {
        self.units
            .get(holder)
            .map(|s| s.iter().take(count as usize).copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn add_units(&mut self, holder: &Address, ids: impl IntoIterator<Item = UnitId>) {
        self.units.entry(holder.clone()).or_default().extend(ids);
    }

    pub(crate) fn move_unit(&mut self, id: UnitId, from: &Address, to: &Address) {
        if let Some(set) = self.units.get_mut(from) {
            set.remove(&id);
            if set.is_empty() {
                self.units.remove(from);
            }
        }
        self.units.entry(to.clone()).or_default().insert(id);
    }

    pub(crate) fn set_contribution(&mut self, holder: &Address, total: u128) {
        self.contributions.insert(holder.clone(), total);
    }
}

/// Ordered rounds plus the parameters the next one will be created with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundBook {
    rounds: Vec<Round>,
    scopes: Vec<RoundScope>,
    pending: RoundParams,
}

impl RoundBook {
    /// Start the book with its first round open at `now`
    pub fn new(params: RoundParams, now: u64) -> Self {
        let mut book = Self {
            rounds: Vec::new(),
            scopes: Vec::new(),
            pending: params,
        };
        book.open_round(now);
        book
    }

    pub(crate) fn from_parts(
        rounds: Vec<Round>,
        scopes: Vec<RoundScope>,
        pending: RoundParams,
    ) -> Self {
        let mut scopes = scopes;
        scopes.resize_with(rounds.len(), RoundScope::default);
        Self {
            rounds,
            scopes,
            pending,
        }
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn scopes(&self) -> &[RoundScope] {
        &self.scopes
    }

    pub fn pending(&self) -> &RoundParams {
        &self.pending
    }

    pub fn round(&self, index: usize) -> MarketResult<&Round> {
        self.rounds.get(index).ok_or(MarketError::RoundNotFound(index))
    }

    pub(crate) fn round_mut(&mut self, index: usize) -> MarketResult<&mut Round> {
        self.rounds
            .get_mut(index)
            .ok_or(MarketError::RoundNotFound(index))
    }

    pub fn scope(&self, index: usize) -> MarketResult<&RoundScope> {
        self.scopes.get(index).ok_or(MarketError::RoundNotFound(index))
    }

    /// Round and scope of the same index, mutably
    pub(crate) fn entry_mut(
        &mut self,
        index: usize,
    ) -> MarketResult<(&mut Round, &mut RoundScope)> {
        match (self.rounds.get_mut(index), self.scopes.get_mut(index)) {
            (Some(r), Some(s)) => Ok((r, s)),
            _ => Err(MarketError::RoundNotFound(index)),
        }
    }

    /// The round a trade at `now` lands in, without creating anything.
    ///
    /// Returns `(index, None)` when the last round is still running, or
    /// `(index, Some(round))` with the round that would be opened.
    pub fn resolve_active(&self, now: u64) -> (usize, Option<Round>) {
        match self.rounds.last() {
            Some(last) if last.is_active(now) => (self.rounds.len() - 1, None),
            _ => (self.rounds.len(), Some(Round::new(now, self.pending))),
        }
    }

    /// Index of the active round, opening a new one if the last has expired.
    ///
    /// At most one round is appended per call: every caller that arrives
    /// after the expiry converges on the same new round.
    pub fn active_index(&mut self, now: u64) -> usize {
        match self.resolve_active(now) {
            (index, None) => index,
            (_, Some(_)) => self.open_round(now),
        }
    }

    /// Append a round built from the staged parameters
    pub(crate) fn open_round(&mut self, now: u64) -> usize {
        self.rounds.push(Round::new(now, self.pending));
        self.scopes.push(RoundScope::default());
        let index = self.rounds.len() - 1;
        info!(
            "[ROUNDS] opened round {} at {} (duration={}s, initial_price={})",
            index, now, self.pending.game_duration, self.pending.initial_unit_price
        );
        index
    }

    /// Stage parameters for the next round. The running round keeps its snapshot.
    pub(crate) fn update_pending(&mut self, params: RoundParams) {
        self.pending = params;
        info!("[ROUNDS] staged params for next round: {:?}", params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(duration: u64) -> RoundParams {
        RoundParams {
            game_duration: duration,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_round_opens_on_creation() {
        let book = RoundBook::new(params(100), 50);
        assert_eq!(book.len(), 1);
        assert_eq!(book.round(0).unwrap().created_at, 50);
    }

    #[test]
    fn test_active_round_kept_while_running() {
        let mut book = RoundBook::new(params(100), 0);
        assert_eq!(book.active_index(99), 0);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_rollover_creates_exactly_one_round() {
        let mut book = RoundBook::new(params(100), 0);
        assert_eq!(book.active_index(100), 1);
        assert_eq!(book.active_index(100), 1);
        assert_eq!(book.active_index(150), 1);
        assert_eq!(book.len(), 2);
        assert_eq!(book.round(1).unwrap().created_at, 100);
    }

    #[test]
    fn test_resolve_does_not_mutate() {
        let book = RoundBook::new(params(10), 0);
        let (index, staged) = book.resolve_active(20);
        assert_eq!(index, 1);
        assert_eq!(staged.unwrap().created_at, 20);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_pending_params_apply_to_next_round_only() {
        let mut book = RoundBook::new(params(100), 0);
        book.update_pending(RoundParams {
            game_duration: 1,
            initial_unit_price: 2,
            price_step_duration: 3,
            price_step_percent: 4,
            trade_commission_percent: 5,
            winner_commission_percent: 6,
        });
        assert_eq!(book.round(0).unwrap().params.game_duration, 100);

        let idx = book.active_index(100);
        let p = book.round(idx).unwrap().params;
        assert_eq!(
            (p.game_duration, p.initial_unit_price, p.price_step_duration),
            (1, 2, 3)
        );
        assert_eq!(
            (
                p.price_step_percent,
                p.trade_commission_percent,
                p.winner_commission_percent
            ),
            (4, 5, 6)
        );
    }

    #[test]
    fn test_round_not_found() {
        let book = RoundBook::new(params(100), 0);
        assert!(matches!(book.round(3), Err(MarketError::RoundNotFound(3))));
    }

    #[test]
    fn test_scope_moves_units() {
        let mut scope = RoundScope::default();
        let alice = Address::from("alice");
        let bob = Address::from("bob");
        scope.add_units(&alice, [UnitId(4), UnitId(1), UnitId(7)]);
        assert_eq!(scope.peek_units(&alice, 2), vec![UnitId(1), UnitId(4)]);

        scope.move_unit(UnitId(1), &alice, &bob);
        assert_eq!(scope.balance_of(&alice), 2);
        assert_eq!(scope.balance_of(&bob), 1);
    }
}
