//! Top-K holders by balance.
//!
//! Kept sorted on every balance change (O(log n) per update) so `top(k)` only
//! walks the first k entries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{MarketError, MarketResult};
use crate::market::types::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct HolderEntry {
    balance: u64,
    first_seen: u64,
}

/// Ranking key: balance descending, then earliest first seen
#[derive(Debug, Clone, PartialEq, Eq)]
struct RankKey {
    balance: u64,
    first_seen: u64,
    address: Address,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .balance
            .cmp(&self.balance)
            .then(self.first_seen.cmp(&other.first_seen))
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Leaderboard {
    holders: BTreeMap<Address, HolderEntry>,
    next_seen: u64,
    #[serde(skip)]
    ranking: BTreeSet<RankKey>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ranking after deserialization
    pub(crate) fn reindex(&mut self) {
        self.ranking = self
            .holders
            .iter()
            .filter(|(_, e)| e.balance > 0)
            .map(|(addr, e)| RankKey {
                balance: e.balance,
                first_seen: e.first_seen,
                address: addr.clone(),
            })
            .collect();
    }

    /// Number of holders with a non-zero balance
    pub fn holder_count(&self) -> usize {
        self.ranking.len()
    }

    /// Record `holder`'s new balance. Zero balances drop out of the ranking
    /// but the holder keeps its first-seen position.
    pub fn record_balance(&mut self, holder: &Address, balance: u64) {
        let next_seen = self.next_seen;
        let entry = self.holders.entry(holder.clone()).or_insert_with(|| HolderEntry {
            balance: 0,
            first_seen: next_seen,
        });
        if entry.first_seen == next_seen {
            self.next_seen += 1;
        }

        if entry.balance > 0 {
            self.ranking.remove(&RankKey {
                balance: entry.balance,
                first_seen: entry.first_seen,
                address: holder.clone(),
            });
        }
        entry.balance = balance;
        if balance > 0 {
            self.ranking.insert(RankKey {
                balance,
                first_seen: entry.first_seen,
                address: holder.clone(),
            });
        }
    }

    /// Top `k` holders; empty slots hold the zero address with balance 0
    pub fn top(&self, k: usize) -> MarketResult<(Vec<Address>, Vec<u64>)> {
        if k == 0 {
            return Err(MarketError::InvalidTopSize);
        }

        let mut addresses = Vec::with_capacity(k);
        let mut balances = Vec::with_capacity(k);
        for key in self.ranking.iter().take(k) {
            addresses.push(key.address.clone());
            balances.push(key.balance);
        }
        addresses.resize(k, Address::zero());
        balances.resize(k, 0);

        Ok((addresses, balances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    #[test]
    fn test_top_zero_rejected() {
        let board = Leaderboard::new();
        assert!(matches!(board.top(0), Err(MarketError::InvalidTopSize)));
    }

    #[test]
    fn test_empty_board_fills_sentinels() {
        let board = Leaderboard::new();
        let (addresses, balances) = board.top(2).unwrap();
        assert_eq!(addresses, vec![Address::zero(), Address::zero()]);
        assert_eq!(balances, vec![0, 0]);
    }

    #[test]
    fn test_top_two_of_three() {
        let mut board = Leaderboard::new();
        board.record_balance(&addr("a"), 10);
        board.record_balance(&addr("b"), 20);
        board.record_balance(&addr("c"), 30);

        let (addresses, balances) = board.top(2).unwrap();
        assert_eq!(addresses, vec![addr("c"), addr("b")]);
        assert_eq!(balances, vec![30, 20]);
    }

    #[test]
    fn test_ties_go_to_first_seen() {
        let mut board = Leaderboard::new();
        board.record_balance(&addr("zed"), 5);
        board.record_balance(&addr("amy"), 5);

        let (addresses, _) = board.top(2).unwrap();
        assert_eq!(addresses, vec![addr("zed"), addr("amy")]);
    }

    #[test]
    fn test_updates_reorder() {
        let mut board = Leaderboard::new();
        board.record_balance(&addr("a"), 5);
        board.record_balance(&addr("b"), 3);
        board.record_balance(&addr("a"), 1);

        let (addresses, balances) = board.top(3).unwrap();
        assert_eq!(addresses, vec![addr("b"), addr("a"), Address::zero()]);
        assert_eq!(balances, vec![3, 1, 0]);
    }

    #[test]
    fn test_zero_balance_leaves_and_returns_in_place() {
        let mut board = Leaderboard::new();
        board.record_balance(&addr("a"), 2);
        board.record_balance(&addr("b"), 2);
        board.record_balance(&addr("a"), 0);
        assert_eq!(board.holder_count(), 1);

        board.record_balance(&addr("a"), 2);
        let (addresses, _) = board.top(2).unwrap();
        assert_eq!(addresses, vec![addr("a"), addr("b")]);
    }

    #[test]
    fn test_reindex_after_deserialize() {
        let mut board = Leaderboard::new();
        board.record_balance(&addr("a"), 4);
        board.record_balance(&addr("b"), 9);

        let json = serde_json::to_string(&board).unwrap();
        let mut restored: Leaderboard = serde_json::from_str(&json).unwrap();
        restored.reindex();
        assert_eq!(restored.top(2).unwrap(), board.top(2).unwrap());
    }
}
