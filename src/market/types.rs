use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel address used for empty leaderboard slots
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Participant address (opaque, compared bytewise)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single unit in the ownership registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Parameters snapshotted into a round when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundParams {
    /// Round length in seconds
    pub game_duration: u64,
    /// Price of one unit at stage 0 (smallest payment units)
    pub initial_unit_price: u128,
    /// Seconds per price stage
    pub price_step_duration: u64,
    /// Compounding increase per stage, in percent
    pub price_step_percent: u32,
    /// Cut taken from every resale, in percent
    pub trade_commission_percent: u8,
    /// Cut taken from the winner's prize, in percent
    pub winner_commission_percent: u8,
}

impl Default for RoundParams {
    fn default() -> Self {
        Self {
            game_duration: 30 * 86_400,
            // 0.01 coin at 18 decimals
            initial_unit_price: 10_000_000_000_000_000,
            price_step_duration: 86_400,
            price_step_percent: 10,
            trade_commission_percent: 5,
            winner_commission_percent: 10,
        }
    }
}

/// Apply `100 - percent` to an amount. Percentages above 100 leave nothing.
pub(crate) fn net_of_percent(amount: u128, percent: u8) -> Option<u128> {
    let keep = 100u128.saturating_sub(percent as u128);
    amount.checked_mul(keep).map(|v| v / 100)
}

/// One trading period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub created_at: u64,
    pub unit_count: u64,
    pub unit_count_for_sale: u64,
    pub prize_sum: u128,
    pub leading_contributor: Option<Address>,
    pub prize_redeemed: bool,
    pub participants: Vec<Address>,
    pub params: RoundParams,
}

impl Round {
    pub fn new(created_at: u64, params: RoundParams) -> Self {
        Self {
            created_at,
            unit_count: 0,
            unit_count_for_sale: 0,
            prize_sum: 0,
            leading_contributor: None,
            prize_redeemed: false,
            participants: Vec::new(),
            params,
        }
    }

    pub fn ends_at(&self) -> u64 {
        self.created_at.saturating_add(self.params.game_duration)
    }

    pub fn is_active(&self, now: u64) -> bool {
        now < self.ends_at()
    }

    pub fn has_ended(&self, now: u64) -> bool {
        !self.is_active(now)
    }

    pub(crate) fn add_participant(&mut self, who: &Address) {
        if !self.participants.contains(who) {
            self.participants.push(who.clone());
        }
    }
}
