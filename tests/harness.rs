#![allow(dead_code)]

use std::sync::Arc;

use round_market::{
    Address, ManualClock, Market, MarketConfig, MemoryRegistry, RecordingSink, RoundParams,
};

pub const START: u64 = 1_700_000_000;
pub const P: u128 = 1_000;
pub const DURATION: u64 = 1_000;
pub const STEP: u64 = 100;

pub struct Harness {
    pub market: Market,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
}

pub fn owner() -> Address {
    Address::from("0xowner")
}

pub fn addr(s: &str) -> Address {
    Address::from(s)
}

pub fn params() -> RoundParams {
    RoundParams {
        game_duration: DURATION,
        initial_unit_price: P,
        price_step_duration: STEP,
        price_step_percent: 10,
        trade_commission_percent: 10,
        winner_commission_percent: 20,
    }
}

pub fn spawn_market() -> Harness {
    spawn_market_with(params())
}

pub fn spawn_market_with(params: RoundParams) -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let sink = Arc::new(RecordingSink::new());
    let config = MarketConfig {
        owner: owner(),
        params,
        data_dir: None,
    };
    let market = Market::new(
        &config,
        Box::new(MemoryRegistry::new()),
        sink.clone(),
        clock.clone(),
    );
    Harness {
        market,
        clock,
        sink,
    }
}

/// Units held across `who` must equal units minted across all rounds, and
/// no round may have more for sale than it minted.
pub fn assert_supply_invariants(market: &Market, who: &[&str]) {
    let held: u64 = who.iter().map(|w| market.balance_of(&addr(w))).sum();
    let mut minted = 0;
    for i in 0..market.round_count() {
        let round = market.round_at(i).unwrap();
        assert!(
            round.unit_count_for_sale <= round.unit_count,
            "round {} has {} for sale of {}",
            i,
            round.unit_count_for_sale,
            round.unit_count
        );
        minted += round.unit_count;
    }
    assert_eq!(held, minted);
}
