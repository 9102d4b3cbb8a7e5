//! Unit price curve: compounding step increases over round-elapsed time.

use crate::errors::{MarketError, MarketResult};
use crate::market::types::{Round, RoundParams};

/// Number of completed price steps since `created_at`
pub fn stage(params: &RoundParams, created_at: u64, now: u64) -> u64 {
    if params.price_step_duration == 0 {
        return 0;
    }
    now.saturating_sub(created_at) / params.price_step_duration
}

/// Unit price at `now` for a round created at `created_at`
///
/// price_0 = initial_unit_price, price_{k+1} = price_k + price_k * step_percent / 100
pub fn price_at(params: &RoundParams, created_at: u64, now: u64) -> MarketResult<u128> {
    let stages = stage(params, created_at, now);
    let percent = params.price_step_percent as u128;
    let mut price = params.initial_unit_price;

    for _ in 0..stages {
        let step = price
            .checked_mul(percent)
            .ok_or(MarketError::Overflow("price compounding"))?
            / 100;
        // Flat from here on
        if step == 0 {
            break;
        }
        price = price
            .checked_add(step)
            .ok_or(MarketError::Overflow("price compounding"))?;
    }

    Ok(price)
}

pub fn current_price(round: &Round, now: u64) -> MarketResult<u128> {
    price_at(&round.params, round.created_at, now)
}
