// round-market: inspect (or initialize) a persisted market
//
//   MARKET_CONFIG  path to the TOML config (default market.toml)
//   MARKET_LOG     tracing filter (default info)

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use round_market::clock::{Clock, SystemClock};
use round_market::market::pricing;
use round_market::{init_tracing, MarketConfig, MarketState, MarketStore};

fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("MARKET_CONFIG").unwrap_or_else(|_| "market.toml".into());
    let config = MarketConfig::load(&config_path)?;
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("market-data"));

    let store = MarketStore::open(&data_dir)?;
    let now = SystemClock.now();

    let state = match store.load()? {
        Some(state) => state,
        None => {
            info!(
                "[MARKET] no saved state in {}, opening first round",
                data_dir.display()
            );
            let state = MarketState::new(config.params, now);
            store.save(&state)?;
            state
        }
    };

    let rounds = state.rounds();
    info!(
        "[MARKET] owner={} rounds={} vault={} unsettled={}",
        config.owner,
        rounds.len(),
        state.commission_vault(),
        state.unsettled().len()
    );
    if let Some(last) = rounds.rounds().last() {
        let index = rounds.len() - 1;
        if last.is_active(now) {
            info!(
                "[ROUNDS] round {} running until {}: price={} units={} for_sale={} prize={}",
                index,
                last.ends_at(),
                pricing::current_price(last, now)?,
                last.unit_count,
                last.unit_count_for_sale,
                last.prize_sum
            );
        } else {
            info!(
                "[ROUNDS] round {} ended at {}; next trade opens a new round",
                index,
                last.ends_at()
            );
        }
        if let Some(leader) = &last.leading_contributor {
            info!("[PRIZE] leading contributor {}", leader);
        }
    }
    Ok(())
}
