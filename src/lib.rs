//! Round-based unit marketplace.
//!
//! Units are sold at a price that compounds over the life of a round. Resale
//! approvals are matched before anything new is minted; primary spend feeds
//! the round's prize, which the largest contributor redeems once it ends.

pub mod clock;
pub mod config;
pub mod errors;
pub mod market;
pub mod store;

use tracing_subscriber::EnvFilter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MarketConfig;
pub use errors::{ErrorKind, MarketError, MarketResult};
pub use market::engine::{BuyReceipt, Market, MarketState};
pub use market::registry::{MemoryRegistry, OwnershipRegistry, RegistryError};
pub use market::settlement::{PaymentError, PaymentSink, Payout, PayoutReason, RecordingSink};
pub use market::types::{Address, Round, RoundParams, UnitId, ZERO_ADDRESS};
pub use store::MarketStore;

/// Install the fmt subscriber, filtered by MARKET_LOG or RUST_LOG (default "info").
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = std::env::var("MARKET_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
