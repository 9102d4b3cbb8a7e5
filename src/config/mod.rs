//! Market configuration
//!
//! Resolution order: environment, then TOML file, then built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::market::types::{Address, RoundParams};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Administrative owner: stages params, opens rounds, withdraws commission
    #[serde(default = "Address::zero")]
    pub owner: Address,

    /// Parameters staged for the first round
    #[serde(default)]
    pub params: RoundParams,

    /// Where `MarketStore` keeps its sled database
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            owner: Address::zero(),
            params: RoundParams::default(),
            data_dir: None,
        }
    }
}

/// Parse an env var, warning (and ignoring it) when malformed
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[CONFIG] ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

impl MarketConfig {
    /// Read a TOML file. A missing file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let cfg: MarketConfig =
            toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
        Ok(cfg)
    }

    /// File values overridden by the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::load_from(path)?.with_env_overrides())
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = env::var("MARKET_OWNER") {
            self.owner = Address::new(val.trim());
        }
        if let Some(v) = env_parse("MARKET_GAME_DURATION_SECS") {
            self.params.game_duration = v;
        }
        if let Some(v) = env_parse("MARKET_INITIAL_UNIT_PRICE") {
            self.params.initial_unit_price = v;
        }
        if let Some(v) = env_parse("MARKET_PRICE_STEP_SECS") {
            self.params.price_step_duration = v;
        }
        if let Some(v) = env_parse("MARKET_PRICE_STEP_PERCENT") {
            self.params.price_step_percent = v;
        }
        if let Some(v) = env_parse("MARKET_TRADE_COMMISSION_PERCENT") {
            self.params.trade_commission_percent = v;
        }
        if let Some(v) = env_parse("MARKET_WINNER_COMMISSION_PERCENT") {
            self.params.winner_commission_percent = v;
        }
        if let Ok(val) = env::var("MARKET_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(val));
        }

        if self.owner.is_zero() {
            warn!("[CONFIG] no owner configured; commission cannot be withdrawn");
        }
        self
    }
}
