// Market Store: sled-backed persistence for the engine state
//
// Storage format:
//   Tree: "market_state"
//   Keys: "rounds", "scopes", "pending_params", "commission_vault",
//         "approvals", "leaderboard", "unsettled"
//   Values: JSON (u128 amounts kept exact)

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

use crate::market::engine::MarketState;
use crate::market::rounds::RoundBook;
use crate::market::settlement::Payout;
use crate::market::types::Round;

const MARKET_TREE: &str = "market_state";

const KEY_ROUNDS: &str = "rounds";
const KEY_SCOPES: &str = "scopes";
const KEY_PENDING: &str = "pending_params";
const KEY_VAULT: &str = "commission_vault";
const KEY_APPROVALS: &str = "approvals";
const KEY_LEADERBOARD: &str = "leaderboard";
const KEY_UNSETTLED: &str = "unsettled";

pub struct MarketStore {
    db: Db,
}

impl MarketStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open (or create) the database under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let db = sled::open(dir)
            .with_context(|| format!("opening store at {}", dir.display()))?;
        Ok(Self::new(db))
    }

    fn tree(&self) -> Result<Tree> {
        Ok(self.db.open_tree(MARKET_TREE)?)
    }

    fn write<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).with_context(|| format!("encoding {}", key))?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decoding {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn require<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<T> {
        Self::read(tree, key)?
            .ok_or_else(|| anyhow::anyhow!("market state missing key {}", key))
    }

    /// Persist the full engine state and flush
    pub fn save(&self, state: &MarketState) -> Result<()> {
        let tree = self.tree()?;
        let rounds = state.rounds();

        Self::write(&tree, KEY_ROUNDS, &rounds.rounds())?;
        Self::write(&tree, KEY_SCOPES, &rounds.scopes())?;
        Self::write(&tree, KEY_PENDING, rounds.pending())?;
        Self::write(&tree, KEY_VAULT, &state.vault)?;
        Self::write(&tree, KEY_APPROVALS, &state.sell_queue)?;
        Self::write(&tree, KEY_LEADERBOARD, &state.leaderboard)?;
        Self::write(&tree, KEY_UNSETTLED, &state.unsettled)?;
        tree.flush()?;

        tracing::debug!(
            "[STORE] saved market state: rounds={} vault={}",
            rounds.len(),
            state.vault.balance()
        );
        Ok(())
    }

    /// Load the engine state, or `None` if nothing was ever saved
    pub fn load(&self) -> Result<Option<MarketState>> {
        let tree = self.tree()?;
        let Some(rounds) = Self::read::<Vec<Round>>(&tree, KEY_ROUNDS)? else {
            return Ok(None);
        };

        let state = MarketState {
            rounds: RoundBook::from_parts(
                rounds,
                Self::require(&tree, KEY_SCOPES)?,
                Self::require(&tree, KEY_PENDING)?,
            ),
            vault: Self::require(&tree, KEY_VAULT)?,
            sell_queue: Self::require(&tree, KEY_APPROVALS)?,
            leaderboard: Self::require(&tree, KEY_LEADERBOARD)?,
            // Absent in stores written before payouts could be parked
            unsettled: Self::read::<Vec<Payout>>(&tree, KEY_UNSETTLED)?.unwrap_or_default(),
        };

        tracing::info!("[STORE] loaded market state: rounds={}", state.rounds().len());
        Ok(Some(state))
    }
}
