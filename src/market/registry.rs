//! Unit ownership ledger seam.
//!
//! The market never stores who owns which unit globally; it asks the
//! registry. `MemoryRegistry` is the in-process implementation used by
//! embedders without their own ledger and by the tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::market::types::{Address, UnitId};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown unit {0}")]
    UnknownUnit(UnitId),

    #[error("Unit id space exhausted")]
    Exhausted,

    #[error("Registry backend failure: {0}")]
    Backend(String),
}

pub trait OwnershipRegistry: Send {
    /// Create `count` new units owned by `owner`
    fn mint(&mut self, owner: &Address, count: u64) -> Result<Vec<UnitId>, RegistryError>;

    /// Move a unit to `new_owner`
    fn transfer(&mut self, id: UnitId, new_owner: &Address) -> Result<(), RegistryError>;

    fn balance_of(&self, owner: &Address) -> u64;

    fn owner_of(&self, id: UnitId) -> Option<Address>;
}

/// Sequential-id registry held in memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRegistry {
    owners: Vec<Address>,
    balances: HashMap<Address, u64>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> u64 {
        self.owners.len() as u64
    }
}

impl OwnershipRegistry for MemoryRegistry {
    fn mint(&mut self, owner: &Address, count: u64) -> Result<Vec<UnitId>, RegistryError> {
        let start = self.owners.len() as u64;
        let end = start.checked_add(count).ok_or(RegistryError::Exhausted)?;
        let len = usize::try_from(count).map_err(|_| RegistryError::Exhausted)?;

        // Reserve both up front so an oversized mint fails instead of aborting
        let mut ids = Vec::new();
        ids.try_reserve_exact(len)
            .map_err(|_| RegistryError::Exhausted)?;
        self.owners
            .try_reserve(len)
            .map_err(|_| RegistryError::Exhausted)?;

        ids.extend((start..end).map(UnitId));
        self.owners
            .extend(std::iter::repeat(owner.clone()).take(len));
        *self.balances.entry(owner.clone()).or_insert(0) += count;
        Ok(ids)
    }

    fn transfer(&mut self, id: UnitId, new_owner: &Address) -> Result<(), RegistryError> {
        let slot = self
            .owners
            .get_mut(id.0 as usize)
            .ok_or(RegistryError::UnknownUnit(id))?;
        let previous = std::mem::replace(slot, new_owner.clone());

        if let Some(bal) = self.balances.get_mut(&previous) {
            *bal = bal.saturating_sub(1);
            if *bal == 0 {
                self.balances.remove(&previous);
            }
        }
        *self.balances.entry(new_owner.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn balance_of(&self, owner: &Address) -> u64 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    fn owner_of(&self, id: UnitId) -> Option<Address> {
        self.owners.get(id.0 as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_assigns_sequential_ids() {
        let mut reg = MemoryRegistry::new();
        let alice = Address::from("alice");
        let bob = Address::from("bob");

        assert_eq!(reg.mint(&alice, 2).unwrap(), vec![UnitId(0), UnitId(1)]);
        assert_eq!(reg.mint(&bob, 1).unwrap(), vec![UnitId(2)]);
        assert_eq!(reg.balance_of(&alice), 2);
        assert_eq!(reg.owner_of(UnitId(2)), Some(bob));
        assert_eq!(reg.total_supply(), 3);
    }

    #[test]
    fn test_oversized_mint_is_refused() {
        let mut reg = MemoryRegistry::new();
        let alice = Address::from("alice");
        assert!(matches!(
            reg.mint(&alice, u64::MAX),
            Err(RegistryError::Exhausted)
        ));
        assert_eq!(reg.total_supply(), 0);
        assert_eq!(reg.balance_of(&alice), 0);

        reg.mint(&alice, 1).unwrap();
        assert!(matches!(
            reg.mint(&alice, u64::MAX),
            Err(RegistryError::Exhausted)
        ));
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut reg = MemoryRegistry::new();
        let alice = Address::from("alice");
        let bob = Address::from("bob");
        reg.mint(&alice, 1).unwrap();

        reg.transfer(UnitId(0), &bob).unwrap();
        assert_eq!(reg.balance_of(&alice), 0);
        assert_eq!(reg.balance_of(&bob), 1);
        assert_eq!(reg.owner_of(UnitId(0)), Some(bob));
    }

    #[test]
    fn test_transfer_unknown_unit() {
        let mut reg = MemoryRegistry::new();
        assert!(matches!(
            reg.transfer(UnitId(9), &Address::from("x")),
            Err(RegistryError::UnknownUnit(UnitId(9)))
        ));
    }
}
