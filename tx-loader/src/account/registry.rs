use std::collections::HashMap;

use ethers_core::types::Address;

use crate::error::LoaderError;

use super::Account;

/// Fixed view of every participating account, built once at startup.
///
/// The accounts themselves are handed to the engine and travel through its queues; the
/// registry keeps the addresses so destination selection never needs the moving values.
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    addresses: Vec<Address>,
    index: HashMap<Address, usize>,
}

impl AccountRegistry {
    /// Fails if two accounts share an address, which would let one identity be queued twice.
    pub fn new(accounts: &[Account]) -> Result<Self, LoaderError> {
        let mut addresses = Vec::with_capacity(accounts.len());
        let mut index = HashMap::with_capacity(accounts.len());
        for (position, account) in accounts.iter().enumerate() {
            if index.insert(account.address(), position).is_some() {
                return Err(LoaderError::ConfigError(format!(
                    "account {:?} is listed more than once",
                    account.address()
                )));
            }
            addresses.push(account.address());
        }
        Ok(Self { addresses, index })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn position(&self, address: &Address) -> Option<usize> {
        self.index.get(address).copied()
    }

    /// The next account in the registry, or the previous one for the last account.
    /// A registry with a single account pairs it with itself.
    pub fn adjacent(&self, address: &Address) -> Option<Address> {
        let position = self.position(address)?;
        let next = position.saturating_add(1);
        let neighbour = if next < self.addresses.len() {
            next
        } else {
            position.saturating_sub(1)
        };
        self.addresses.get(neighbour).copied()
    }
}
