use std::sync::atomic::{AtomicUsize, Ordering};

use ethers_core::types::Address;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;

/// How a transfer picks its recipient.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destinations {
    /// The sender's neighbour in the account registry
    #[default]
    Adjacent,
    /// Cycle through the destination pool, shared by all workers
    RoundRobin,
    /// Uniform draw from the destination pool
    Random,
}

/// Recipients for the non-adjacent destination modes.
#[derive(Debug, Default)]
pub struct DestinationPool {
    addresses: Vec<Address>,
    cursor: AtomicUsize,
}

impl DestinationPool {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            addresses,
            cursor: AtomicUsize::new(0),
        }
    }

    /// `count` throwaway addresses, reproducible for a given seed
    pub fn generated(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let addresses = (0..count)
            .map(|_| Address::from(rng.gen::<[u8; 20]>()))
            .collect();
        Self::new(addresses)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn round_robin(&self) -> Option<Address> {
        let position = self
            .cursor
            .fetch_add(1, Ordering::Relaxed)
            .checked_rem(self.addresses.len())?;
        self.addresses.get(position).copied()
    }

    pub fn random(&self) -> Option<Address> {
        if self.addresses.is_empty() {
            return None;
        }
        let position = rand::thread_rng().gen_range(0..self.addresses.len());
        self.addresses.get(position).copied()
    }
}
