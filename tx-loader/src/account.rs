use std::fmt;
use std::time::Duration;

use ethers_core::types::{transaction::eip2718::TypedTransaction, Address, Signature, H256};
use ethers_signers::{LocalWallet, Signer};
use tokio::time::Instant;

use crate::error::LoaderError;
use crate::workload::WorkloadState;

pub use registry::AccountRegistry;

mod registry;

/// Kind of transaction an account submitted, used for logging, metrics and per-kind counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxKind {
    Transfer,
    Delegate,
    WithdrawDelegate,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
            TxKind::Delegate => "delegate",
            TxKind::WithdrawDelegate => "withdraw_delegate",
        }
    }
}

/// A funded signing identity together with its mutable sending state.
///
/// `Account` is not `Clone`. It moves between the shared intake and the workers' delayed tasks,
/// so it is only ever waiting in one place.
pub struct Account {
    index: usize,
    address: Address,
    wallet: LocalWallet,
    /// Time of the most recent submit attempt, successful or not
    pub(crate) last_sent: Instant,
    /// How long a submitted transaction may stay unconfirmed before the account is resubmitted
    pub(crate) timeout: Duration,
    /// Next nonce to use if the chain cannot be asked for one
    pub(crate) nonce: u64,
    pub(crate) workload: WorkloadState,
}

impl Account {
    pub fn new(index: usize, wallet: LocalWallet, timeout: Duration) -> Self {
        Self {
            index,
            address: wallet.address(),
            wallet,
            last_sent: Instant::now(),
            timeout,
            nonce: 0,
            workload: WorkloadState::default(),
        }
    }

    pub fn from_private_key(
        index: usize,
        private_key: &str,
        timeout: Duration,
    ) -> Result<Self, LoaderError> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let wallet = key.parse::<LocalWallet>()?;
        Ok(Self::new(index, wallet, timeout))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn workload(&self) -> &WorkloadState {
        &self.workload
    }

    /// Whether the last submission has been outstanding for longer than the timeout
    pub fn timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sent) >= self.timeout
    }

    /// Time left until the last submission times out, zero once it has
    pub fn until_timeout(&self, now: Instant) -> Duration {
        self.timeout
            .saturating_sub(now.saturating_duration_since(self.last_sent))
    }

    pub(crate) fn sign(&self, tx: &TypedTransaction) -> Result<Signature, LoaderError> {
        Ok(self.wallet.sign_transaction_sync(tx)?)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("nonce", &self.nonce)
            .field("phase", &self.workload.phase)
            .finish()
    }
}

/// A submitted transaction awaiting confirmation. Owns the account until the receipt shows up
/// or the account's timeout elapses.
#[derive(Debug)]
pub struct ReceiptTask {
    pub account: Account,
    pub hash: H256,
    pub first_sent: Instant,
    pub kind: TxKind,
}
