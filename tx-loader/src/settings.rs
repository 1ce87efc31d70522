//! Loader settings, read from a JSON file and `LOADER_` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use ethers_core::types::U256;
use eyre::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::account::{Account, AccountRegistry};
use crate::chain::{ChainContext, Endpoint, NodeId};
use crate::error::LoaderError;
use crate::payload::StakeRegistration;
use crate::trace::TracingConfig;
use crate::workload::{DestinationPool, ValidatorBook, Workload, WorkloadPolicy};

pub use files::{load_accounts, load_destinations, load_endpoints, load_validators};

mod files;

const CONFIG_FILE_VAR: &str = "LOADER_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "./config/loader.json";
const ENV_PREFIX: &str = "LOADER";

/// What to do when the chain cannot be asked for an account's nonce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceFallback {
    /// Use the account's locally tracked next nonce
    #[default]
    Cached,
    /// Use nonce 0
    Zero,
    /// Skip this attempt and retry after the submit retry delay
    Retry,
}

/// Delay before resubmitting after the node rejected a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitRetry {
    Fixed { ms: u64 },
    /// Reuse the account's confirmation timeout
    AccountTimeout,
}

impl Default for SubmitRetry {
    fn default() -> Self {
        SubmitRetry::Fixed { ms: 50 }
    }
}

impl SubmitRetry {
    pub fn delay(&self, account: &Account) -> Duration {
        match self {
            SubmitRetry::Fixed { ms } => Duration::from_millis(*ms),
            SubmitRetry::AccountTimeout => account.timeout,
        }
    }
}

/// Queueing and timing of the engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Bound of the intake queue shared by all workers
    pub intake_capacity: usize,
    /// Bound of each worker's delayed tasks
    pub local_capacity: usize,
    /// Wait between a submission and its first receipt poll
    pub settle_delay_ms: u64,
    /// Wait between receipt polls
    pub receipt_poll_ms: u64,
    pub submit_retry: SubmitRetry,
    /// Initial cooldown between a confirmation and the account's next submission
    pub send_interval_ms: u64,
    /// Pause between seeding accounts into the intake at startup
    pub seed_stagger_ms: u64,
    pub reconnect_delay_ms: u64,
    pub report_interval_ms: u64,
    pub nonce_fallback: NonceFallback,
    /// Dispatch to an endpoint only while its node takes part in consensus
    pub only_active: bool,
    pub activity_poll_ms: u64,
    /// Receipt log messages that mark a transaction as failed on chain
    pub failure_markers: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            intake_capacity: 10_000,
            local_capacity: 10_000,
            settle_delay_ms: 600,
            receipt_poll_ms: 300,
            submit_retry: SubmitRetry::default(),
            send_interval_ms: 50,
            seed_stagger_ms: 100,
            reconnect_delay_ms: 100,
            report_interval_ms: 1000,
            nonce_fallback: NonceFallback::default(),
            only_active: false,
            activity_poll_ms: 1000,
            failure_markers: vec!["Delegate failed: Account of Candidate(Validator)".to_string()],
        }
    }
}

impl EngineSettings {
    pub fn validate(&self, accounts: usize, endpoints: usize) -> Result<(), LoaderError> {
        if endpoints == 0 {
            return Err(LoaderError::ConfigError(
                "at least one endpoint is required".to_string(),
            ));
        }
        if accounts == 0 {
            return Err(LoaderError::ConfigError(
                "at least one account is required".to_string(),
            ));
        }
        // every account may be handed back to the intake at once
        if self.intake_capacity < accounts {
            return Err(LoaderError::ConfigError(format!(
                "intake capacity {} is smaller than the {accounts} accounts",
                self.intake_capacity
            )));
        }
        if self.local_capacity == 0 {
            return Err(LoaderError::ConfigError(
                "local capacity must be positive".to_string(),
            ));
        }
        if self.report_interval_ms == 0 || self.activity_poll_ms == 0 {
            return Err(LoaderError::ConfigError(
                "report and activity poll intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }

    pub fn seed_stagger(&self) -> Duration {
        Duration::from_millis(self.seed_stagger_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn activity_poll(&self) -> Duration {
        Duration::from_millis(self.activity_poll_ms)
    }
}

/// Fixed parameters of every built transaction. Amounts are in the chain's smallest unit.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TxSettings {
    pub transfer_value: u64,
    pub contract_value: u64,
    pub transfer_gas_limit: u64,
    pub contract_gas_limit: u64,
    pub gas_price: u64,
    pub delegate_amount: u64,
}

impl Default for TxSettings {
    fn default() -> Self {
        Self {
            transfer_value: 200,
            contract_value: 0,
            transfer_gas_limit: 21_000,
            contract_gas_limit: 103_496,
            gas_price: 500_000_000_000,
            delegate_amount: 10_000_000_000_000_000_000,
        }
    }
}

impl TxSettings {
    pub fn transfer_value(&self) -> U256 {
        self.transfer_value.into()
    }

    pub fn contract_value(&self) -> U256 {
        self.contract_value.into()
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price.into()
    }

    pub fn delegate_amount(&self) -> U256 {
        self.delegate_amount.into()
    }
}

/// One-shot stake registration performed before the load starts.
#[derive(Clone, Debug, Deserialize)]
pub struct StakingSettings {
    pub private_key: String,
    pub registration: StakeRegistration,
}

const fn default_account_timeout_ms() -> u64 {
    100
}

const fn default_random_count() -> usize {
    10_000
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub chain: ChainContext,
    pub accounts_file: PathBuf,
    #[serde(default)]
    pub accounts_offset: usize,
    pub accounts_count: Option<usize>,
    #[serde(default = "default_account_timeout_ms")]
    pub account_timeout_ms: u64,
    pub endpoints_file: Option<PathBuf>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub destinations_file: Option<PathBuf>,
    #[serde(default)]
    pub destinations_offset: usize,
    pub destinations_count: Option<usize>,
    /// Size of the generated destination pool when no destination file is given
    #[serde(default = "default_random_count")]
    pub random_count: usize,
    pub random_seed: Option<u64>,
    pub validators_file: Option<PathBuf>,
    /// Node that delegating workloads delegate to
    pub staking_node: Option<NodeId>,
    #[serde(default)]
    pub workload: WorkloadPolicy,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub tx: TxSettings,
    /// Block height to wait for before dispatching
    pub ready_block: Option<u64>,
    pub staking: Option<StakingSettings>,
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing: TracingConfig,
}

impl Settings {
    pub fn load_accounts(&self) -> Result<Vec<Account>, LoaderError> {
        load_accounts(
            &self.accounts_file,
            self.accounts_offset,
            self.accounts_count,
            Duration::from_millis(self.account_timeout_ms),
        )
    }

    /// Inline endpoints take precedence over the endpoints file.
    pub fn load_endpoints(&self) -> Result<Vec<Endpoint>, LoaderError> {
        if !self.endpoints.is_empty() {
            return Ok(self.endpoints.clone());
        }
        match &self.endpoints_file {
            Some(path) => load_endpoints(path),
            None => Err(LoaderError::ConfigError(
                "either endpoints or endpoints_file must be set".to_string(),
            )),
        }
    }

    pub fn destination_pool(&self) -> Result<DestinationPool, LoaderError> {
        let count = self.destinations_count.unwrap_or(self.random_count);
        if let Some(path) = &self.destinations_file {
            let addresses = load_destinations(path, self.destinations_offset, count)?;
            return Ok(DestinationPool::new(addresses));
        }
        let needs_pool = self
            .workload
            .destinations()
            .is_some_and(|mode| mode != crate::workload::Destinations::Adjacent);
        if !needs_pool {
            return Ok(DestinationPool::default());
        }
        let seed = self.random_seed.unwrap_or_else(rand::random);
        info!(count, seed, "Generating destination addresses");
        Ok(DestinationPool::generated(count, seed))
    }

    pub fn validators(&self) -> Result<ValidatorBook, LoaderError> {
        let ids = match &self.validators_file {
            Some(path) => load_validators(path)?,
            None => Vec::new(),
        };
        Ok(ValidatorBook::new(ids))
    }

    pub fn build_workload(&self, accounts: &[Account]) -> Result<Workload, LoaderError> {
        Workload::new(
            self.workload.clone(),
            AccountRegistry::new(accounts)?,
            self.destination_pool()?,
            self.validators()?,
            self.staking_node,
        )
    }
}

/// Reads settings from the file named by `LOADER_CONFIG_FILE` (or `./config/loader.json` if it
/// exists), then applies `LOADER_`-prefixed environment overrides such as
/// `LOADER_ENGINE__SEND_INTERVAL_MS=100`.
pub fn load_settings() -> Result<Settings> {
    let (path, required) = match env::var(CONFIG_FILE_VAR) {
        Ok(path) => (PathBuf::from(path), true),
        Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let config = Config::builder()
        .add_source(File::from(path.clone()).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    config
        .try_deserialize::<Settings>()
        .context("Failed to deserialize settings")
}
