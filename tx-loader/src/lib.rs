#![deny(clippy::unwrap_used, clippy::panic)]
#![deny(clippy::arithmetic_side_effects)]

pub use account::{Account, AccountRegistry, ReceiptTask, TxKind};
pub use bootstrap::{register_stake, wait_for_block};
pub use chain::{ChainContext, Endpoint, NodeId};
pub use dispatcher::{
    EngineComponents, EngineHandle, EngineReport, LoadEngine, LoaderCounters, LoaderMetrics,
    RateSnapshot,
};
pub use error::{IsRetryable, LoaderError};
pub use payload::{EncodesPayload, RlpPayloadEncoder, StakeRegistration, StakingOperation};
pub use provider::{
    ConnectsProvider, EthersConnector, LoaderProvider, ReadonlyCall, SignedTx, TxReceipt,
};
pub use settings::{
    load_settings, EngineSettings, NonceFallback, Settings, SubmitRetry, TxSettings,
};
pub use trace::{Level, Style, TracingConfig};
pub use workload::{Action, Destinations, Phase, ValidatorBook, Workload, WorkloadPolicy};

mod account;
mod bootstrap;
mod chain;
mod dispatcher;
mod error;
mod payload;
mod provider;
pub mod server;
mod settings;
mod trace;
mod workload;
