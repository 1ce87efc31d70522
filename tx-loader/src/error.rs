use ethers_core::types::Address;
use ethers_signers::WalletError;

use crate::account::Account;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Failed to query nonce of {address:?}: {reason}")]
    NonceQueryError { address: Address, reason: String },
    #[error("Failed to sign transaction: {0}")]
    SigningError(#[from] WalletError),
    #[error("Transaction error: {0}")]
    TxSubmissionError(String),
    #[error("Failed to encode payload: {0}")]
    PayloadEncodingError(String),
    #[error("Failed to decode call result: {0}")]
    CallDecodingError(String),
    #[error("Failed to send account {0:?} over a channel")]
    ChannelSendFailure(Box<Account>),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("{0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Non-retryable error: {0}")]
    NonRetryableError(String),
}

impl From<tokio::sync::mpsc::error::SendError<Account>> for LoaderError {
    fn from(err: tokio::sync::mpsc::error::SendError<Account>) -> Self {
        LoaderError::ChannelSendFailure(Box::new(err.0))
    }
}

impl LoaderError {
    pub fn to_metrics_label(&self) -> String {
        match self {
            LoaderError::NetworkError(_) => "NetworkError".to_string(),
            LoaderError::NonceQueryError { .. } => "NonceQueryError".to_string(),
            LoaderError::SigningError(_) => "SigningError".to_string(),
            LoaderError::TxSubmissionError(_) => "TxSubmissionError".to_string(),
            LoaderError::PayloadEncodingError(_) => "PayloadEncodingError".to_string(),
            LoaderError::CallDecodingError(_) => "CallDecodingError".to_string(),
            LoaderError::ChannelSendFailure(_) => "ChannelSendFailure".to_string(),
            LoaderError::ConfigError(_) => "ConfigError".to_string(),
            LoaderError::Cancelled => "Cancelled".to_string(),
            LoaderError::JsonError(_) => "JsonError".to_string(),
            LoaderError::NonRetryableError(_) => "NonRetryableError".to_string(),
        }
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for LoaderError {
    fn is_retryable(&self) -> bool {
        match self {
            // transient RPC failures
            LoaderError::NetworkError(_)
            | LoaderError::NonceQueryError { .. }
            | LoaderError::TxSubmissionError(_)
            | LoaderError::CallDecodingError(_) => true,
            // local failures, retried immediately by handing the account back to the intake
            LoaderError::SigningError(_) | LoaderError::PayloadEncodingError(_) => true,
            LoaderError::ChannelSendFailure(_)
            | LoaderError::ConfigError(_)
            | LoaderError::Cancelled
            | LoaderError::JsonError(_)
            | LoaderError::NonRetryableError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_failures_are_retryable() {
        assert!(LoaderError::NetworkError("connection reset".into()).is_retryable());
        assert!(LoaderError::TxSubmissionError("nonce too low".into()).is_retryable());
        assert!(LoaderError::PayloadEncodingError("bad node".into()).is_retryable());
    }

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        assert!(!LoaderError::ConfigError("no endpoints".into()).is_retryable());
        assert!(!LoaderError::NonRetryableError("fatal".into()).is_retryable());
        assert!(!LoaderError::Cancelled.is_retryable());
    }
}
