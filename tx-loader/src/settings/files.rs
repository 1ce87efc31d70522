//! Readers for the account, node, destination and validator lists.

use std::fs;
use std::path::Path;
use std::time::Duration;

use ethers_core::types::Address;
use serde::Deserialize;
use tracing::{info, warn};

use crate::account::Account;
use crate::chain::{Endpoint, NodeId};
use crate::error::LoaderError;

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(default)]
    address: String,
    private_key: String,
}

#[derive(Debug, Deserialize)]
struct DestinationEntry {
    address: Address,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorList {
    validate_nodes: Vec<ValidatorEntry>,
}

#[derive(Debug, Deserialize)]
struct ValidatorEntry {
    #[serde(rename = "nodeID")]
    node_id: NodeId,
    #[serde(default)]
    staking: bool,
}

fn read(path: &Path) -> Result<String, LoaderError> {
    fs::read_to_string(path).map_err(|err| {
        LoaderError::ConfigError(format!("failed to read {}: {err}", path.display()))
    })
}

/// Loads the signing accounts. When the file holds more than `count` entries only
/// `[offset, offset + count)` is used. Entries with an unparseable key are skipped.
pub fn load_accounts(
    path: &Path,
    offset: usize,
    count: Option<usize>,
    timeout: Duration,
) -> Result<Vec<Account>, LoaderError> {
    let entries: Vec<AccountEntry> = serde_json::from_str(&read(path)?)?;
    let entries = slice_accounts(entries, offset, count)?;

    let mut accounts = Vec::with_capacity(entries.len());
    for entry in entries {
        let account = match Account::from_private_key(accounts.len(), &entry.private_key, timeout)
        {
            Ok(account) => account,
            Err(err) => {
                warn!(address = %entry.address, ?err, "Skipping account with invalid private key");
                continue;
            }
        };
        if let Ok(listed) = entry.address.parse::<Address>() {
            if listed != account.address() {
                warn!(
                    ?listed,
                    derived = ?account.address(),
                    "Listed address does not match private key, using derived address"
                );
            }
        }
        accounts.push(account);
    }
    info!(count = accounts.len(), path = %path.display(), "Loaded accounts");
    Ok(accounts)
}

pub(crate) fn slice_accounts<T>(
    mut entries: Vec<T>,
    offset: usize,
    count: Option<usize>,
) -> Result<Vec<T>, LoaderError> {
    let Some(count) = count else {
        return Ok(entries);
    };
    if entries.len() <= count {
        return Ok(entries);
    }
    let end = offset.saturating_add(count);
    if end > entries.len() {
        return Err(LoaderError::ConfigError(format!(
            "account range {offset}..{end} exceeds the {} listed accounts",
            entries.len()
        )));
    }
    entries.truncate(end);
    Ok(entries.split_off(offset))
}

pub fn load_endpoints(path: &Path) -> Result<Vec<Endpoint>, LoaderError> {
    Ok(serde_json::from_str(&read(path)?)?)
}

/// Loads `count` destination addresses starting at `offset`, shifting the window back when the
/// file is too short.
pub fn load_destinations(
    path: &Path,
    offset: usize,
    count: usize,
) -> Result<Vec<Address>, LoaderError> {
    let entries: Vec<DestinationEntry> = serde_json::from_str(&read(path)?)?;
    let addresses = entries.into_iter().map(|entry| entry.address).collect();
    Ok(slice_destinations(addresses, offset, count))
}

pub(crate) fn slice_destinations<T>(mut entries: Vec<T>, offset: usize, count: usize) -> Vec<T> {
    let total = entries.len();
    if offset.saturating_add(count) <= total {
        entries.truncate(offset.saturating_add(count));
        entries.split_off(offset)
    } else if offset < total {
        entries.split_off(total.saturating_sub(count))
    } else {
        entries.truncate(count);
        entries
    }
}

/// Loads validator node ids, either one hex id per line or a `validateNodes` JSON document of
/// which only nodes marked `staking` are kept.
pub fn load_validators(path: &Path) -> Result<Vec<NodeId>, LoaderError> {
    let content = read(path)?;
    if content.trim_start().starts_with('{') {
        let list: ValidatorList = serde_json::from_str(&content)?;
        return Ok(list
            .validate_nodes
            .into_iter()
            .filter(|node| node.staking)
            .map(|node| node.node_id)
            .collect());
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<NodeId>())
        .collect()
}
