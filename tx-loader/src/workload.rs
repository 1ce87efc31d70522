use ethers_core::types::Address;
use serde::Deserialize;

use crate::account::{Account, AccountRegistry, TxKind};
use crate::chain::NodeId;
use crate::error::LoaderError;

pub use destination::{DestinationPool, Destinations};
pub use validators::{ValidatorBook, ValidatorNode};

mod destination;
mod validators;

const fn default_burst() -> usize {
    5
}

/// What every account does each time it is dispatched.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadPolicy {
    /// `burst` transfers with consecutive nonces per dispatch
    Transfer {
        #[serde(default = "default_burst")]
        burst: usize,
        #[serde(default)]
        destinations: Destinations,
    },
    /// One delegation to the staking node per dispatch
    Delegate,
    /// Transfer first, then alternate transfer and delegation when `delegate` is set
    Alternate {
        #[serde(default = "default_burst")]
        burst: usize,
        #[serde(default)]
        destinations: Destinations,
        #[serde(default)]
        delegate: bool,
    },
    /// Transfer until `transfers_per_cycle` transfers went out, then delegate to and withdraw
    /// from every validator node in turn
    Phased {
        transfers_per_cycle: usize,
        #[serde(default = "default_burst")]
        burst: usize,
        #[serde(default)]
        destinations: Destinations,
    },
}

impl Default for WorkloadPolicy {
    fn default() -> Self {
        WorkloadPolicy::Transfer {
            burst: default_burst(),
            destinations: Destinations::Adjacent,
        }
    }
}

impl WorkloadPolicy {
    pub fn destinations(&self) -> Option<Destinations> {
        match self {
            WorkloadPolicy::Transfer { destinations, .. }
            | WorkloadPolicy::Alternate { destinations, .. }
            | WorkloadPolicy::Phased { destinations, .. } => Some(*destinations),
            WorkloadPolicy::Delegate => None,
        }
    }

    pub fn needs_validators(&self) -> bool {
        matches!(self, WorkloadPolicy::Phased { .. })
    }

    pub fn needs_staking_node(&self) -> bool {
        matches!(
            self,
            WorkloadPolicy::Delegate
                | WorkloadPolicy::Alternate { delegate: true, .. }
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Transfer,
    Delegate,
    Withdraw,
}

/// Per-account progress through the workload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadState {
    pub phase: Phase,
    pub transfers: usize,
    pub delegates: usize,
    pub withdrawals: usize,
    pub just_transferred: bool,
}

/// One dispatch worth of work for an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Transfer { to: Address, count: usize },
    Delegate { node: NodeId },
    WithdrawDelegate { node: NodeId, staking_block: u64 },
}

impl Action {
    pub fn kind(&self) -> TxKind {
        match self {
            Action::Transfer { .. } => TxKind::Transfer,
            Action::Delegate { .. } => TxKind::Delegate,
            Action::WithdrawDelegate { .. } => TxKind::WithdrawDelegate,
        }
    }

    /// Number of transactions the action submits
    pub fn tx_count(&self) -> usize {
        match self {
            Action::Transfer { count, .. } => *count,
            Action::Delegate { .. } | Action::WithdrawDelegate { .. } => 1,
        }
    }
}

/// A workload policy bound to everything it needs to pick actions.
#[derive(Debug)]
pub struct Workload {
    policy: WorkloadPolicy,
    registry: AccountRegistry,
    pool: DestinationPool,
    validators: ValidatorBook,
    staking_node: Option<NodeId>,
}

impl Workload {
    pub fn new(
        policy: WorkloadPolicy,
        registry: AccountRegistry,
        pool: DestinationPool,
        validators: ValidatorBook,
        staking_node: Option<NodeId>,
    ) -> Result<Self, LoaderError> {
        if policy.needs_validators() && validators.is_empty() {
            return Err(LoaderError::ConfigError(
                "phased workload requires at least one validator node".to_string(),
            ));
        }
        if policy.needs_staking_node() && staking_node.is_none() {
            return Err(LoaderError::ConfigError(
                "delegating workload requires a staking node".to_string(),
            ));
        }
        if let WorkloadPolicy::Phased {
            transfers_per_cycle: 0,
            ..
        } = policy
        {
            return Err(LoaderError::ConfigError(
                "transfers_per_cycle must be at least 1".to_string(),
            ));
        }
        if matches!(
            policy.destinations(),
            Some(Destinations::RoundRobin | Destinations::Random)
        ) && pool.is_empty()
        {
            return Err(LoaderError::ConfigError(
                "destination pool is empty".to_string(),
            ));
        }
        Ok(Self {
            policy,
            registry,
            pool,
            validators,
            staking_node,
        })
    }

    pub fn policy(&self) -> &WorkloadPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn validators(&self) -> &ValidatorBook {
        &self.validators
    }

    fn destination(&self, mode: Destinations, sender: Address) -> Address {
        let picked = match mode {
            Destinations::Adjacent => None,
            Destinations::RoundRobin => self.pool.round_robin(),
            Destinations::Random => self.pool.random(),
        };
        picked
            .or_else(|| self.registry.adjacent(&sender))
            .unwrap_or(sender)
    }

    fn staking_node(&self) -> Result<NodeId, LoaderError> {
        self.staking_node
            .ok_or_else(|| LoaderError::ConfigError("no staking node configured".to_string()))
    }

    /// The action the account should perform on this dispatch.
    pub fn next_action(&self, account: &Account) -> Result<Action, LoaderError> {
        let state = &account.workload;
        let action = match &self.policy {
            WorkloadPolicy::Transfer {
                burst,
                destinations,
            } => Action::Transfer {
                to: self.destination(*destinations, account.address()),
                count: (*burst).max(1),
            },
            WorkloadPolicy::Delegate => Action::Delegate {
                node: self.staking_node()?,
            },
            WorkloadPolicy::Alternate {
                burst,
                destinations,
                delegate,
            } => {
                if *delegate && state.just_transferred {
                    Action::Delegate {
                        node: self.staking_node()?,
                    }
                } else {
                    Action::Transfer {
                        to: self.destination(*destinations, account.address()),
                        count: (*burst).max(1),
                    }
                }
            }
            WorkloadPolicy::Phased {
                transfers_per_cycle,
                burst,
                destinations,
            } => match state.phase {
                Phase::Transfer => {
                    let remaining = transfers_per_cycle.saturating_sub(state.transfers);
                    Action::Transfer {
                        to: self.destination(*destinations, account.address()),
                        count: (*burst).min(remaining).max(1),
                    }
                }
                Phase::Delegate => {
                    let node = self.validator(state.delegates)?;
                    Action::Delegate { node: node.id }
                }
                Phase::Withdraw => {
                    let node = self.validator(state.withdrawals)?;
                    Action::WithdrawDelegate {
                        node: node.id,
                        staking_block: node.staking_block(),
                    }
                }
            },
        };
        Ok(action)
    }

    fn validator(&self, position: usize) -> Result<&ValidatorNode, LoaderError> {
        self.validators.node(position).ok_or_else(|| {
            LoaderError::ConfigError(format!("no validator node at position {position}"))
        })
    }

    /// Advances the account's progress after one transaction of `action` was accepted.
    pub fn record_success(&self, state: &mut WorkloadState, action: &Action) {
        match &self.policy {
            WorkloadPolicy::Transfer { .. } | WorkloadPolicy::Delegate => {}
            WorkloadPolicy::Alternate { .. } => {
                state.just_transferred = matches!(action, Action::Transfer { .. });
            }
            WorkloadPolicy::Phased {
                transfers_per_cycle,
                ..
            } => match (state.phase, action) {
                (Phase::Transfer, Action::Transfer { .. }) => {
                    state.transfers = state.transfers.saturating_add(1);
                    if state.transfers >= *transfers_per_cycle {
                        state.transfers = 0;
                        state.phase = Phase::Delegate;
                    }
                }
                (Phase::Delegate, Action::Delegate { .. }) => {
                    state.delegates = state.delegates.saturating_add(1);
                    if state.delegates >= self.validators.len() {
                        state.delegates = 0;
                        state.phase = Phase::Withdraw;
                    }
                }
                (Phase::Withdraw, Action::WithdrawDelegate { .. }) => {
                    state.withdrawals = state.withdrawals.saturating_add(1);
                    if state.withdrawals >= self.validators.len() {
                        state.withdrawals = 0;
                        state.phase = Phase::Transfer;
                    }
                }
                _ => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ethers_signers::LocalWallet;

    use crate::chain::NODE_ID_LEN;

    use super::*;

    fn accounts(n: usize) -> Vec<Account> {
        (0..n)
            .map(|i| {
                let wallet = LocalWallet::new(&mut rand::thread_rng());
                Account::new(i, wallet, Duration::from_secs(1))
            })
            .collect()
    }

    fn nodes(n: u8) -> Vec<NodeId> {
        (1..=n).map(|i| NodeId([i; NODE_ID_LEN])).collect()
    }

    fn workload(policy: WorkloadPolicy, accounts: &[Account], validators: u8) -> Workload {
        Workload::new(
            policy,
            AccountRegistry::new(accounts).unwrap(),
            DestinationPool::default(),
            ValidatorBook::new(nodes(validators)),
            Some(NodeId([0xaa; NODE_ID_LEN])),
        )
        .unwrap()
    }

    /// Runs one dispatch, with every transaction of the action succeeding.
    fn dispatch(workload: &Workload, account: &mut Account) -> Action {
        let action = workload.next_action(account).unwrap();
        for _ in 0..action.tx_count() {
            workload.record_success(&mut account.workload, &action);
        }
        action
    }

    #[test]
    fn test_phased_cycle_order() {
        let mut accounts = accounts(2);
        let policy = WorkloadPolicy::Phased {
            transfers_per_cycle: 2,
            burst: 1,
            destinations: Destinations::Adjacent,
        };
        let workload = workload(policy, &accounts, 3);
        let account = &mut accounts[0];

        let kinds: Vec<_> = (0..16)
            .map(|_| dispatch(&workload, account))
            .collect();
        let expected_nodes = nodes(3);

        assert!(matches!(kinds[0], Action::Transfer { .. }));
        assert!(matches!(kinds[1], Action::Transfer { .. }));
        for (i, node) in expected_nodes.iter().enumerate() {
            assert_eq!(kinds[2 + i], Action::Delegate { node: *node });
        }
        for (i, node) in expected_nodes.iter().enumerate() {
            assert_eq!(
                kinds[5 + i],
                Action::WithdrawDelegate {
                    node: *node,
                    staking_block: 0
                }
            );
        }
        assert!(matches!(kinds[8], Action::Transfer { .. }));
        assert!(matches!(kinds[9], Action::Transfer { .. }));
        assert_eq!(kinds[10], Action::Delegate { node: expected_nodes[0] });
    }

    #[test]
    fn test_phased_burst_lands_on_target() {
        let mut accounts = accounts(2);
        let policy = WorkloadPolicy::Phased {
            transfers_per_cycle: 7,
            burst: 5,
            destinations: Destinations::Adjacent,
        };
        let workload = workload(policy, &accounts, 1);
        let account = &mut accounts[0];

        assert_eq!(dispatch(&workload, account).tx_count(), 5);
        assert_eq!(dispatch(&workload, account).tx_count(), 2);
        assert_eq!(account.workload.phase, Phase::Delegate);
    }

    #[test]
    fn test_failed_step_is_repeated() {
        let mut accounts = accounts(2);
        let policy = WorkloadPolicy::Phased {
            transfers_per_cycle: 1,
            burst: 1,
            destinations: Destinations::Adjacent,
        };
        let workload = workload(policy, &accounts, 2);
        let account = &mut accounts[0];
        dispatch(&workload, account);

        // submission failed, so nothing is recorded and the same delegation comes back
        let first = workload.next_action(account).unwrap();
        let again = workload.next_action(account).unwrap();
        assert_eq!(first, again);
        assert_eq!(first, Action::Delegate { node: nodes(2)[0] });
    }

    #[test]
    fn test_alternate_switches_after_successful_transfer() {
        let mut accounts = accounts(3);
        let policy = WorkloadPolicy::Alternate {
            burst: 2,
            destinations: Destinations::Adjacent,
            delegate: true,
        };
        let workload = workload(policy, &accounts, 0);
        let neighbour = accounts[1].address();
        let account = &mut accounts[0];

        assert_eq!(
            dispatch(&workload, account),
            Action::Transfer {
                to: neighbour,
                count: 2
            }
        );
        assert!(matches!(
            dispatch(&workload, account),
            Action::Delegate { .. }
        ));
        assert!(matches!(
            dispatch(&workload, account),
            Action::Transfer { .. }
        ));
    }

    #[test]
    fn test_alternate_without_delegation_only_transfers() {
        let mut accounts = accounts(2);
        let policy = WorkloadPolicy::Alternate {
            burst: 1,
            destinations: Destinations::Adjacent,
            delegate: false,
        };
        let workload = workload(policy, &accounts, 0);
        let account = &mut accounts[1];
        for _ in 0..4 {
            assert!(matches!(
                dispatch(&workload, account),
                Action::Transfer { .. }
            ));
        }
    }

    #[test]
    fn test_phased_without_validators_is_rejected() {
        let accounts = accounts(1);
        let result = Workload::new(
            WorkloadPolicy::Phased {
                transfers_per_cycle: 1,
                burst: 1,
                destinations: Destinations::Adjacent,
            },
            AccountRegistry::new(&accounts).unwrap(),
            DestinationPool::default(),
            ValidatorBook::default(),
            None,
        );
        assert!(matches!(result, Err(LoaderError::ConfigError(_))));
    }

    #[test]
    fn test_round_robin_requires_pool() {
        let accounts = accounts(1);
        let result = Workload::new(
            WorkloadPolicy::Transfer {
                burst: 1,
                destinations: Destinations::RoundRobin,
            },
            AccountRegistry::new(&accounts).unwrap(),
            DestinationPool::default(),
            ValidatorBook::default(),
            None,
        );
        assert!(matches!(result, Err(LoaderError::ConfigError(_))));
    }

    #[test]
    fn test_policy_deserializes_from_tagged_json() {
        let policy: WorkloadPolicy = serde_json::from_str(
            r#"{"type":"phased","transfers_per_cycle":100,"destinations":"round_robin"}"#,
        )
        .unwrap();
        assert_eq!(
            policy,
            WorkloadPolicy::Phased {
                transfers_per_cycle: 100,
                burst: 5,
                destinations: Destinations::RoundRobin
            }
        );
    }
}
