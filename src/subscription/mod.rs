//! Typed gRPC subscription composition (spec §4.1).
//!
//! [`FilterFactory`] builds validated filter fragments; [`SubscriptionBuilder`]
//! assembles them plus channel-level settings into a single
//! `yellowstone_grpc_proto::geyser::SubscribeRequest` sent once on connect.

pub mod filter_factory;

use crate::error::CoreError;
use solana_sdk::commitment_config::CommitmentLevel as SdkCommitmentLevel;
use std::collections::HashMap;
use yellowstone_grpc_proto::geyser::{
    CommitmentLevel, SubscribeRequest, SubscribeRequestAccountsDataSlice,
    SubscribeRequestFilterAccounts, SubscribeRequestFilterAccountsFilter,
    SubscribeRequestFilterSlots, SubscribeRequestFilterTransactions,
};

pub use filter_factory::{AccountFilterSpec, DataSlice, FilterFactory, MemcmpFilter};

fn to_proto_commitment(level: SdkCommitmentLevel) -> CommitmentLevel {
    match level {
        SdkCommitmentLevel::Processed => CommitmentLevel::Processed,
        SdkCommitmentLevel::Confirmed => CommitmentLevel::Confirmed,
        SdkCommitmentLevel::Finalized => CommitmentLevel::Finalized,
    }
}

/// One account-subscription channel: owner program(s) plus optional filters.
#[derive(Debug, Clone, Default)]
pub struct AccountChannel {
    pub label: String,
    pub owners: Vec<String>,
    pub accounts: Vec<String>,
    pub filters: Vec<AccountFilterSpec>,
    pub nonempty_txn_signature: Option<bool>,
}

/// One transaction-subscription channel.
#[derive(Debug, Clone, Default)]
pub struct TransactionChannel {
    pub label: String,
    pub account_include: Vec<String>,
    pub account_required: Vec<String>,
    pub account_exclude: Vec<String>,
    pub vote: Option<bool>,
    pub failed: Option<bool>,
}

/// Builds the single typed `SubscribeRequest` the `StreamClient` sends once
/// on connect, and nothing else — it holds no connection state.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionBuilder {
    commitment: Option<SdkCommitmentLevel>,
    transactions: Vec<TransactionChannel>,
    accounts: Vec<AccountChannel>,
    slot_updates: bool,
    data_slices: Vec<DataSlice>,
    from_slot: Option<u64>,
}

impl SubscriptionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commitment(mut self, level: SdkCommitmentLevel) -> Self {
        self.commitment = Some(level);
        self
    }

    pub fn from_slot(mut self, slot: Option<u64>) -> Self {
        self.from_slot = slot;
        self
    }

    pub fn with_transactions(mut self, channel: TransactionChannel) -> Self {
        self.transactions.push(channel);
        self
    }

    pub fn with_accounts(mut self, channel: AccountChannel) -> Self {
        self.accounts.push(channel);
        self
    }

    pub fn with_slot_updates(mut self) -> Self {
        self.slot_updates = true;
        self
    }

    pub fn with_data_slice(mut self, slice: DataSlice) -> Self {
        self.data_slices.push(slice);
        self
    }

    /// Validate and assemble the final request. Compound filter sets are
    /// checked here: no two memcmp filters at the same offset, at most one
    /// dataSize filter per channel (spec §4.1).
    pub fn build(self) -> Result<SubscribeRequest, CoreError> {
        for channel in &self.accounts {
            FilterFactory::validate(&channel.filters)?;
        }

        let mut transactions = HashMap::new();
        for (i, ch) in self.transactions.into_iter().enumerate() {
            let label = if ch.label.is_empty() { format!("tx_{i}") } else { ch.label.clone() };
            transactions.insert(
                label,
                SubscribeRequestFilterTransactions {
                    vote: ch.vote,
                    failed: ch.failed,
                    signature: None,
                    account_include: ch.account_include,
                    account_exclude: ch.account_exclude,
                    account_required: ch.account_required,
                },
            );
        }

        let mut accounts = HashMap::new();
        for (i, ch) in self.accounts.into_iter().enumerate() {
            let label = if ch.label.is_empty() { format!("acct_{i}") } else { ch.label.clone() };
            let filters = FilterFactory::sorted_for_transport(ch.filters)
                .into_iter()
                .map(Into::<SubscribeRequestFilterAccountsFilter>::into)
                .collect();
            accounts.insert(
                label,
                SubscribeRequestFilterAccounts {
                    account: ch.accounts,
                    owner: ch.owners,
                    filters,
                    nonempty_txn_signature: ch.nonempty_txn_signature,
                },
            );
        }

        let mut slots = HashMap::new();
        if self.slot_updates {
            slots.insert(
                "slots".to_string(),
                SubscribeRequestFilterSlots { filter_by_commitment: Some(true), interslot_updates: Some(false) },
            );
        }

        let accounts_data_slice = self
            .data_slices
            .into_iter()
            .map(|d| SubscribeRequestAccountsDataSlice { offset: d.offset, length: d.length })
            .collect();

        Ok(SubscribeRequest {
            accounts,
            slots,
            transactions,
            transactions_status: HashMap::new(),
            blocks: HashMap::new(),
            blocks_meta: HashMap::new(),
            entry: HashMap::new(),
            commitment: Some(to_proto_commitment(self.commitment.unwrap_or(SdkCommitmentLevel::Confirmed)) as i32),
            accounts_data_slice,
            ping: None,
            from_slot: self.from_slot.map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_commitment_is_confirmed() {
        let req = SubscriptionBuilder::new().build().unwrap();
        assert_eq!(req.commitment, Some(CommitmentLevel::Confirmed as i32));
    }

    #[test]
    fn from_slot_round_trips() {
        let req = SubscriptionBuilder::new().from_slot(Some(123)).build().unwrap();
        assert_eq!(req.from_slot, Some("123".to_string()));
    }

    #[test]
    fn rejects_duplicate_memcmp_offsets() {
        let channel = AccountChannel {
            label: "bc".into(),
            owners: vec!["prog".into()],
            filters: vec![
                AccountFilterSpec::Memcmp(MemcmpFilter { offset: 48, bytes: vec![1] }),
                AccountFilterSpec::Memcmp(MemcmpFilter { offset: 48, bytes: vec![0] }),
            ],
            ..Default::default()
        };
        let err = SubscriptionBuilder::new().with_accounts(channel).build().unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }
}
