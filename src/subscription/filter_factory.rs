//! High-level filter constructors and compound-filter validation (spec §4.1).

use crate::error::CoreError;
use std::collections::HashSet;
use yellowstone_grpc_proto::geyser::{
    subscribe_request_filter_accounts_filter::Filter as ProtoFilter,
    subscribe_request_filter_accounts_filter_memcmp::Data as ProtoMemcmpData,
    SubscribeRequestFilterAccountsFilter, SubscribeRequestFilterAccountsFilterMemcmp,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcmpFilter {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// A data-slice window `(offset, length)` applied to account payloads for
/// bandwidth reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSlice {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilterSpec {
    Memcmp(MemcmpFilter),
    DataSize(u64),
}

impl From<AccountFilterSpec> for SubscribeRequestFilterAccountsFilter {
    fn from(spec: AccountFilterSpec) -> Self {
        let filter = match spec {
            AccountFilterSpec::Memcmp(m) => ProtoFilter::Memcmp(SubscribeRequestFilterAccountsFilterMemcmp {
                offset: m.offset,
                data: Some(ProtoMemcmpData::Bytes(m.bytes)),
            }),
            AccountFilterSpec::DataSize(n) => ProtoFilter::Datasize(n),
        };
        SubscribeRequestFilterAccountsFilter { filter: Some(filter) }
    }
}

/// High-level constructors for the filter shapes this ecosystem actually
/// needs (spec §4.1), plus validation of a compound filter set.
pub struct FilterFactory;

impl FilterFactory {
    /// Bonding-curve `complete` flag equal to `value`. The offset is taken
    /// from the single decoder-owned layout constant so the filter and the
    /// account decoder can never disagree about where this byte lives.
    pub fn bonding_curve_complete_equals(value: bool) -> AccountFilterSpec {
        AccountFilterSpec::Memcmp(MemcmpFilter {
            offset: crate::constants::layout::bonding_curve::COMPLETE_FLAG as u64,
            bytes: vec![value as u8],
        })
    }

    /// Bonding-curve `mint` pubkey equal to `mint`.
    pub fn mint_equals(mint: &solana_sdk::pubkey::Pubkey) -> AccountFilterSpec {
        AccountFilterSpec::Memcmp(MemcmpFilter {
            offset: crate::constants::layout::bonding_curve::MINT as u64,
            bytes: mint.to_bytes().to_vec(),
        })
    }

    /// Bonding-curve `creator` pubkey equal to `creator`.
    pub fn creator_equals(creator: &solana_sdk::pubkey::Pubkey) -> AccountFilterSpec {
        AccountFilterSpec::Memcmp(MemcmpFilter {
            offset: crate::constants::layout::bonding_curve::CREATOR as u64,
            bytes: creator.to_bytes().to_vec(),
        })
    }

    /// "dataSize = N"
    pub fn data_size_equals(n: u64) -> AccountFilterSpec {
        AccountFilterSpec::DataSize(n)
    }

    /// No two memcmp filters at the same offset; at most one dataSize filter.
    pub fn validate(filters: &[AccountFilterSpec]) -> Result<(), CoreError> {
        let mut offsets = HashSet::new();
        let mut data_size_count = 0;
        for f in filters {
            match f {
                AccountFilterSpec::Memcmp(m) => {
                    if !offsets.insert(m.offset) {
                        return Err(CoreError::ConfigInvalid(format!(
                            "duplicate memcmp filter at offset {}",
                            m.offset
                        )));
                    }
                }
                AccountFilterSpec::DataSize(_) => {
                    data_size_count += 1;
                    if data_size_count > 1 {
                        return Err(CoreError::ConfigInvalid(
                            "at most one dataSize filter is allowed per channel".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Sorting filters by offset is a stable bandwidth/readability
    /// optimisation, not a correctness requirement (spec §4.1).
    pub fn sorted_for_transport(mut filters: Vec<AccountFilterSpec>) -> Vec<AccountFilterSpec> {
        filters.sort_by_key(|f| match f {
            AccountFilterSpec::Memcmp(m) => m.offset,
            AccountFilterSpec::DataSize(_) => u64::MAX,
        });
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_distinct_offsets() {
        let filters = vec![
            FilterFactory::bonding_curve_complete_equals(true),
            AccountFilterSpec::DataSize(81),
        ];
        assert!(FilterFactory::validate(&filters).is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_offset() {
        let filters = vec![
            AccountFilterSpec::Memcmp(MemcmpFilter { offset: 32, bytes: vec![1] }),
            AccountFilterSpec::Memcmp(MemcmpFilter { offset: 32, bytes: vec![2] }),
        ];
        assert!(FilterFactory::validate(&filters).is_err());
    }

    #[test]
    fn validate_rejects_two_data_size_filters() {
        let filters = vec![AccountFilterSpec::DataSize(81), AccountFilterSpec::DataSize(82)];
        assert!(FilterFactory::validate(&filters).is_err());
    }

    #[test]
    fn sorted_for_transport_orders_by_offset() {
        let filters = vec![
            AccountFilterSpec::Memcmp(MemcmpFilter { offset: 64, bytes: vec![] }),
            AccountFilterSpec::Memcmp(MemcmpFilter { offset: 32, bytes: vec![] }),
        ];
        let sorted = FilterFactory::sorted_for_transport(filters);
        assert_eq!(
            sorted,
            vec![
                AccountFilterSpec::Memcmp(MemcmpFilter { offset: 32, bytes: vec![] }),
                AccountFilterSpec::Memcmp(MemcmpFilter { offset: 64, bytes: vec![] }),
            ]
        );
    }
}
