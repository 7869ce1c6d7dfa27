//! Routes raw stream updates to the appropriate venue decoder (spec §4.3).

use crate::decode::{self, amm_pool, bonding_curve, AccountRecord, TradeRecord, Venue};
use crate::error::CoreError;
use solana_sdk::pubkey::Pubkey;

/// A raw account update as delivered by the stream, before venue-specific
/// decoding.
#[derive(Debug, Clone)]
pub struct RawAccountUpdate {
    pub owner: Pubkey,
    pub pubkey: Pubkey,
    pub data: Vec<u8>,
    pub slot: u64,
}

/// A raw transaction as delivered by the stream.
#[derive(Debug, Clone)]
pub struct RawTransactionUpdate {
    pub signature: String,
    pub account_keys: Vec<Pubkey>,
    pub log_messages: Vec<String>,
    pub slot: u64,
}

/// A raw slot update, forwarded to [`crate::gap_recovery`].
#[derive(Debug, Clone, Copy)]
pub struct RawSlotUpdate {
    pub slot: u64,
}

/// One decoded routing result: which venue produced it, and the decoded
/// record or the error encountered decoding it.
#[derive(Debug, Clone)]
pub enum DemuxOutput {
    Account { venue: Venue, slot: u64, result: Result<AccountRecord, CoreError> },
    Trade { venue: Venue, slot: u64, signature: String, result: Result<TradeRecord, CoreError> },
    Slot(RawSlotUpdate),
}

/// Compares update ownership/membership against the configured program IDs
/// and dispatches to the matching venue decoder(s). Holds no state beyond
/// the two program IDs it was constructed with.
pub struct EventDemultiplexer {
    bonding_curve_program: Pubkey,
    amm_program: Pubkey,
}

impl EventDemultiplexer {
    pub fn new(bonding_curve_program: Pubkey, amm_program: Pubkey) -> Self {
        Self { bonding_curve_program, amm_program }
    }

    /// Route an account update to the BC or AMM account decoder based on
    /// `owner`. Accounts owned by neither configured program are ignored.
    pub fn route_account(&self, update: &RawAccountUpdate) -> Option<DemuxOutput> {
        if update.owner == self.bonding_curve_program {
            let result = bonding_curve::BondingCurveSnapshot::decode(&update.data).map(AccountRecord::BondingCurve);
            Some(DemuxOutput::Account { venue: Venue::BondingCurve, slot: update.slot, result })
        } else if update.owner == self.amm_program {
            let result = amm_pool::PoolStateSnapshot::decode(&update.data).map(AccountRecord::AmmPool);
            Some(DemuxOutput::Account { venue: Venue::AmmPool, slot: update.slot, result })
        } else {
            None
        }
    }

    /// A transaction may involve multiple venues at once; route a decode
    /// attempt to every venue whose program ID appears in the account-keys
    /// list (spec §4.3).
    pub fn route_transaction(&self, update: &RawTransactionUpdate) -> Vec<DemuxOutput> {
        let mut outputs = Vec::new();

        if update.account_keys.contains(&self.bonding_curve_program) {
            for result in decode::decode_trade_events(Venue::BondingCurve, &update.log_messages) {
                outputs.push(DemuxOutput::Trade {
                    venue: Venue::BondingCurve,
                    slot: update.slot,
                    signature: update.signature.clone(),
                    result,
                });
            }
        }
        if update.account_keys.contains(&self.amm_program) {
            for result in decode::decode_trade_events(Venue::AmmPool, &update.log_messages) {
                outputs.push(DemuxOutput::Trade {
                    venue: Venue::AmmPool,
                    slot: update.slot,
                    signature: update.signature.clone(),
                    result,
                });
            }
        }
        outputs
    }

    pub fn route_slot(&self, update: RawSlotUpdate) -> DemuxOutput {
        DemuxOutput::Slot(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demux() -> EventDemultiplexer {
        EventDemultiplexer::new(crate::constants::BONDING_CURVE_PROGRAM, crate::constants::AMM_PROGRAM)
    }

    #[test]
    fn routes_account_by_owner() {
        let d = demux();
        let update = RawAccountUpdate {
            owner: crate::constants::BONDING_CURVE_PROGRAM,
            pubkey: Pubkey::new_unique(),
            data: vec![0u8; 4],
            slot: 10,
        };
        let out = d.route_account(&update).unwrap();
        match out {
            DemuxOutput::Account { venue, result, .. } => {
                assert_eq!(venue, Venue::BondingCurve);
                assert!(result.is_err());
            }
            _ => panic!("expected account output"),
        }
    }

    #[test]
    fn unrelated_owner_is_ignored() {
        let d = demux();
        let update = RawAccountUpdate {
            owner: Pubkey::new_unique(),
            pubkey: Pubkey::new_unique(),
            data: vec![],
            slot: 1,
        };
        assert!(d.route_account(&update).is_none());
    }

    #[test]
    fn transaction_touching_both_venues_routes_to_both() {
        let d = demux();
        let update = RawTransactionUpdate {
            signature: "sig1".into(),
            account_keys: vec![crate::constants::BONDING_CURVE_PROGRAM, crate::constants::AMM_PROGRAM],
            log_messages: vec![],
            slot: 5,
        };
        let outputs = d.route_transaction(&update);
        assert!(outputs.is_empty(), "no program-data lines means no trade outputs, not a venue skip");
    }
}
