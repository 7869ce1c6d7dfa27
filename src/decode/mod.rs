//! Multi-venue binary account and transaction-event decoders (spec §4.4).
//!
//! Each venue exposes an account decoder and an event decoder returning a
//! closed sum type; the [`crate::demux::EventDemultiplexer`] is the only
//! caller that needs to know which venue a raw update came from.

pub mod amm_pool;
pub mod bonding_curve;
pub mod events;

use crate::error::CoreError;

/// The two venues this core decodes. Stored as a compact enum everywhere
/// except at a storage encoding boundary, where it becomes
/// `"bonding_curve"` / `"amm_pool"` (spec §9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    BondingCurve,
    AmmPool,
}

impl Venue {
    pub fn as_str(self) -> &'static str {
        match self {
            Venue::BondingCurve => "bonding_curve",
            Venue::AmmPool => "amm_pool",
        }
    }
}

/// A decoded account-state snapshot from either venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRecord {
    BondingCurve(bonding_curve::BondingCurveSnapshot),
    AmmPool(amm_pool::PoolStateSnapshot),
}

/// A decoded trade event from either venue, normalized to a common shape
/// the rest of the pipeline consumes without matching on venue again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeRecord {
    pub venue: Venue,
    pub direction: Direction,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub post_trade_virtual_sol_reserves: u64,
    pub post_trade_virtual_token_reserves: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

impl From<bonding_curve::BondingCurveTradeEvent> for TradeRecord {
    fn from(ev: bonding_curve::BondingCurveTradeEvent) -> Self {
        let direction = match ev.direction {
            bonding_curve::TradeDirection::Buy => Direction::Buy,
            bonding_curve::TradeDirection::Sell => Direction::Sell,
        };
        TradeRecord {
            venue: Venue::BondingCurve,
            direction,
            sol_amount: ev.sol_amount(),
            token_amount: ev.token_amount(),
            post_trade_virtual_sol_reserves: ev.post_trade_virtual_sol_reserves(),
            post_trade_virtual_token_reserves: ev.post_trade_virtual_token_reserves(),
        }
    }
}

impl From<amm_pool::AmmTradeEvent> for TradeRecord {
    fn from(ev: amm_pool::AmmTradeEvent) -> Self {
        let direction = match ev.direction {
            amm_pool::TradeDirection::Buy => Direction::Buy,
            amm_pool::TradeDirection::Sell => Direction::Sell,
        };
        TradeRecord {
            venue: Venue::AmmPool,
            direction,
            sol_amount: ev.sol_amount(),
            token_amount: ev.token_amount(),
            post_trade_virtual_sol_reserves: ev.post_trade_virtual_sol_reserves(),
            post_trade_virtual_token_reserves: ev.post_trade_virtual_token_reserves(),
        }
    }
}

/// Decode every `Program data:` log line as a trade event for `venue`,
/// skipping entries whose discriminator doesn't match either Buy or Sell
/// for that venue (they belong to a different instruction entirely).
pub fn decode_trade_events(venue: Venue, log_messages: &[String]) -> Vec<Result<TradeRecord, CoreError>> {
    events::extract_program_data(log_messages)
        .into_iter()
        .filter_map(|payload| match venue {
            Venue::BondingCurve => match bonding_curve::BondingCurveTradeEvent::decode(&payload) {
                Ok(ev) => Some(Ok(ev.into())),
                Err(CoreError::DecodeDiscriminatorUnknown { .. }) => None,
                Err(e) => Some(Err(e)),
            },
            Venue::AmmPool => match amm_pool::AmmTradeEvent::decode(&payload) {
                Ok(ev) => Some(Ok(ev.into())),
                Err(CoreError::DecodeDiscriminatorUnknown { .. }) => None,
                Err(e) => Some(Err(e)),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_string_encoding() {
        assert_eq!(Venue::BondingCurve.as_str(), "bonding_curve");
        assert_eq!(Venue::AmmPool.as_str(), "amm_pool");
        assert_eq!(Direction::Buy.as_str(), "buy");
        assert_eq!(Direction::Sell.as_str(), "sell");
    }
}
