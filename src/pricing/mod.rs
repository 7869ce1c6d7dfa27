//! Price, USD value and market-cap derivation from virtual reserves (spec
//! §4.5). All arithmetic goes through `rust_decimal` so a ratio of two
//! `u64` reserves never loses precision to a float.

use crate::constants::{decimals, economics};
use crate::decode::Venue;
use crate::error::CoreError;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Derived price signals for a single reserve snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSignals {
    pub price_sol: Decimal,
    pub price_usd: Decimal,
    pub market_cap_usd: Decimal,
}

pub struct PriceCalculator;

impl PriceCalculator {
    /// `price_sol = (sol_reserves / 10^9) / (token_reserves / 10^6)`, with
    /// `price_usd` and `market_cap_usd` derived from it and `sol_usd_quote`.
    ///
    /// For bonding-curve tokens the circulating supply used for market-cap
    /// is the curve's full nominal supply; for AMM tokens it is the pool's
    /// own token reserves (spec §4.5).
    pub fn compute(
        virtual_sol_reserves: u64,
        virtual_token_reserves: u64,
        venue: Venue,
        sol_usd_quote: Decimal,
    ) -> Result<PriceSignals, CoreError> {
        if virtual_sol_reserves == 0 || virtual_token_reserves == 0 {
            return Err(CoreError::ArithmeticPrecision(
                "zero reserve in price calculation".to_string(),
            ));
        }

        let sol_scale = Decimal::from(10u64.pow(decimals::SOL));
        let token_scale = Decimal::from(10u64.pow(decimals::TOKEN));

        let sol_reserves_sol = Decimal::from(virtual_sol_reserves) / sol_scale;
        let token_reserves_tok = Decimal::from(virtual_token_reserves) / token_scale;

        let price_sol = sol_reserves_sol / token_reserves_tok;
        let price_usd = price_sol * sol_usd_quote;

        let circulating_supply = match venue {
            Venue::BondingCurve => Decimal::from(economics::BONDING_CURVE_TOTAL_SUPPLY),
            Venue::AmmPool => token_reserves_tok,
        };
        let market_cap_usd = price_usd * circulating_supply;

        Ok(PriceSignals { price_sol, price_usd, market_cap_usd })
    }

    /// `min(100, (sol_reserves_in_sol / 84) * 100)`, clamped to `[0, 100]`.
    pub fn bonding_curve_progress(virtual_sol_reserves: u64) -> Decimal {
        let sol_reserves_sol = Decimal::from(virtual_sol_reserves) / Decimal::from(10u64.pow(decimals::SOL));
        let target = Decimal::from_f64(economics::MIGRATION_TARGET_SOL).expect("finite constant");
        let progress = (sol_reserves_sol / target) * Decimal::from(100);
        progress.min(Decimal::from(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_one_bc_below_threshold() {
        let signals = PriceCalculator::compute(
            30_000_000_000,
            900_000_000_000_000,
            Venue::BondingCurve,
            Decimal::from(150),
        )
        .unwrap();
        let price_sol: f64 = signals.price_sol.to_f64().unwrap();
        let price_usd: f64 = signals.price_usd.to_f64().unwrap();
        let market_cap: f64 = signals.market_cap_usd.to_f64().unwrap();
        assert!((price_sol - 3.333e-8).abs() < 1e-10);
        assert!((price_usd - 5.0e-6).abs() < 1e-8);
        assert!((market_cap - 5_000.0).abs() < 1.0);
    }

    #[test]
    fn scenario_two_bc_crosses_threshold() {
        let signals = PriceCalculator::compute(
            42_000_000_000,
            700_000_000_000_000,
            Venue::BondingCurve,
            Decimal::from(150),
        )
        .unwrap();
        let market_cap: f64 = signals.market_cap_usd.to_f64().unwrap();
        assert!((market_cap - 9_000.0).abs() < 5.0);
    }

    #[test]
    fn zero_reserve_is_arithmetic_precision_error() {
        let err = PriceCalculator::compute(0, 1, Venue::BondingCurve, Decimal::from(150)).unwrap_err();
        assert!(matches!(err, CoreError::ArithmeticPrecision(_)));
        let err = PriceCalculator::compute(1, 0, Venue::BondingCurve, Decimal::from(150)).unwrap_err();
        assert!(matches!(err, CoreError::ArithmeticPrecision(_)));
    }

    #[test]
    fn homogeneous_in_sol_quote() {
        let base =
            PriceCalculator::compute(42_000_000_000, 700_000_000_000_000, Venue::AmmPool, Decimal::from(100))
                .unwrap();
        let scaled =
            PriceCalculator::compute(42_000_000_000, 700_000_000_000_000, Venue::AmmPool, Decimal::from(300))
                .unwrap();
        assert_eq!(base.price_sol, scaled.price_sol);
        assert_eq!(scaled.price_usd, base.price_usd * Decimal::from(3));
        assert_eq!(scaled.market_cap_usd, base.market_cap_usd * Decimal::from(3));
    }

    #[test]
    fn amm_market_cap_uses_pool_token_reserves() {
        let signals =
            PriceCalculator::compute(42_000_000_000, 700_000_000_000_000, Venue::AmmPool, Decimal::from(150))
                .unwrap();
        let expected_supply = Decimal::new(700_000_000_000_000, decimals::TOKEN);
        assert_eq!(signals.market_cap_usd, signals.price_usd * expected_supply);
    }

    #[test]
    fn bonding_curve_progress_clamped_at_100() {
        let progress = PriceCalculator::bonding_curve_progress(200_000_000_000);
        assert_eq!(progress, Decimal::from(100));
    }

    #[test]
    fn bonding_curve_progress_midpoint() {
        let progress = PriceCalculator::bonding_curve_progress(42_000_000_000);
        let as_f64: f64 = progress.to_f64().unwrap();
        assert!((as_f64 - 50.0).abs() < 0.1);
    }
}
