//! Process configuration, assembled once at startup.
//!
//! Per the design notes, configuration is a value passed into every
//! component's constructor, never read from ambient/global state after
//! start. Precedence (low to high): compiled-in defaults, an optional
//! `config.toml`, environment variables (`LAUNCHSTREAM_*`), CLI flags.

use crate::error::CoreError;
use clap::Parser;
use serde::Deserialize;
use solana_sdk::commitment_config::CommitmentLevel;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "launchstream-ingestor", version, about = "Solana launchpad ingestion core")]
pub struct CliArgs {
    /// Optional path to a config.toml overlay.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Commitment level for the gRPC subscription: processed | confirmed | finalized.
    #[arg(long, env = "LAUNCHSTREAM_COMMITMENT")]
    pub commitment: Option<String>,

    /// Replay from this slot instead of the tip.
    #[arg(long, env = "LAUNCHSTREAM_FROM_SLOT")]
    pub from_slot: Option<u64>,

    /// Override the bonding-curve admission market-cap threshold, in USD.
    #[arg(long, env = "LAUNCHSTREAM_THRESHOLD_USD")]
    pub threshold_usd: Option<f64>,

    #[arg(long, env = "LAUNCHSTREAM_GRPC_ENDPOINT")]
    pub grpc_endpoint: Option<String>,

    #[arg(long, env = "LAUNCHSTREAM_GRPC_X_TOKEN")]
    pub grpc_x_token: Option<String>,

    #[arg(long, env = "LAUNCHSTREAM_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "LAUNCHSTREAM_SOL_PRICE_POLL_SECS")]
    pub sol_price_poll_secs: Option<u64>,

    #[arg(long, env = "LAUNCHSTREAM_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// pretty | json
    #[arg(long, env = "LAUNCHSTREAM_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Overlay read from an optional `config.toml`. Every field is optional so a
/// partial file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
pub struct FileOverlay {
    pub commitment: Option<String>,
    pub from_slot: Option<u64>,
    pub threshold_usd_bc: Option<f64>,
    pub threshold_usd_amm: Option<f64>,
    pub grpc_endpoint: Option<String>,
    pub grpc_x_token: Option<String>,
    pub database_url: Option<String>,
    pub sol_price_poll_secs: Option<u64>,
    pub metrics_addr: Option<String>,
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// The fully resolved, immutable configuration value threaded through every
/// component's constructor.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub commitment: CommitmentLevel,
    pub from_slot: Option<u64>,
    pub threshold_usd_bc: f64,
    pub threshold_usd_amm: f64,
    pub grpc_endpoint: String,
    pub grpc_x_token: Option<String>,
    pub database_url: String,
    pub sol_price_poll_interval: Duration,
    pub metrics_addr: String,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn load(args: CliArgs) -> Result<Self, CoreError> {
        let overlay = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::ConfigInvalid(format!("reading {}: {e}", path.display()))
                })?;
                toml::from_str::<FileOverlay>(&text)
                    .map_err(|e| CoreError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?
            }
            None => FileOverlay::default(),
        };

        let commitment_str = args
            .commitment
            .or(overlay.commitment)
            .unwrap_or_else(|| "confirmed".to_string());
        let commitment = parse_commitment(&commitment_str)?;

        let threshold_usd_bc = args
            .threshold_usd
            .or(overlay.threshold_usd_bc)
            .unwrap_or(crate::constants::economics::DEFAULT_THRESHOLD_USD_BC);
        let threshold_usd_amm =
            overlay.threshold_usd_amm.unwrap_or(crate::constants::economics::DEFAULT_THRESHOLD_USD_AMM);

        if threshold_usd_bc <= 0.0 || threshold_usd_amm <= 0.0 {
            return Err(CoreError::ConfigInvalid(
                "admission thresholds must be positive".to_string(),
            ));
        }

        let grpc_endpoint = args
            .grpc_endpoint
            .or(overlay.grpc_endpoint)
            .unwrap_or_else(|| "http://127.0.0.1:10000".to_string());

        let database_url = args.database_url.or(overlay.database_url).ok_or_else(|| {
            CoreError::ConfigInvalid("database_url must be set via flag, env, or config file".into())
        })?;

        let sol_price_poll_interval = Duration::from_secs(
            args.sol_price_poll_secs.or(overlay.sol_price_poll_secs).unwrap_or(30),
        );

        let metrics_addr = args
            .metrics_addr
            .or(overlay.metrics_addr)
            .unwrap_or_else(|| "127.0.0.1:9090".to_string());

        let log_format = match args
            .log_format
            .or(overlay.log_format)
            .unwrap_or_else(|| "pretty".to_string())
            .as_str()
        {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => {
                return Err(CoreError::ConfigInvalid(format!("unknown log format: {other}")))
            }
        };

        Ok(Self {
            commitment,
            from_slot: args.from_slot.or(overlay.from_slot),
            threshold_usd_bc,
            threshold_usd_amm,
            grpc_endpoint,
            grpc_x_token: args.grpc_x_token.or(overlay.grpc_x_token),
            database_url,
            sol_price_poll_interval,
            metrics_addr,
            log_format,
        })
    }
}

fn parse_commitment(s: &str) -> Result<CommitmentLevel, CoreError> {
    match s {
        "processed" => Ok(CommitmentLevel::Processed),
        "confirmed" => Ok(CommitmentLevel::Confirmed),
        "finalized" => Ok(CommitmentLevel::Finalized),
        other => Err(CoreError::ConfigInvalid(format!("unknown commitment level: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args(database_url: Option<String>) -> CliArgs {
        CliArgs {
            config: None,
            commitment: None,
            from_slot: None,
            threshold_usd: None,
            grpc_endpoint: None,
            grpc_x_token: None,
            database_url,
            sol_price_poll_secs: None,
            metrics_addr: None,
            log_format: None,
        }
    }

    #[test]
    fn missing_database_url_is_config_invalid() {
        let err = AppConfig::load(bare_args(None)).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn defaults_apply_when_only_database_url_given() {
        let cfg = AppConfig::load(bare_args(Some("postgres://x/y".into()))).unwrap();
        assert_eq!(cfg.commitment, CommitmentLevel::Confirmed);
        assert_eq!(cfg.threshold_usd_bc, crate::constants::economics::DEFAULT_THRESHOLD_USD_BC);
        assert_eq!(cfg.threshold_usd_amm, crate::constants::economics::DEFAULT_THRESHOLD_USD_AMM);
        assert_eq!(cfg.sol_price_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn rejects_nonpositive_threshold() {
        let mut args = bare_args(Some("postgres://x/y".into()));
        args.threshold_usd = Some(0.0);
        assert!(AppConfig::load(args).is_err());
    }

    #[test]
    fn rejects_unknown_commitment() {
        let mut args = bare_args(Some("postgres://x/y".into()));
        args.commitment = Some("eventual".into());
        assert!(AppConfig::load(args).is_err());
    }
}
