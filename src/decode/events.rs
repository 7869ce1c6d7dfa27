//! Shared helpers for walking transaction log messages and pulling out
//! base64-encoded `Program data:` event payloads (spec §4.4).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// Extract and base64-decode every `Program data: ` log line in order.
/// Malformed base64 is skipped, not an error: a single bad log line must
/// never abort decoding of the rest of the transaction.
pub fn extract_program_data(log_messages: &[String]) -> Vec<Vec<u8>> {
    log_messages
        .iter()
        .filter_map(|line| line.strip_prefix(PROGRAM_DATA_PREFIX))
        .filter_map(|encoded| STANDARD.decode(encoded).ok())
        .collect()
}

/// Read a little-endian `u64` at `offset`, erroring with [`crate::error::CoreError::DecodeShort`]
/// if the buffer is too short.
pub fn read_u64_le(buf: &[u8], offset: usize) -> Result<u64, crate::error::CoreError> {
    let end = offset + 8;
    let slice = buf.get(offset..end).ok_or(crate::error::CoreError::DecodeShort {
        needed: end,
        got: buf.len(),
    })?;
    Ok(u64::from_le_bytes(slice.try_into().expect("slice is exactly 8 bytes")))
}

/// Read a 32-byte pubkey at `offset`.
pub fn read_pubkey(buf: &[u8], offset: usize) -> Result<solana_sdk::pubkey::Pubkey, crate::error::CoreError> {
    let end = offset + 32;
    let slice = buf.get(offset..end).ok_or(crate::error::CoreError::DecodeShort {
        needed: end,
        got: buf.len(),
    })?;
    Ok(solana_sdk::pubkey::Pubkey::new_from_array(slice.try_into().expect("slice is exactly 32 bytes")))
}

/// The 14-field u64-LE event record shared by both venues' Buy/Sell program-data emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTradeFields {
    pub timestamp: u64,
    pub base_amount: u64,
    pub max_quote_amount: u64,
    pub user_base_reserves: u64,
    pub user_quote_reserves: u64,
    pub pool_base_reserves: u64,
    pub pool_quote_reserves: u64,
    pub quote_amount: u64,
    pub lp_fee_bp: u64,
    pub lp_fee: u64,
    pub protocol_fee_bp: u64,
    pub protocol_fee: u64,
    pub quote_amount_with_lp_fee: u64,
    pub user_quote_amount: u64,
}

pub const RAW_TRADE_FIELD_COUNT: usize = 14;
pub const RAW_TRADE_BODY_LEN: usize = RAW_TRADE_FIELD_COUNT * 8;
pub const DISCRIMINATOR_LEN: usize = 8;
pub const RAW_TRADE_MIN_LEN: usize = DISCRIMINATOR_LEN + RAW_TRADE_BODY_LEN;

impl RawTradeFields {
    /// Parse the 14 fields immediately following the 8-byte discriminator.
    pub fn decode(buf: &[u8]) -> Result<Self, crate::error::CoreError> {
        if buf.len() < RAW_TRADE_MIN_LEN {
            return Err(crate::error::CoreError::DecodeShort { needed: RAW_TRADE_MIN_LEN, got: buf.len() });
        }
        let mut at = DISCRIMINATOR_LEN;
        let mut next = || -> Result<u64, crate::error::CoreError> {
            let v = read_u64_le(buf, at)?;
            at += 8;
            Ok(v)
        };
        Ok(Self {
            timestamp: next()?,
            base_amount: next()?,
            max_quote_amount: next()?,
            user_base_reserves: next()?,
            user_quote_reserves: next()?,
            pool_base_reserves: next()?,
            pool_quote_reserves: next()?,
            quote_amount: next()?,
            lp_fee_bp: next()?,
            lp_fee: next()?,
            protocol_fee_bp: next()?,
            protocol_fee: next()?,
            quote_amount_with_lp_fee: next()?,
            user_quote_amount: next()?,
        })
    }

    pub fn discriminator(buf: &[u8]) -> Result<[u8; 8], crate::error::CoreError> {
        buf.get(0..8)
            .and_then(|s| s.try_into().ok())
            .ok_or(crate::error::CoreError::DecodeShort { needed: 8, got: buf.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<u8> {
        let mut buf = vec![0u8; RAW_TRADE_MIN_LEN];
        buf[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        for (i, field) in (0..RAW_TRADE_FIELD_COUNT as u64).enumerate() {
            let off = DISCRIMINATOR_LEN + i * 8;
            buf[off..off + 8].copy_from_slice(&(field * 1000).to_le_bytes());
        }
        buf
    }

    #[test]
    fn decodes_fourteen_fields_in_order() {
        let buf = fixture();
        let fields = RawTradeFields::decode(&buf).unwrap();
        assert_eq!(fields.timestamp, 0);
        assert_eq!(fields.base_amount, 1000);
        assert_eq!(fields.user_quote_amount, 13000);
    }

    #[test]
    fn short_buffer_is_decode_short() {
        let buf = vec![0u8; RAW_TRADE_MIN_LEN - 1];
        let err = RawTradeFields::decode(&buf).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::DecodeShort { .. }));
    }

    #[test]
    fn extracts_only_program_data_lines() {
        let encoded = STANDARD.encode([1, 2, 3]);
        let logs = vec![
            "Program log: hello".to_string(),
            format!("Program data: {encoded}"),
            "Program data: not-valid-base64-!!!".to_string(),
        ];
        let decoded = extract_program_data(&logs);
        assert_eq!(decoded, vec![vec![1, 2, 3]]);
    }
}
