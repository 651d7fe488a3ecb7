//! Conversions between chain JSON-RPC quantities/addresses and the values
//! trackers store.

use anyhow::{bail, Context, Result};

/// Parses a `0x`-prefixed hex quantity such as `"0x3b9aca00"`.
pub fn parse_quantity(raw: &str) -> Result<u128> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .with_context(|| format!("quantity {trimmed:?} is missing the 0x prefix"))?;
    if digits.is_empty() {
        bail!("quantity {trimmed:?} has no digits");
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {trimmed:?}"))
}

/// Encodes `value` the way nodes do: lowercase hex, `0x` prefix, no leading zeros.
pub fn encode_quantity(value: u128) -> String {
    format!("{value:#x}")
}

/// Parses a network id as returned by `net_version` (decimal, occasionally hex).
pub fn parse_network_id(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        let value = parse_quantity(trimmed)?;
        return u64::try_from(value).with_context(|| format!("network id {trimmed} overflows u64"));
    }
    trimmed
        .parse::<u64>()
        .with_context(|| format!("invalid network id {trimmed:?}"))
}

/// Validates a 20 byte account address and returns it lowercased with a `0x` prefix.
pub fn normalize_address(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits).with_context(|| format!("address {trimmed:?} is not hex"))?;
    if bytes.len() != 20 {
        bail!("address {trimmed:?} must be 20 bytes, got {}", bytes.len());
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}
