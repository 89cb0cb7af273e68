use anyhow::{anyhow, bail, Context, Result};

/// Number of decimals between wei and the chain's display unit.
pub const NATIVE_DECIMALS: u32 = 18;

/// Converts a byte slice to a `0x`-prefixed hex string.
pub fn to_hex<T: AsRef<[u8]>>(data: T) -> String {
    format!("0x{}", hex::encode(data))
}

/// Converts a hex string, with or without `0x`, to a byte vector.
pub fn from_hex(data: &str) -> Result<Vec<u8>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).context("Failed to decode hex string")
}

/// Parses a JSON-RPC quantity (`0x`-prefixed, big-endian hex, no padding rules enforced).
pub fn parse_quantity(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("Quantity is missing 0x prefix: {}", value))?;
    if digits.is_empty() {
        bail!("Empty quantity");
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("Invalid quantity: {}", value))
}

/// Formats a base-unit amount in display units, e.g. `1500000000000000000` -> `1.5`.
pub fn format_units(amount: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }

    let padded = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, padded.trim_end_matches('0'))
}
