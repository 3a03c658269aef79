//! Smallest-unit integers to human amounts.

/// Largest accepted `tokenDecimal`. ERC-20 stores decimals as a `uint8`.
pub const MAX_TOKEN_DECIMALS: u32 = 255;

/// Parses an optionally signed run of ASCII digits of any length.
///
/// Explorer amounts routinely exceed `u64`, so the digits go straight to
/// `f64`, which is what the display precision needs anyway. Runs too long
/// for `f64` (about 309 digits) are rejected rather than read as infinity.
pub fn parse_integer(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix('-')
        .or_else(|| raw.strip_prefix('+'))
        .unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// `tokenDecimal` as an exponent, or `None` when it is missing, signed or
/// out of range.
pub fn parse_decimals(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u32>()
        .ok()
        .filter(|decimals| *decimals <= MAX_TOKEN_DECIMALS)
}

/// `raw / 10^decimals`.
pub fn scale(raw: f64, decimals: u32) -> f64 {
    let divisor = 10f64.powi(decimals as i32);
    if divisor.is_finite() {
        raw / divisor
    } else {
        0.0
    }
}

/// Folds `-0.0` into `0.0` so zero amounts never render with a sign.
pub fn normalize_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

pub fn format_fixed(value: f64, places: usize) -> String {
    format!("{:.*}", places, normalize_zero(value))
}
