//! Native/UI amount conversion.

use rust_decimal::Decimal;

/// Convert a native amount to UI units using the mint's decimals.
///
/// Decimals above 28 (the `Decimal` scale limit) are clamped.
pub fn ui_amount(native: i128, decimals: u8) -> Decimal {
    let scale = u32::from(decimals.min(28));
    Decimal::try_from_i128_with_scale(native, scale).unwrap_or(Decimal::MAX)
}
