//! Decimal storage/wire helpers.
//!
//! `rusqlite` has no native arbitrary-precision decimal column type, so
//! every `Decimal` field is stored as `TEXT` holding a fixed
//! 18-fractional-digit string. `Decimal::to_string()`/`from_str` round-trip
//! exactly for any value produced by [`to_storage_text`], which is the only
//! path a `Decimal` should take into or out of rusqlite.

use crate::error::ObservatoryError;
use rust_decimal::Decimal;
use std::str::FromStr;

const STORAGE_SCALE: u32 = 18;

/// Render `value` as fixed 18-fractional-digit text for a `TEXT` column.
pub fn to_storage_text(value: Decimal) -> String {
    value.round_dp(STORAGE_SCALE).to_string()
}

pub fn to_storage_text_opt(value: Option<Decimal>) -> Option<String> {
    value.map(to_storage_text)
}

/// Parse a `TEXT` column back into a `Decimal`.
pub fn from_storage_text(text: &str) -> Result<Decimal, ObservatoryError> {
    Decimal::from_str(text).map_err(|e| ObservatoryError::Storage(format!("bad decimal '{text}': {e}")))
}

pub fn from_storage_text_opt(text: Option<String>) -> Result<Option<Decimal>, ObservatoryError> {
    text.map(|t| from_storage_text(&t)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_small_rates_exactly() {
        let original = dec!(0.00009);
        let text = to_storage_text(original);
        let parsed = from_storage_text(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn renders_fixed_scale_not_scientific_notation() {
        let text = to_storage_text(dec!(0.0000001234));
        assert!(!text.contains('e') && !text.contains('E'));
    }
}
