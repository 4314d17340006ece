//! Shared base-asset normalization table.
//!
//! Every adapter runs its raw venue symbol through [`normalize_base_asset`]
//! before emitting a [`crate::models::ContractSnapshot`]. Centralizing the
//! rule table rather than scattering it per-adapter keeps cross-exchange
//! aggregation correct: two venues that both list a 1000x-denominated meme
//! coin must collapse to the same `base_asset` key or the grid/arbitrage
//! views silently fragment.

/// Longest-prefix-first multiplier strings, checked in this order.
const PREFIX_MULTIPLIERS: &[&str] = &["1000000", "100000", "10000", "1000"];

/// Short-form multiplier prefixes, checked after the long numeric ones.
const SHORT_MULTIPLIERS: &[&str] = &["1M", "1K"];

/// Contract suffixes stripped when extracting the base asset, longest first.
/// `USDTM`/`USDM` cover KuCoin-style futures symbols (e.g. `XBTUSDTM`) where
/// the quote currency and the trailing contract-type `M` are concatenated.
const CONTRACT_SUFFIXES: &[&str] = &[
    "_USDC_PERP", "-PERP", "_PERP", "USDTM", "USDM", "USDT", "USDC", "USD", "M",
];

/// Explicit alias table, consulted last. The `1000X -> X` collapses here
/// duplicate what the generic numeric-prefix rule below would also
/// produce, but spelling them out as aliases documents that the collapse
/// is an intended identity, not an accidental side effect of stripping a
/// price-scale prefix off a token whose real name happens to start with a
/// number.
const ALIASES: &[(&str, &str)] = &[
    ("XBT", "BTC"),
    ("1000PEPE", "PEPE"),
    ("1000BONK", "BONK"),
    ("1000SHIB", "SHIB"),
    ("1000FLOKI", "FLOKI"),
    ("1000SATS", "SATS"),
    ("1000RATS", "RATS"),
    ("1000LUNC", "LUNC"),
    ("1000XEC", "XEC"),
];

/// Collapse a raw exchange symbol fragment (already stripped of quote
/// currency where the caller knows the quote) down to its canonical base
/// asset: strip a leading kilo-denomination marker, strip the contract
/// suffix, then check aliases, then strip a numeric multiplier prefix,
/// then re-check aliases once more.
pub fn normalize_base_asset(raw: &str) -> String {
    let raw = strip_kilo_prefix(raw);
    let upper = raw.to_ascii_uppercase();
    let stripped = strip_contract_suffix(&upper);

    // Explicit documented 1000x aliases, checked before the generic
    // prefix rule so the collapse is attributable to an explicit table
    // entry rather than an incidental prefix match.
    for (from, to) in ALIASES {
        if stripped == *from {
            return (*to).to_string();
        }
    }

    let mut base = stripped.clone();

    // Longest-match-first numeric multiplier prefixes.
    for prefix in PREFIX_MULTIPLIERS {
        if let Some(rest) = base.strip_prefix(prefix) {
            if !rest.is_empty() {
                base = rest.to_string();
                break;
            }
        }
    }

    // Short-form multiplier prefixes (1M, 1K), only if no long-form
    // numeric prefix already matched.
    if base == stripped {
        for prefix in SHORT_MULTIPLIERS {
            if let Some(rest) = base.strip_prefix(prefix) {
                if !rest.is_empty() {
                    base = rest.to_string();
                    break;
                }
            }
        }
    }

    // Explicit aliases, re-checked post-stripping (e.g. an adapter that
    // passes "XBTUSDTM" reaches this point as "XBT" only after suffix
    // stripping, not before).
    for (from, to) in ALIASES {
        if base == *from {
            base = (*to).to_string();
            break;
        }
    }

    base
}

/// Strip a leading kilo-denomination marker from a venue's raw (pre-uppercase)
/// symbol, e.g. a `kSHIB` style listing. Applied before uppercasing, as the
/// first step of [`normalize_base_asset`]'s pipeline, since a bare
/// "starts with K" check on the already-uppercased symbol would be
/// ambiguous (e.g. "KAVA", "KSM" are real tickers, not kilo-denominated
/// wrappers).
pub fn strip_kilo_prefix(raw: &str) -> &str {
    raw.strip_prefix('k').unwrap_or(raw)
}

/// Strip trailing contract-type suffixes, longest first.
fn strip_contract_suffix(symbol: &str) -> String {
    let mut sorted: Vec<&&str> = CONTRACT_SUFFIXES.iter().collect();
    sorted.sort_by_key(|s| std::cmp::Reverse(s.len()));
    for suffix in sorted {
        if let Some(rest) = symbol.strip_suffix(*suffix) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    symbol.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_long_prefix_multipliers() {
        assert_eq!(normalize_base_asset("1000LADYSUSDT"), "LADYS");
        assert_eq!(normalize_base_asset("10000LADYSUSDT"), "LADYS");
        assert_eq!(normalize_base_asset("1000000MOGUSDT"), "MOG");
    }

    #[test]
    fn collapses_short_form_multipliers() {
        assert_eq!(normalize_base_asset("1MBABYDOGEUSDT"), "BABYDOGE");
        assert_eq!(normalize_base_asset("1KNINJAUSDT"), "NINJA");
    }

    #[test]
    fn strips_contract_suffixes() {
        assert_eq!(normalize_base_asset("XBTUSDTM"), "BTC");
        assert_eq!(normalize_base_asset("BTC-PERP"), "BTC");
        assert_eq!(normalize_base_asset("BTC_USDC_PERP"), "BTC");
    }

    #[test]
    fn xbt_alias_to_btc() {
        assert_eq!(normalize_base_asset("XBTUSDTM"), "BTC");
        assert_eq!(normalize_base_asset("XBT"), "BTC");
    }

    #[test]
    fn numeric_prefix_and_alias_agree_across_venues() {
        // Binance's 1000BONKUSDT and KuCoin's 1000BONKUSDTM both collapse
        // to the same base asset.
        assert_eq!(normalize_base_asset("1000BONKUSDT"), "BONK");
        assert_eq!(normalize_base_asset("1000BONKUSDTM"), "BONK");
    }

    #[test]
    fn known_1000x_real_tokens_still_collapse_via_alias() {
        assert_eq!(normalize_base_asset("1000PEPEUSDT"), "PEPE");
    }

    #[test]
    fn unrelated_thousand_suffix_collapses_generically() {
        assert_eq!(normalize_base_asset("1000XUSDT"), "X");
    }

    #[test]
    fn lowercase_kilo_prefix_collapses_before_uppercasing() {
        assert_eq!(normalize_base_asset("kSHIBUSDT"), "SHIB");
    }

    #[test]
    fn uppercase_k_tickers_are_not_mistaken_for_kilo_prefix() {
        assert_eq!(normalize_base_asset("KAVAUSDT"), "KAVA");
        assert_eq!(normalize_base_asset("KSMUSDT"), "KSM");
    }
}
