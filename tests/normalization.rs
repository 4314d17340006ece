//! Property tests over the base-asset normalization rule table: two venues' differently-spelled symbols for the same asset
//! must collapse to one key or the grid/arbitrage views silently fragment.

use funding_observatory::normalize::normalize_base_asset;

#[test]
fn strips_common_quote_and_contract_suffixes() {
    assert_eq!(normalize_base_asset("BTCUSDT"), "BTC");
    assert_eq!(normalize_base_asset("ETHUSDC"), "ETH");
    assert_eq!(normalize_base_asset("ETH-PERP"), "ETH");
    assert_eq!(normalize_base_asset("SOL_USDC_PERP"), "SOL");
}

#[test]
fn kucoin_style_margin_suffix_collapses_to_base() {
    // KuCoin futures concatenate the quote currency and a trailing
    // contract-type `M`, e.g. `XBTUSDTM`.
    assert_eq!(normalize_base_asset("XBTUSDTM"), "BTC");
    assert_eq!(normalize_base_asset("ETHUSDM"), "ETH");
}

#[test]
fn numeric_multiplier_prefixes_collapse_longest_match_first() {
    assert_eq!(normalize_base_asset("1000PEPEUSDT"), "PEPE");
    assert_eq!(normalize_base_asset("1000000BABYDOGEUSDT"), "BABYDOGE");
    assert_eq!(normalize_base_asset("1MBABYDOGEUSDT"), "BABYDOGE");
}

#[test]
fn explicit_aliases_take_priority_over_generic_prefix_rule() {
    assert_eq!(normalize_base_asset("1000BONKUSDT"), "BONK");
    assert_eq!(normalize_base_asset("1000SHIBUSDT"), "SHIB");
}

#[test]
fn same_asset_across_two_differently_spelled_venue_symbols_collapses() {
    let binance_style = normalize_base_asset("1000BONKUSDT");
    let kucoin_style = normalize_base_asset("1000BONKUSDTM");
    assert_eq!(binance_style, kucoin_style);
}

#[test]
fn normalization_is_idempotent() {
    for raw in ["BTCUSDT", "1000BONKUSDT", "XBTUSDTM", "ETH-PERP"] {
        let once = normalize_base_asset(raw);
        let twice = normalize_base_asset(&once);
        assert_eq!(once, twice, "normalizing an already-normalized asset should be a no-op");
    }
}
