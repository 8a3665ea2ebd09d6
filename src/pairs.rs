//! Symbol mapper (C1): translates between the canonical `BASE/QUOTE`
//! spelling used everywhere in this service and Kraken's REST and
//! streaming symbol spellings.
//!
//! The table is a static, immutable asset list built once at process
//! start — it is never derived from runtime discovery, since only the
//! configured pair universe is ever expected to appear.

use once_cell::sync::Lazy;

use crate::errors::ServiceError;

struct AssetEntry {
    canonical: &'static str,
    rest: &'static str,
    ws: &'static str,
}

// Kraken's actual asset codes for the handful of assets this service
// cares about. REST and WS spellings diverge for assets with the
// legacy `X`/`Z` prefixes (crypto vs. fiat); everything introduced
// post-2019 (USDT, USDC, SOL, ...) uses the same spelling on both.
static ASSETS: &[AssetEntry] = &[
    AssetEntry { canonical: "BTC", rest: "XXBT", ws: "XBT" },
    AssetEntry { canonical: "ETH", rest: "XETH", ws: "ETH" },
    AssetEntry { canonical: "LTC", rest: "XLTC", ws: "LTC" },
    AssetEntry { canonical: "USD", rest: "ZUSD", ws: "USD" },
    AssetEntry { canonical: "EUR", rest: "ZEUR", ws: "EUR" },
    AssetEntry { canonical: "GBP", rest: "ZGBP", ws: "GBP" },
    AssetEntry { canonical: "USDT", rest: "USDT", ws: "USDT" },
    AssetEntry { canonical: "USDC", rest: "USDC", ws: "USDC" },
    AssetEntry { canonical: "SOL", rest: "SOL", ws: "SOL" },
    AssetEntry { canonical: "DOT", rest: "DOT", ws: "DOT" },
];

/// Base REST codes sorted longest-first, used for the longest-prefix
/// match in [`from_rest`] against Kraken's unseparated result keys.
static REST_CODES_BY_LEN: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let mut codes: Vec<&'static str> = ASSETS.iter().map(|a| a.rest).collect();
    codes.sort_by_key(|c| std::cmp::Reverse(c.len()));
    codes
});

fn find_by_canonical(code: &str) -> Option<&'static AssetEntry> {
    ASSETS.iter().find(|a| a.canonical.eq_ignore_ascii_case(code))
}

fn find_by_rest(code: &str) -> Option<&'static AssetEntry> {
    ASSETS.iter().find(|a| a.rest.eq_ignore_ascii_case(code))
}

fn find_by_ws(code: &str) -> Option<&'static AssetEntry> {
    ASSETS.iter().find(|a| a.ws.eq_ignore_ascii_case(code))
}

/// Splits `BASE/QUOTE` into its two upper-cased parts, failing fast on
/// anything that isn't exactly one `/`.
pub fn split_canonical(pair: &str) -> Result<(String, String), ServiceError> {
    let pair = pair.trim().to_uppercase();
    let mut parts = pair.split('/');
    let (base, quote, rest) = (parts.next(), parts.next(), parts.next());
    match (base, quote, rest) {
        (Some(b), Some(q), None) if !b.is_empty() && !q.is_empty() => Ok((b.to_string(), q.to_string())),
        _ => Err(ServiceError::InvalidPair(pair)),
    }
}

/// `A/B` → REST `map_rest(A)+map_rest(B)` (no separator).
pub fn to_rest(pair: &str) -> Result<String, ServiceError> {
    let (base, quote) = split_canonical(pair)?;
    let base = find_by_canonical(&base).ok_or_else(|| ServiceError::InvalidPair(pair.to_string()))?;
    let quote = find_by_canonical(&quote).ok_or_else(|| ServiceError::InvalidPair(pair.to_string()))?;
    Ok(format!("{}{}", base.rest, quote.rest))
}

/// `A/B` → WS `map_ws(A)+"/"+map_ws(B)`.
pub fn to_ws(pair: &str) -> Result<String, ServiceError> {
    let (base, quote) = split_canonical(pair)?;
    let base = find_by_canonical(&base).ok_or_else(|| ServiceError::InvalidPair(pair.to_string()))?;
    let quote = find_by_canonical(&quote).ok_or_else(|| ServiceError::InvalidPair(pair.to_string()))?;
    Ok(format!("{}/{}", base.ws, quote.ws))
}

/// WS `BASE/QUOTE` (already separated by the exchange) → canonical.
pub fn from_ws(ws_symbol: &str) -> Result<String, ServiceError> {
    let mut parts = ws_symbol.trim().split('/');
    let (base, quote, rest) = (parts.next(), parts.next(), parts.next());
    let (base, quote) = match (base, quote, rest) {
        (Some(b), Some(q), None) => (b, q),
        _ => return Err(ServiceError::InvalidPair(ws_symbol.to_string())),
    };
    let base = find_by_ws(base).ok_or_else(|| ServiceError::InvalidPair(ws_symbol.to_string()))?;
    let quote = find_by_ws(quote).ok_or_else(|| ServiceError::InvalidPair(ws_symbol.to_string()))?;
    Ok(format!("{}/{}", base.canonical, quote.canonical))
}

/// REST symbol with no separator (e.g. `XXBTZUSD`) → canonical, resolved
/// by longest-prefix match of the base code against the known asset set.
pub fn from_rest(rest_symbol: &str) -> Result<String, ServiceError> {
    let upper = rest_symbol.trim().to_uppercase();
    for &base_code in REST_CODES_BY_LEN.iter() {
        if let Some(quote_code) = upper.strip_prefix(base_code) {
            if quote_code.is_empty() {
                continue;
            }
            if let (Some(base), Some(quote)) = (find_by_rest(base_code), find_by_rest(quote_code)) {
                return Ok(format!("{}/{}", base.canonical, quote.canonical));
            }
        }
    }
    Err(ServiceError::InvalidPair(rest_symbol.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED_PAIRS: &[&str] = &["BTC/USD", "ETH/USD", "BTC/EUR", "USDT/USD", "SOL/USD"];

    #[test]
    fn to_rest_known_pairs() {
        assert_eq!(to_rest("BTC/USD").unwrap(), "XXBTZUSD");
        assert_eq!(to_rest("ETH/USD").unwrap(), "XETHZUSD");
        assert_eq!(to_rest("USDT/USD").unwrap(), "USDTZUSD");
    }

    #[test]
    fn to_ws_known_pairs() {
        assert_eq!(to_ws("BTC/USD").unwrap(), "XBT/USD");
        assert_eq!(to_ws("ETH/USD").unwrap(), "ETH/USD");
    }

    #[test]
    fn rest_round_trip_for_all_supported_pairs() {
        for pair in SUPPORTED_PAIRS {
            let rest = to_rest(pair).unwrap();
            assert_eq!(from_rest(&rest).unwrap(), *pair);
        }
    }

    #[test]
    fn ws_round_trip_for_all_supported_pairs() {
        for pair in SUPPORTED_PAIRS {
            let ws = to_ws(pair).unwrap();
            assert_eq!(from_ws(&ws).unwrap(), *pair);
        }
    }

    #[test]
    fn case_insensitive_input() {
        assert_eq!(to_rest("btc/usd").unwrap(), "XXBTZUSD");
        assert_eq!(from_ws("xbt/usd").unwrap(), "BTC/USD");
    }

    #[test]
    fn unknown_asset_fails_fast() {
        assert!(to_rest("DOGE/USD").is_err());
        assert!(from_ws("DOGE/USD").is_err());
    }

    #[test]
    fn malformed_pair_rejected() {
        assert!(split_canonical("BTCUSD").is_err());
        assert!(split_canonical("BTC/USD/EUR").is_err());
        assert!(split_canonical("/USD").is_err());
    }

    #[test]
    fn from_rest_tolerates_concatenated_codes() {
        // XXBTZUSD has no separator; longest-prefix match should still
        // resolve XXBT (4 chars) before falling back to shorter codes.
        assert_eq!(from_rest("XXBTZUSD").unwrap(), "BTC/USD");
        assert_eq!(from_rest("USDTZUSD").unwrap(), "USDT/USD");
    }
}
