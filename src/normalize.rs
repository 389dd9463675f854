use crate::data::CoinRecord;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;
use std::str::FromStr;

/// Text fragments lifted verbatim from one table row, before any cleanup.
/// Field names match the keys produced by the in-page extraction script.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawCoinRow {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub image: Option<String>,
    pub price: Option<String>,
    #[serde(rename = "change1h")]
    pub change_1h: Option<String>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<String>,
    #[serde(rename = "volume24h")]
    pub volume_24h: Option<String>,
}

/// Turns one raw row into a typed record. Pure and deterministic: identical
/// input always yields an identical record.
///
/// Returns `None` when the row has no usable name; such rows are dropped
/// before they can count toward a snapshot. A field that fails to parse is
/// absent in the output, never zero, since zero is a valid price.
pub fn normalize(raw: &RawCoinRow, fetched_at: DateTime<Utc>) -> Option<CoinRecord> {
    let name = clean_text(raw.name.as_deref()?);
    if name.is_empty() {
        return None;
    }

    // The page does not always render a symbol cell. Falling back to the
    // last token of the name is a known approximation, not a guarantee.
    let symbol = raw
        .symbol
        .as_deref()
        .map(clean_text)
        .filter(|s| !s.is_empty())
        .or_else(|| name.split_whitespace().last().map(str::to_string))?;

    let record = CoinRecord {
        price: parse_money(raw.price.as_deref(), &name, "price"),
        change_percent_1h: parse_percent(raw.change_1h.as_deref(), &name),
        market_cap: parse_money(raw.market_cap.as_deref(), &name, "marketCap"),
        volume_24h: parse_money(raw.volume_24h.as_deref(), &name, "volume24h"),
        image: raw.image.clone().filter(|s| !s.is_empty()),
        name,
        symbol,
        fetched_at,
    };

    Some(record)
}

/// Strips literal `\n` sequences, real newlines and surrounding whitespace.
fn clean_text(text: &str) -> String {
    text.replace("\\n", " ")
        .replace(['\n', '\r'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses currency text like `"$1,234.56"`. Currency symbol and thousands
/// separators are stripped before parsing; unparsable text is absent.
fn parse_money(text: Option<&str>, coin: &str, field: &str) -> Option<BigDecimal> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }

    let cleaned = text.replace(['$', ','], "");
    match BigDecimal::from_str(cleaned.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{coin}: unparsable {field} text {text:?}, leaving field absent");
            None
        }
    }
}

/// Parses signed percentage text like `"-0.4%"`. The sign is taken from the
/// text itself; anything that does not parse as a decimal is absent rather
/// than guessed at.
fn parse_percent(text: Option<&str>, coin: &str) -> Option<BigDecimal> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }

    let cleaned = text.replace(['%', ','], "");
    match BigDecimal::from_str(cleaned.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{coin}: unparsable change1h text {text:?}, leaving field absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str) -> RawCoinRow {
        RawCoinRow {
            name: Some(name.to_string()),
            ..RawCoinRow::default()
        }
    }

    #[test]
    fn cleans_name_and_escaped_newlines() {
        let mut row = raw("\\nBitcoin\\n  BTC\n");
        row.symbol = Some("BTC".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.name, "Bitcoin BTC");
        assert_eq!(record.symbol, "BTC");
    }

    #[test]
    fn missing_symbol_falls_back_to_last_name_token() {
        let record = normalize(&raw("Bitcoin BTC"), Utc::now()).unwrap();
        assert_eq!(record.symbol, "BTC");

        let mut row = raw("Ethereum ETH");
        row.symbol = Some("   ".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.symbol, "ETH");
    }

    #[test]
    fn empty_name_drops_the_row() {
        assert!(normalize(&raw("  \\n "), Utc::now()).is_none());
        assert!(normalize(&RawCoinRow::default(), Utc::now()).is_none());
    }

    #[test]
    fn parses_currency_text_with_separators() {
        let mut row = raw("Bitcoin BTC");
        row.price = Some("$1,234.56".to_string());
        row.market_cap = Some("$1,234,567,890".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.price, BigDecimal::from_str("1234.56").ok());
        assert_eq!(record.market_cap, BigDecimal::from_str("1234567890").ok());
    }

    #[test]
    fn unparsable_price_is_absent_not_zero() {
        let mut row = raw("Bitcoin BTC");
        row.price = Some("--".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.price, None);

        // Zero is a valid price, distinct from absent.
        row.price = Some("$0".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.price, BigDecimal::from_str("0").ok());
    }

    #[test]
    fn percent_sign_comes_from_the_text() {
        let mut row = raw("Bitcoin BTC");
        row.change_1h = Some("-0.4%".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.change_percent_1h, BigDecimal::from_str("-0.4").ok());

        row.change_1h = Some("2.1%".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.change_percent_1h, BigDecimal::from_str("2.1").ok());

        row.change_1h = Some("n/a".to_string());
        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.change_percent_1h, None);
    }

    #[test]
    fn normalization_is_deterministic() {
        let mut row = raw("Bitcoin BTC");
        row.price = Some("$65,123.00".to_string());
        row.change_1h = Some("-1.2%".to_string());
        row.image = Some("https://example.com/btc.png".to_string());

        let at = Utc::now();
        let first = normalize(&row, at).unwrap();
        let second = normalize(&row, at).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn failed_fields_never_fail_the_row() {
        let mut row = raw("Dogecoin DOGE");
        row.price = Some("?".to_string());
        row.market_cap = Some("?".to_string());
        row.volume_24h = Some("?".to_string());
        row.change_1h = Some("?".to_string());

        let record = normalize(&row, Utc::now()).unwrap();
        assert_eq!(record.name, "Dogecoin DOGE");
        assert!(record.price.is_none());
        assert!(record.market_cap.is_none());
        assert!(record.volume_24h.is_none());
        assert!(record.change_percent_1h.is_none());
    }
}
