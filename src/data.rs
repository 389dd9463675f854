use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the source coin table at a point in time. Every field except
/// `name` may legitimately be missing from the page; absence is `None`,
/// never a sentinel value.
///
/// Serde names match the document layout existing consumers already read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub name: String,
    pub symbol: String,
    pub image: Option<String>,
    pub price: Option<BigDecimal>,
    #[serde(rename = "change1h")]
    pub change_percent_1h: Option<BigDecimal>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<BigDecimal>,
    #[serde(rename = "volume24h")]
    pub volume_24h: Option<BigDecimal>,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: DateTime<Utc>,
}

/// The result of one fully successful extraction cycle. `count` is always
/// `records.len()`; the constructor is the only way to build one, so a
/// reader can never observe the two out of sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: Vec<CoinRecord>,
    pub count: usize,
    pub collected_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(records: Vec<CoinRecord>, collected_at: DateTime<Utc>) -> Self {
        let count = records.len();
        Self {
            records,
            count,
            collected_at,
        }
    }
}

/// Persisted/legacy JSON form of a snapshot:
/// `{ data, count, last_updated, updateCount }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub data: Vec<CoinRecord>,
    pub count: usize,
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "updateCount")]
    pub update_count: u64,
}

/// Presentation shape served to HTTP clients. Numeric fields are coerced to
/// `f64` with a `0` default here and only here; the 1h change keeps the
/// historical `_24h` key the frontend already binds to.
#[derive(Clone, Debug, Serialize)]
pub struct CoinView {
    pub name: String,
    pub symbol: String,
    pub image: Option<String>,
    pub current_price: f64,
    pub price_change_percentage_24h: f64,
}

impl From<&CoinRecord> for CoinView {
    fn from(record: &CoinRecord) -> Self {
        Self {
            name: record.name.clone(),
            symbol: record.symbol.clone(),
            image: record.image.clone(),
            current_price: decimal_or_zero(&record.price),
            price_change_percentage_24h: decimal_or_zero(&record.change_percent_1h),
        }
    }
}

fn decimal_or_zero(value: &Option<BigDecimal>) -> f64 {
    value.as_ref().and_then(|d| d.to_f64()).unwrap_or(0.0)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PageResponse {
    pub data: Vec<CoinView>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record(price: Option<&str>) -> CoinRecord {
        CoinRecord {
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            image: None,
            price: price.map(|p| BigDecimal::from_str(p).unwrap()),
            change_percent_1h: None,
            market_cap: None,
            volume_24h: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_count_tracks_records() {
        let snapshot = Snapshot::new(vec![record(Some("1.0")), record(None)], Utc::now());
        assert_eq!(snapshot.count, snapshot.records.len());
        assert_eq!(snapshot.count, 2);
    }

    #[test]
    fn view_coerces_absent_numbers_to_zero_at_the_boundary() {
        let with_price = CoinView::from(&record(Some("1234.56")));
        assert_eq!(with_price.current_price, 1234.56);

        let without_price = CoinView::from(&record(None));
        assert_eq!(without_price.current_price, 0.0);
        assert_eq!(without_price.price_change_percentage_24h, 0.0);
    }

    #[test]
    fn document_round_trips_consumer_field_names() {
        let doc = SnapshotDocument {
            data: vec![record(Some("2.5"))],
            count: 1,
            last_updated: Utc::now(),
            update_count: 7,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("data").is_some());
        assert!(json.get("count").is_some());
        assert!(json.get("last_updated").is_some());
        assert_eq!(json["updateCount"], 7);

        let back: SnapshotDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back.count, 1);
        assert_eq!(back.update_count, 7);
    }
}
