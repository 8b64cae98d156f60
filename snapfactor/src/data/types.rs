//! Core data types for point-in-time option captures.
//!
//! A [`Capture`] is one recording of an instrument's option chain; a
//! [`Manifest`] binds the entry and exit captures of one research run
//! together with the contract chosen at entry time. Field names on disk
//! follow the capture tooling's flat record format (`contractSymbol`,
//! `optionType`, `openInterest`, ...).

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Option side (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

impl Serialize for OptionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OptionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_str(&raw)
            .ok_or_else(|| de::Error::custom(format!("unknown option type: {}", raw)))
    }
}

/// A single row of a captured option chain.
///
/// `contract_id` is the opaque provider identifier and is unique within
/// one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    #[serde(rename = "contractSymbol")]
    pub contract_id: String,

    #[serde(with = "expiry_format")]
    pub expiry: NaiveDate,

    #[serde(with = "rust_decimal::serde::float")]
    pub strike: Decimal,

    #[serde(rename = "optionType")]
    pub side: OptionType,

    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,

    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,

    /// Last traded price
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,

    /// Implied volatility (annualised, decimal)
    #[serde(default)]
    pub iv: Option<f64>,

    #[serde(rename = "openInterest", default, with = "lenient_count")]
    pub open_interest: Option<i64>,
}

impl ChainRow {
    /// Bid-ask spread, defined only when both sides are strictly positive.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO => Some(ask - bid),
            _ => None,
        }
    }

    /// Both bid and ask present and strictly positive.
    pub fn has_two_sided_quote(&self) -> bool {
        self.spread().is_some()
    }
}

/// Immutable point-in-time recording of an instrument's option chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Underlying symbol (e.g., "NVDA")
    pub instrument: String,

    /// Capture time
    pub timestamp: DateTime<Utc>,

    /// Underlying price at capture time
    pub reference_price: Decimal,

    /// Chain rows in provider order
    pub chain: Vec<ChainRow>,
}

impl Capture {
    pub fn new(
        instrument: impl Into<String>,
        timestamp: DateTime<Utc>,
        reference_price: Decimal,
        chain: Vec<ChainRow>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            reference_price,
            chain,
        }
    }

    /// All expiries present in the chain, sorted.
    pub fn expiries(&self) -> Vec<NaiveDate> {
        let mut expiries: Vec<_> = self.chain.iter().map(|r| r.expiry).collect();
        expiries.sort();
        expiries.dedup();
        expiries
    }

    /// Rows for one expiry, in file order. `None` returns every row.
    pub fn rows_for_expiry(&self, expiry: Option<NaiveDate>) -> Vec<&ChainRow> {
        self.chain
            .iter()
            .filter(|r| expiry.map_or(true, |e| r.expiry == e))
            .collect()
    }

    /// Copy of this capture restricted to one expiry.
    pub fn restricted_to(&self, expiry: NaiveDate) -> Capture {
        Capture {
            instrument: self.instrument.clone(),
            timestamp: self.timestamp,
            reference_price: self.reference_price,
            chain: self
                .chain
                .iter()
                .filter(|r| r.expiry == expiry)
                .cloned()
                .collect(),
        }
    }

    pub fn find(&self, contract_id: &str) -> Option<&ChainRow> {
        self.chain.iter().find(|r| r.contract_id == contract_id)
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Identity of the instrument chosen at entry time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractKey {
    #[serde(alias = "optionType", alias = "type")]
    pub side: OptionType,

    #[serde(alias = "expiry_epoch", with = "expiry_format")]
    pub expiry: NaiveDate,

    #[serde(with = "rust_decimal::serde::float")]
    pub strike: Decimal,

    #[serde(alias = "contractSymbol")]
    pub contract_id: String,
}

impl ContractKey {
    pub fn from_row(row: &ChainRow) -> Self {
        Self {
            side: row.side,
            expiry: row.expiry,
            strike: row.strike,
            contract_id: row.contract_id.clone(),
        }
    }
}

/// Reference from a manifest to one capture file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRef {
    #[serde(alias = "file")]
    pub filename: String,

    /// Hex SHA-256 of the capture file as recorded at write time
    pub checksum: String,

    /// Expiry partition this capture covers, if restricted to one
    #[serde(default, with = "opt_expiry_format", skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NaiveDate>,
}

/// Entry and exit capture references of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRefs {
    #[serde(default, alias = "t0", deserialize_with = "capture_ref_list::deserialize")]
    pub entry: Vec<CaptureRef>,

    #[serde(default, alias = "t5", deserialize_with = "capture_ref_list::deserialize")]
    pub exit: Vec<CaptureRef>,
}

/// Metadata record binding the captures of one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,

    #[serde(alias = "ticker")]
    pub instrument: String,

    #[serde(alias = "captured_at_t0_utc", with = "timestamp_format")]
    pub created_at: DateTime<Utc>,

    pub data_source: String,

    pub pricing_rule: String,

    pub contract_key: ContractKey,

    pub snapshots: SnapshotRefs,

    /// Expiry partitions covered by this run
    #[serde(default, with = "expiry_list_format", skip_serializing_if = "Vec::is_empty")]
    pub expiries: Vec<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Unrecognised keys, preserved on round trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,

    /// Where the manifest was loaded from; not part of the file
    #[serde(skip)]
    pub origin: ManifestOrigin,
}

/// Location a manifest was loaded from, which decides where its captures live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManifestOrigin {
    /// `runs/<run_id>/manifest.json`
    #[default]
    RunDirectory,
    /// Singleton `manifest.json` at the store root
    Legacy,
}

impl Manifest {
    pub fn has_entry(&self) -> bool {
        !self.snapshots.entry.is_empty()
    }

    pub fn has_exit(&self) -> bool {
        !self.snapshots.exit.is_empty()
    }

    /// Expiry partitions to build samples for.
    ///
    /// The explicit `expiries` list wins; otherwise the contract key's
    /// expiry is the single partition.
    pub fn expiry_partitions(&self) -> Vec<NaiveDate> {
        if !self.expiries.is_empty() {
            let mut expiries = self.expiries.clone();
            expiries.dedup();
            return expiries;
        }
        vec![self.contract_key.expiry]
    }

    /// Entry capture covering `expiry`, falling back to an unpartitioned one.
    pub fn entry_ref_for(&self, expiry: NaiveDate) -> Option<&CaptureRef> {
        ref_for(&self.snapshots.entry, expiry)
    }

    /// Exit capture covering `expiry`, falling back to an unpartitioned one.
    pub fn exit_ref_for(&self, expiry: NaiveDate) -> Option<&CaptureRef> {
        ref_for(&self.snapshots.exit, expiry)
    }
}

fn ref_for(refs: &[CaptureRef], expiry: NaiveDate) -> Option<&CaptureRef> {
    refs.iter()
        .find(|r| r.expiry == Some(expiry))
        .or_else(|| refs.iter().find(|r| r.expiry.is_none()))
}

/// Parse a capture or manifest timestamp.
///
/// Accepts RFC 3339 and the naive `YYYY-MM-DD HH:MM:SS` form, which is
/// taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Parse an expiry given as a date string, epoch seconds, or digit string.
pub fn parse_expiry(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                return s.parse::<i64>().ok().and_then(epoch_to_date);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s).map(|t| t.date_naive()))
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(epoch_to_date),
        _ => None,
    }
}

fn epoch_to_date(secs: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) mod expiry_format {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let value = Value::deserialize(deserializer)?;
        super::parse_expiry(&value)
            .ok_or_else(|| de::Error::custom(format!("unrecognised expiry: {}", value)))
    }
}

pub(crate) mod opt_expiry_format {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            value => super::parse_expiry(&value)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("unrecognised expiry: {}", value))),
        }
    }
}

pub(crate) mod expiry_list_format {
    use chrono::NaiveDate;
    use serde::ser::SerializeSeq;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        dates: &[NaiveDate],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(dates.len()))?;
        for d in dates {
            seq.serialize_element(&d.format("%Y-%m-%d").to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<NaiveDate>, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;
        values
            .iter()
            .map(|v| {
                super::parse_expiry(v)
                    .ok_or_else(|| de::Error::custom(format!("unrecognised expiry: {}", v)))
            })
            .collect()
    }
}

pub(crate) mod timestamp_format {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("unrecognised timestamp: {}", raw)))
    }
}

/// Capture references written as a list, or as one object by single-expiry
/// manifests of the older layout.
pub(crate) mod capture_ref_list {
    use serde::{Deserialize, Deserializer};

    use super::CaptureRef;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CaptureRef),
        Many(Vec<CaptureRef>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<CaptureRef>, D::Error> {
        Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
            Some(OneOrMany::One(capture_ref)) => vec![capture_ref],
            Some(OneOrMany::Many(refs)) => refs,
            None => Vec::new(),
        })
    }
}

/// Counts that providers emit as integers, floats (`12.0`) or digit strings.
pub(crate) mod lenient_count {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(count: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match count {
            Some(c) => serializer.serialize_i64(*c),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row_json() -> Value {
        serde_json::json!({
            "contractSymbol": "NVDA250117C00100000",
            "expiry": "2025-01-17",
            "strike": 100.0,
            "bid": 1.0,
            "ask": 1.2,
            "last": 1.15,
            "iv": 0.45,
            "optionType": "call",
            "openInterest": 1200.0
        })
    }

    #[test]
    fn test_option_type_parsing() {
        assert_eq!(OptionType::from_str("C"), Some(OptionType::Call));
        assert_eq!(OptionType::from_str("put"), Some(OptionType::Put));
        assert_eq!(OptionType::from_str("CALL"), Some(OptionType::Call));
        assert_eq!(OptionType::from_str("X"), None);
    }

    #[test]
    fn test_chain_row_from_flat_record() {
        let row: ChainRow = serde_json::from_value(row_json()).unwrap();
        assert_eq!(row.contract_id, "NVDA250117C00100000");
        assert_eq!(row.expiry, NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
        assert_eq!(row.strike, dec!(100));
        assert_eq!(row.side, OptionType::Call);
        assert_eq!(row.open_interest, Some(1200));
        assert_eq!(row.spread(), Some(dec!(0.2)));
    }

    #[test]
    fn test_chain_row_missing_quotes() {
        let row: ChainRow = serde_json::from_value(serde_json::json!({
            "contractSymbol": "X",
            "expiry": 1737072000,
            "strike": 50,
            "optionType": "P",
            "bid": null
        }))
        .unwrap();
        assert_eq!(row.bid, None);
        assert_eq!(row.ask, None);
        assert_eq!(row.expiry, NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
        assert!(!row.has_two_sided_quote());
    }

    #[test]
    fn test_parse_expiry_forms() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();
        assert_eq!(parse_expiry(&Value::from("2025-01-17")), Some(expected));
        assert_eq!(parse_expiry(&Value::from("1737072000")), Some(expected));
        assert_eq!(parse_expiry(&Value::from(1737072000_i64)), Some(expected));
        assert_eq!(parse_expiry(&Value::Bool(true)), None);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let a = parse_timestamp("2025-01-10 14:30:00").unwrap();
        let b = parse_timestamp("2025-01-10T14:30:00+00:00").unwrap();
        let c = parse_timestamp("2025-01-10T14:30:00.000000").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_manifest_ref_fallback() {
        let expiry = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();
        let other = NaiveDate::from_ymd_opt(2025, 1, 24).unwrap();
        let manifest = Manifest {
            run_id: "r1".to_string(),
            instrument: "NVDA".to_string(),
            created_at: parse_timestamp("2025-01-10 14:30:00").unwrap(),
            data_source: "test".to_string(),
            pricing_rule: "mid_else_last".to_string(),
            contract_key: ContractKey {
                side: OptionType::Call,
                expiry,
                strike: dec!(100),
                contract_id: "NVDA250117C00100000".to_string(),
            },
            snapshots: SnapshotRefs {
                entry: vec![
                    CaptureRef {
                        filename: "a.json".to_string(),
                        checksum: "00".to_string(),
                        expiry: Some(other),
                    },
                    CaptureRef {
                        filename: "all.json".to_string(),
                        checksum: "11".to_string(),
                        expiry: None,
                    },
                ],
                exit: vec![],
            },
            expiries: vec![],
            timezone: None,
            mode: None,
            extra: Default::default(),
            origin: ManifestOrigin::RunDirectory,
        };

        assert_eq!(manifest.expiry_partitions(), vec![expiry]);
        assert_eq!(manifest.entry_ref_for(other).unwrap().filename, "a.json");
        assert_eq!(manifest.entry_ref_for(expiry).unwrap().filename, "all.json");
        assert!(manifest.exit_ref_for(expiry).is_none());
        assert!(!manifest.has_exit());
    }
}
