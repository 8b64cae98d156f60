//! Snapshot store for captures and run manifests.
//!
//! Directory layout under the store root:
//! - `runs/<run_id>/manifest.json` plus every capture the run references
//! - `manifest.json` at the root (legacy singleton, fallback only)
//!
//! Captures are write-once: file names carry a capture timestamp tag and
//! are opened create-new, so an existing file is never overwritten. Every
//! written file gets a SHA-256 sidecar (see [`ChecksumStore`]).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::checksum::{ChecksumStore, IntegrityError};
use super::types::{
    format_timestamp, parse_timestamp, Capture, CaptureRef, ChainRow, Manifest, ManifestOrigin,
};

/// Directory holding one sub-directory per run.
pub const RUNS_DIR: &str = "runs";

/// Manifest file name, both per run and for the legacy singleton.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Run id given to the legacy singleton manifest when it carries none.
pub const LEGACY_RUN_ID: &str = "legacy";

/// Required manifest keys with their accepted aliases.
pub const REQUIRED_MANIFEST_FIELDS: &[(&str, &[&str])] = &[
    ("run_id", &[]),
    ("instrument", &["ticker"]),
    ("created_at", &["captured_at_t0_utc"]),
    ("data_source", &[]),
    ("pricing_rule", &[]),
    ("contract_key", &[]),
    ("snapshots", &[]),
];

/// Required `contract_key` keys with their accepted aliases.
pub const REQUIRED_CONTRACT_FIELDS: &[(&str, &[&str])] = &[
    ("side", &["optionType", "type"]),
    ("expiry", &["expiry_epoch"]),
    ("strike", &[]),
    ("contract_id", &["contractSymbol"]),
];

/// Required top-level capture keys (after `meta` normalisation).
pub const REQUIRED_CAPTURE_FIELDS: &[&str] = &["ticker", "spot", "timestamp", "chain"];

/// Required keys on every chain row.
pub const REQUIRED_CHAIN_FIELDS: &[&str] = &["contractSymbol", "expiry", "strike", "optionType"];

const NON_FINITE_TOKENS: &[&str] = &["-Infinity", "Infinity", "NaN"];
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{context} missing required field(s): {}", .fields.join(", "))]
    MissingFields { context: String, fields: Vec<String> },

    #[error("{context}: invalid field `{field}`: {reason}")]
    InvalidField {
        context: String,
        field: String,
        reason: String,
    },

    #[error("{context}: malformed JSON: {reason}")]
    MalformedJson { context: String, reason: String },

    #[error("{0}: chain is empty")]
    EmptyChain(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk capture layout written by the store.
#[derive(Serialize)]
struct CaptureFile<'a> {
    ticker: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    spot: Decimal,
    timestamp: String,
    chain: &'a [ChainRow],
}

/// File store for captures and manifests rooted at one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    /// Manifest path for a run, or the legacy singleton for `None`.
    pub fn manifest_path(&self, run_id: Option<&str>) -> PathBuf {
        match run_id {
            Some(id) => self.run_dir(id).join(MANIFEST_FILE),
            None => self.root.join(MANIFEST_FILE),
        }
    }

    /// Compose the path of a capture file. Performs no I/O.
    pub fn resolve_capture_path(&self, filename: &str, run_id: Option<&str>) -> PathBuf {
        match run_id {
            Some(id) => self.run_dir(id).join(filename),
            None => self.root.join(filename),
        }
    }

    /// Path of a capture referenced by `manifest`, honouring where it was loaded from.
    pub fn capture_path_for(&self, manifest: &Manifest, filename: &str) -> PathBuf {
        match manifest.origin {
            ManifestOrigin::RunDirectory => self.resolve_capture_path(filename, Some(&manifest.run_id)),
            ManifestOrigin::Legacy => self.resolve_capture_path(filename, None),
        }
    }

    /// Serialize a capture to a new timestamped file and write its sidecar.
    ///
    /// The file name is `<ticker>_chain_<label>[_<expiry>]_<YYYYmmdd_HHMMSS>.json`
    /// where the expiry tag is present when the capture covers one expiry.
    pub fn write_capture(
        &self,
        capture: &Capture,
        label: &str,
        run_id: Option<&str>,
    ) -> StoreResult<PathBuf> {
        let dir = match run_id {
            Some(id) => self.run_dir(id),
            None => self.root.clone(),
        };
        fs::create_dir_all(&dir)?;

        let expiries = capture.expiries();
        let expiry_tag = match expiries.as_slice() {
            [single] => format!("_{}", single.format("%Y-%m-%d")),
            _ => String::new(),
        };
        let stem = format!(
            "{}_chain_{}{}_{}",
            capture.instrument.to_lowercase(),
            label,
            expiry_tag,
            timestamp_tag(&Utc::now())
        );

        let (path, file) = create_unique(&dir, &stem)?;
        let payload = CaptureFile {
            ticker: &capture.instrument,
            spot: capture.reference_price,
            timestamp: format_timestamp(&capture.timestamp),
            chain: &capture.chain,
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &payload)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        ChecksumStore::write(&path)?;
        debug!("Wrote capture {} ({} rows)", path.display(), capture.len());
        Ok(path)
    }

    /// Manifest reference for a written capture, read from its sidecar.
    pub fn capture_ref(&self, path: &Path, expiry: Option<NaiveDate>) -> StoreResult<CaptureRef> {
        let checksum = ChecksumStore::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(CaptureRef {
            filename,
            checksum,
            expiry,
        })
    }

    /// Load and validate a capture without checking its checksum.
    pub fn load_capture(&self, path: &Path) -> StoreResult<Capture> {
        let text = fs::read_to_string(path)?;
        let context = display_name(path);
        let value: Value = serde_json::from_str(&sanitize_non_finite(&text)).map_err(|e| {
            ValidationError::MalformedJson {
                context: context.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(capture_from_value(&value, &context)?)
    }

    /// Verify a capture's sidecar (and the digest the manifest recorded) before loading it.
    pub fn load_verified_capture(&self, path: &Path, recorded: Option<&str>) -> StoreResult<Capture> {
        match recorded {
            Some(checksum) => ChecksumStore::verify_recorded(path, checksum)?,
            None => ChecksumStore::verify(path)?,
        };
        self.load_capture(path)
    }

    /// Write a manifest (per run, or the legacy singleton) and its sidecar.
    pub fn write_manifest(&self, manifest: &Manifest, run_id: Option<&str>) -> StoreResult<PathBuf> {
        let path = self.manifest_path(run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_string_pretty(manifest)?;
        body.push('\n');
        fs::write(&path, body)?;
        ChecksumStore::write(&path)?;
        Ok(path)
    }

    /// Load a manifest.
    ///
    /// A run id resolves `runs/<run_id>/manifest.json`; the legacy root
    /// manifest is tried only when no per-run manifest resolves.
    pub fn load_manifest(&self, run_id: Option<&str>) -> StoreResult<Option<Manifest>> {
        if let Some(id) = run_id {
            let path = self.manifest_path(Some(id));
            if path.exists() {
                return self
                    .read_manifest(&path, ManifestOrigin::RunDirectory, Some(id))
                    .map(Some);
            }
            debug!("No manifest for run {}, trying legacy manifest", id);
        }
        let legacy = self.manifest_path(None);
        if legacy.exists() {
            return self
                .read_manifest(&legacy, ManifestOrigin::Legacy, None)
                .map(Some);
        }
        Ok(None)
    }

    /// Verify a manifest's sidecar, then parse and validate it.
    pub fn load_verified_manifest(
        &self,
        path: &Path,
        origin: ManifestOrigin,
        run_id: Option<&str>,
    ) -> StoreResult<Manifest> {
        ChecksumStore::verify(path)?;
        self.read_manifest(path, origin, run_id)
    }

    fn read_manifest(
        &self,
        path: &Path,
        origin: ManifestOrigin,
        run_id: Option<&str>,
    ) -> StoreResult<Manifest> {
        let text = fs::read_to_string(path)?;
        let context = display_name(path);
        let mut value: Value = serde_json::from_str(&sanitize_non_finite(&text)).map_err(|e| {
            ValidationError::MalformedJson {
                context: context.clone(),
                reason: e.to_string(),
            }
        })?;

        if let Some(obj) = value.as_object_mut() {
            let missing_id = obj.get("run_id").map_or(true, Value::is_null);
            if missing_id {
                let id = match origin {
                    ManifestOrigin::RunDirectory => run_id.unwrap_or(LEGACY_RUN_ID),
                    ManifestOrigin::Legacy => LEGACY_RUN_ID,
                };
                obj.insert("run_id".to_string(), Value::String(id.to_string()));
            }
        }

        let mut manifest = manifest_from_value(value, &context)?;
        manifest.origin = origin;
        Ok(manifest)
    }

    /// All run directories containing a manifest, keyed by run id.
    ///
    /// Directories without a manifest are partial runs and are skipped.
    pub fn list_run_manifests(&self) -> StoreResult<BTreeMap<String, PathBuf>> {
        let runs_dir = self.runs_dir();
        let mut manifests = BTreeMap::new();
        if !runs_dir.exists() {
            return Ok(manifests);
        }

        for entry in fs::read_dir(&runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if manifest_path.exists() {
                let run_id = entry.file_name().to_string_lossy().to_string();
                manifests.insert(run_id, manifest_path);
            }
        }
        Ok(manifests)
    }
}

/// `YYYYmmdd_HHMMSS` tag used in capture file names.
pub fn timestamp_tag(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}

fn create_unique(dir: &Path, stem: &str) -> StoreResult<(PathBuf, File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{}.json", stem)
        } else {
            format!("{}_{}.json", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free capture file name for {}", stem),
    )
    .into())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Replace bare `NaN`/`Infinity` tokens (outside strings) with `null`.
///
/// Capture tooling that dumps dataframes emits these for missing quotes.
pub fn sanitize_non_finite(text: &str) -> Cow<'_, str> {
    if !NON_FINITE_TOKENS.iter().any(|t| text.contains(t)) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        let Some(ch) = rest.chars().next() else {
            break;
        };

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            i += ch.len_utf8();
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push_str("null");
            i += token.len();
            continue;
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    Cow::Owned(out)
}

fn is_present(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).map_or(false, |v| !v.is_null())
}

fn missing_fields(obj: &Map<String, Value>, required: &[(&str, &[&str])]) -> Vec<String> {
    required
        .iter()
        .filter(|(name, aliases)| {
            !is_present(obj, name) && !aliases.iter().any(|alias| is_present(obj, alias))
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Validate required manifest keys explicitly, then decode the typed record.
pub fn manifest_from_value(value: Value, context: &str) -> Result<Manifest, ValidationError> {
    let obj = value.as_object().ok_or_else(|| ValidationError::MalformedJson {
        context: context.to_string(),
        reason: "manifest is not a JSON object".to_string(),
    })?;

    let missing = missing_fields(obj, REQUIRED_MANIFEST_FIELDS);
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields {
            context: context.to_string(),
            fields: missing,
        });
    }

    let contract_key = obj
        .get("contract_key")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::InvalidField {
            context: context.to_string(),
            field: "contract_key".to_string(),
            reason: "expected an object".to_string(),
        })?;
    let missing = missing_fields(contract_key, REQUIRED_CONTRACT_FIELDS);
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields {
            context: format!("{} contract_key", context),
            fields: missing,
        });
    }

    let snapshots = obj
        .get("snapshots")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::InvalidField {
            context: context.to_string(),
            field: "snapshots".to_string(),
            reason: "expected an object with entry/exit references".to_string(),
        })?;
    for (side, alias) in [("entry", "t0"), ("exit", "t5")] {
        let refs = snapshots.get(side).or_else(|| snapshots.get(alias));
        if let Some(refs) = refs {
            check_capture_refs(refs).map_err(|reason| ValidationError::InvalidField {
                context: context.to_string(),
                field: format!("snapshots.{}", side),
                reason,
            })?;
        }
    }

    serde_json::from_value(value).map_err(|e| ValidationError::InvalidField {
        context: context.to_string(),
        field: "manifest".to_string(),
        reason: e.to_string(),
    })
}

/// A side of `snapshots` is null, one capture reference, or a list of them.
fn check_capture_refs(refs: &Value) -> Result<(), String> {
    let decoded = match refs {
        Value::Null => return Ok(()),
        Value::Array(_) => Vec::<CaptureRef>::deserialize(refs).map(|_| ()),
        Value::Object(_) => CaptureRef::deserialize(refs).map(|_| ()),
        other => return Err(format!("expected a capture reference or a list, got {}", other)),
    };
    decoded.map_err(|e| e.to_string())
}

fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Normalise either capture form into a validated [`Capture`].
///
/// The rich form keeps `ticker` and `captured_at_utc` under `meta`; those
/// fill in for missing top-level keys.
pub fn capture_from_value(value: &Value, context: &str) -> Result<Capture, ValidationError> {
    let obj = value.as_object().ok_or_else(|| ValidationError::MalformedJson {
        context: context.to_string(),
        reason: "capture is not a JSON object".to_string(),
    })?;
    let meta = obj.get("meta").and_then(Value::as_object);

    let ticker = obj
        .get("ticker")
        .and_then(Value::as_str)
        .or_else(|| meta.and_then(|m| m.get("ticker")).and_then(Value::as_str));
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            meta.and_then(|m| m.get("captured_at_utc"))
                .and_then(Value::as_str)
        });
    let spot = obj.get("spot").filter(|v| !v.is_null());
    let chain = obj.get("chain").and_then(Value::as_array);

    let (Some(ticker), Some(spot), Some(timestamp), Some(chain)) = (ticker, spot, timestamp, chain)
    else {
        let present = [ticker.is_some(), spot.is_some(), timestamp.is_some(), chain.is_some()];
        let fields = REQUIRED_CAPTURE_FIELDS
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name.to_string())
            .collect();
        return Err(ValidationError::MissingFields {
            context: context.to_string(),
            fields,
        });
    };

    let timestamp = parse_timestamp(timestamp).ok_or_else(|| ValidationError::InvalidField {
        context: context.to_string(),
        field: "timestamp".to_string(),
        reason: format!("unrecognised timestamp {:?}", timestamp),
    })?;
    let reference_price = decimal_from_json(spot).ok_or_else(|| ValidationError::InvalidField {
        context: context.to_string(),
        field: "spot".to_string(),
        reason: format!("not a number: {}", spot),
    })?;

    if chain.is_empty() {
        return Err(ValidationError::EmptyChain(context.to_string()));
    }

    let mut rows = Vec::with_capacity(chain.len());
    let mut seen = std::collections::HashSet::with_capacity(chain.len());
    for (idx, raw) in chain.iter().enumerate() {
        let row_context = format!("{} chain[{}]", context, idx);
        let row_obj = raw.as_object().ok_or_else(|| ValidationError::MalformedJson {
            context: row_context.clone(),
            reason: "chain row is not an object".to_string(),
        })?;
        let missing: Vec<String> = REQUIRED_CHAIN_FIELDS
            .iter()
            .filter(|f| !is_present(row_obj, f))
            .map(|f| f.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields {
                context: row_context,
                fields: missing,
            });
        }

        let row: ChainRow =
            serde_json::from_value(raw.clone()).map_err(|e| ValidationError::InvalidField {
                context: row_context.clone(),
                field: "row".to_string(),
                reason: e.to_string(),
            })?;
        if !seen.insert(row.contract_id.clone()) {
            return Err(ValidationError::InvalidField {
                context: row_context,
                field: "contractSymbol".to_string(),
                reason: format!("duplicate contract id {}", row.contract_id),
            });
        }
        rows.push(row);
    }

    Ok(Capture::new(ticker, timestamp, reference_price, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{ContractKey, OptionType, SnapshotRefs};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_row(contract_id: &str, strike: Decimal) -> ChainRow {
        ChainRow {
            contract_id: contract_id.to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
            strike,
            side: OptionType::Call,
            bid: Some(dec!(1.00)),
            ask: Some(dec!(1.20)),
            last: Some(dec!(1.10)),
            iv: Some(0.45),
            open_interest: Some(100),
        }
    }

    fn sample_capture() -> Capture {
        Capture::new(
            "NVDA",
            parse_timestamp("2025-01-10 14:30:00").unwrap(),
            dec!(101.5),
            vec![
                sample_row("NVDA250117C00100000", dec!(100)),
                sample_row("NVDA250117C00105000", dec!(105)),
            ],
        )
    }

    fn sample_manifest(run_id: &str, entry: CaptureRef) -> Manifest {
        Manifest {
            run_id: run_id.to_string(),
            instrument: "NVDA".to_string(),
            created_at: parse_timestamp("2025-01-10 14:30:00").unwrap(),
            data_source: "test".to_string(),
            pricing_rule: "mid_else_last".to_string(),
            contract_key: ContractKey {
                side: OptionType::Call,
                expiry: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
                strike: dec!(100),
                contract_id: "NVDA250117C00100000".to_string(),
            },
            snapshots: SnapshotRefs {
                entry: vec![entry],
                exit: vec![],
            },
            expiries: vec![],
            timezone: Some("UTC".to_string()),
            mode: None,
            extra: Default::default(),
            origin: ManifestOrigin::RunDirectory,
        }
    }

    #[test]
    fn test_resolve_capture_path_is_pure() {
        let store = SnapshotStore::new("/nonexistent/snapshots");
        assert_eq!(
            store.resolve_capture_path("a.json", Some("r1")),
            PathBuf::from("/nonexistent/snapshots/runs/r1/a.json")
        );
        assert_eq!(
            store.resolve_capture_path("a.json", None),
            PathBuf::from("/nonexistent/snapshots/a.json")
        );
        assert!(!Path::new("/nonexistent/snapshots").exists());
    }

    #[test]
    fn test_capture_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let capture = sample_capture();

        let path = store.write_capture(&capture, "entry", Some("r1")).unwrap();
        assert!(path.starts_with(store.run_dir("r1")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("nvda_chain_entry_2025-01-17_"));

        let loaded = store.load_verified_capture(&path, None).unwrap();
        assert_eq!(loaded.len(), capture.len());
        assert_eq!(loaded.instrument, "NVDA");
        assert_eq!(loaded.reference_price, dec!(101.5));
        assert_eq!(loaded.timestamp, capture.timestamp);
        for (a, b) in loaded.chain.iter().zip(capture.chain.iter()) {
            assert_eq!(a.contract_id, b.contract_id);
            assert_eq!(a.expiry, b.expiry);
            assert_eq!(a.strike, b.strike);
            assert_eq!(a.bid, b.bid);
        }
    }

    #[test]
    fn test_write_capture_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let capture = sample_capture();

        let first = store.write_capture(&capture, "entry", None).unwrap();
        let second = store.write_capture(&capture, "entry", None).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn test_tampered_capture_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.write_capture(&sample_capture(), "exit", None).unwrap();

        let text = fs::read_to_string(&path).unwrap().replace("101.5", "109.5");
        fs::write(&path, text).unwrap();

        let err = store.load_verified_capture(&path, None).unwrap_err();
        assert!(matches!(err, StoreError::Integrity(IntegrityError::Mismatch { .. })));
    }

    #[test]
    fn test_rich_capture_form() {
        let raw = r#"{
            "meta": {"ticker": "NVDA", "captured_at_utc": "2025-01-10T14:30:00+00:00"},
            "expiry_epoch": 1737072000,
            "spot": 140.25,
            "chain": [{
                "contractSymbol": "NVDA250117C00140000",
                "expiry": 1737072000,
                "strike": 140.0,
                "bid": NaN,
                "ask": 2.1,
                "last": 2.0,
                "iv": 0.5,
                "optionType": "call",
                "openInterest": 10.0
            }]
        }"#;
        let value: Value = serde_json::from_str(&sanitize_non_finite(raw)).unwrap();
        let capture = capture_from_value(&value, "rich.json").unwrap();

        assert_eq!(capture.instrument, "NVDA");
        assert_eq!(capture.reference_price, dec!(140.25));
        assert_eq!(capture.timestamp, parse_timestamp("2025-01-10 14:30:00").unwrap());
        assert_eq!(capture.chain[0].bid, None);
        assert_eq!(capture.chain[0].open_interest, Some(10));
    }

    #[test]
    fn test_duplicate_contract_ids_rejected() {
        let row = json!({"contractSymbol": "A", "expiry": "2025-01-17", "strike": 1.0, "optionType": "C"});
        let err = capture_from_value(
            &json!({"ticker": "NVDA", "spot": 1.0, "timestamp": "2025-01-10 14:30:00",
                    "chain": [row.clone(), row]}),
            "x.json",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "contractSymbol"));
    }

    #[test]
    fn test_capture_missing_fields_named() {
        let err = capture_from_value(&json!({"chain": []}), "x.json").unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields {
                context: "x.json".to_string(),
                fields: vec!["ticker".to_string(), "spot".to_string(), "timestamp".to_string()],
            }
        );

        let err = capture_from_value(
            &json!({"ticker": "NVDA", "spot": 1.0, "timestamp": "2025-01-10 14:30:00",
                    "chain": [{"contractSymbol": "A", "strike": 1.0}]}),
            "x.json",
        )
        .unwrap_err();
        match err {
            ValidationError::MissingFields { fields, .. } => {
                assert_eq!(fields, vec!["expiry".to_string(), "optionType".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = capture_from_value(
            &json!({"ticker": "NVDA", "spot": 1.0, "timestamp": "2025-01-10 14:30:00", "chain": []}),
            "x.json",
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::EmptyChain("x.json".to_string()));
    }

    #[test]
    fn test_sanitize_non_finite() {
        let raw = r#"{"bid": NaN, "ask": -Infinity, "note": "NaN stays"}"#;
        let clean = sanitize_non_finite(raw);
        assert_eq!(clean, r#"{"bid": null, "ask": null, "note": "NaN stays"}"#);
        assert!(matches!(sanitize_non_finite("{}"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_manifest_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.write_capture(&sample_capture(), "entry", Some("r1")).unwrap();
        let entry = store.capture_ref(&path, None).unwrap();
        let manifest = sample_manifest("r1", entry);

        store.write_manifest(&manifest, Some("r1")).unwrap();
        fs::create_dir_all(store.run_dir("partial")).unwrap();

        let listed = store.list_run_manifests().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key("r1"));

        let loaded = store.load_manifest(Some("r1")).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        let verified = store
            .load_verified_manifest(&listed["r1"], ManifestOrigin::RunDirectory, Some("r1"))
            .unwrap();
        assert_eq!(verified.run_id, "r1");
    }

    #[test]
    fn test_legacy_manifest_is_fallback_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load_manifest(None).unwrap().is_none());

        let entry = CaptureRef {
            filename: "legacy.json".to_string(),
            checksum: "00".to_string(),
            expiry: None,
        };
        let mut legacy = sample_manifest("ignored", entry.clone());
        legacy.run_id = LEGACY_RUN_ID.to_string();
        store.write_manifest(&legacy, None).unwrap();
        store.write_manifest(&sample_manifest("r2", entry), Some("r2")).unwrap();

        let per_run = store.load_manifest(Some("r2")).unwrap().unwrap();
        assert_eq!(per_run.run_id, "r2");
        assert_eq!(per_run.origin, ManifestOrigin::RunDirectory);

        let fallback = store.load_manifest(Some("missing")).unwrap().unwrap();
        assert_eq!(fallback.origin, ManifestOrigin::Legacy);
        assert_eq!(
            store.capture_path_for(&fallback, "legacy.json"),
            dir.path().join("legacy.json")
        );
    }

    #[test]
    fn test_manifest_missing_fields_named() {
        let err = manifest_from_value(
            json!({"run_id": "r1", "ticker": "NVDA", "snapshots": {}}),
            "manifest.json",
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields {
                context: "manifest.json".to_string(),
                fields: vec![
                    "created_at".to_string(),
                    "data_source".to_string(),
                    "pricing_rule".to_string(),
                    "contract_key".to_string(),
                ],
            }
        );
    }

    #[test]
    fn test_manifest_contract_key_fields_named() {
        let err = manifest_from_value(
            json!({
                "run_id": "r1", "ticker": "NVDA", "created_at": "2025-01-10 14:30:00",
                "data_source": "x", "pricing_rule": "mid_else_last",
                "contract_key": {"optionType": "call", "strike": 100.0},
                "snapshots": {"t0": []}
            }),
            "manifest.json",
        )
        .unwrap_err();
        match err {
            ValidationError::MissingFields { context, fields } => {
                assert_eq!(context, "manifest.json contract_key");
                assert_eq!(fields, vec!["expiry".to_string(), "contract_id".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_manifest_aliases_accepted() {
        let manifest = manifest_from_value(
            json!({
                "run_id": "r1",
                "ticker": "NVDA",
                "captured_at_t0_utc": "2025-01-10T14:30:00+00:00",
                "data_source": "Yahoo Finance",
                "pricing_rule": "mid_else_last",
                "contract_key": {
                    "type": "call",
                    "expiry_epoch": 1737072000,
                    "strike": 100.0,
                    "contractSymbol": "NVDA250117C00100000"
                },
                "snapshots": {"t0": [{"file": "a.json", "checksum": "ab"}]},
                "t5_target_rule": "t0_plus_5_trading_days"
            }),
            "manifest.json",
        )
        .unwrap();
        assert_eq!(manifest.instrument, "NVDA");
        assert_eq!(manifest.snapshots.entry[0].filename, "a.json");
        assert!(manifest.snapshots.exit.is_empty());
        assert_eq!(manifest.contract_key.strike, dec!(100));
        assert!(manifest.extra.contains_key("t5_target_rule"));
    }

    fn single_ref_manifest(snapshots: Value) -> Value {
        json!({
            "run_id": "legacy",
            "ticker": "NVDA",
            "created_at": "2025-01-10 14:30:00",
            "timezone": "America/New_York",
            "data_source": "Yahoo Finance",
            "pricing_rule": "mid_else_last",
            "contract_key": {
                "type": "call",
                "expiry": "2025-01-17",
                "strike": 100.0,
                "contractSymbol": "NVDA250117C00100000"
            },
            "snapshots": snapshots
        })
    }

    #[test]
    fn test_manifest_single_object_refs() {
        let manifest = manifest_from_value(
            single_ref_manifest(json!({
                "t0": {"file": "NVDA_chain_t0_20250110_143000.json", "checksum": "ab"},
                "t5": {"file": "NVDA_chain_t5_20250117_143000.json", "checksum": "cd"}
            })),
            "manifest.json",
        )
        .unwrap();
        assert_eq!(manifest.snapshots.entry.len(), 1);
        assert_eq!(manifest.snapshots.entry[0].filename, "NVDA_chain_t0_20250110_143000.json");
        assert_eq!(manifest.snapshots.exit[0].checksum, "cd");
        assert!(manifest.has_exit());

        // entry only, exit still pending
        let pending = manifest_from_value(
            single_ref_manifest(json!({"t0": {"file": "a.json", "checksum": "ab"}, "t5": null})),
            "manifest.json",
        )
        .unwrap();
        assert!(pending.has_entry());
        assert!(!pending.has_exit());
    }

    #[test]
    fn test_manifest_list_refs() {
        let manifest = manifest_from_value(
            single_ref_manifest(json!({
                "entry": [
                    {"filename": "a.json", "checksum": "ab", "expiry": "2025-01-17"},
                    {"filename": "b.json", "checksum": "cd", "expiry": "2025-01-24"}
                ]
            })),
            "manifest.json",
        )
        .unwrap();
        assert_eq!(manifest.snapshots.entry.len(), 2);
        assert_eq!(
            manifest.snapshots.entry[1].expiry,
            Some(NaiveDate::from_ymd_opt(2025, 1, 24).unwrap())
        );
        assert!(manifest.snapshots.exit.is_empty());
    }

    #[test]
    fn test_manifest_bad_refs_name_the_side() {
        let err = manifest_from_value(
            single_ref_manifest(json!({
                "t0": {"file": "a.json", "checksum": "ab"},
                "t5": {"file": "b.json"}
            })),
            "manifest.json",
        )
        .unwrap_err();
        match err {
            ValidationError::InvalidField { field, reason, .. } => {
                assert_eq!(field, "snapshots.exit");
                assert!(reason.contains("checksum"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = manifest_from_value(
            single_ref_manifest(json!({"entry": "a.json"})),
            "manifest.json",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "snapshots.entry"));
    }
}
