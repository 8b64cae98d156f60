//! Snapshot data module.
//!
//! Provides:
//! - Capture and manifest types
//! - SHA-256 sidecar checksums
//! - The write-once snapshot store with manifest validation
//! - Entry/exit capture sessions

pub mod capture;
pub mod checksum;
pub mod store;
pub mod types;

pub use capture::{
    list_pending_exits, CaptureError, CaptureSession, FetchError, SnapshotSource,
};
pub use checksum::{ChecksumStore, IntegrityError};
pub use store::{SnapshotStore, StoreError, StoreResult, ValidationError};
pub use types::{
    parse_expiry, parse_timestamp, Capture, CaptureRef, ChainRow, ContractKey, Manifest,
    ManifestOrigin, OptionType, SnapshotRefs,
};
