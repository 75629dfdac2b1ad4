//! Snapshot manifest schema
//!
//! The manifest is the self-describing record of one capture: artifact
//! paths, byte sizes, the HTML checksum, and stage timings. Fields are
//! fixed and schema-versioned; additions bump the version.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::CorrelationId;

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Per-stage capture timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTimings {
    /// Time to pull the serialized HTML out of the driver.
    pub html_ms: u64,
    /// Time for the best-effort screenshot, absent when it was skipped or
    /// failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ms: Option<u64>,
    /// Time to durably persist the manifest (write-tmp, fsync, rename).
    pub persist_ms: u64,
}

/// The on-disk record describing one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: String,
    pub session_id: Uuid,
    pub context_id: String,
    pub correlation_id: CorrelationId,
    pub page_name: String,
    pub captured_at: DateTime<Utc>,
    pub url: String,
    pub title: String,
    pub html_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
    /// SHA-256 of the HTML bytes, lowercase hex.
    pub checksum: String,
    pub html_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_bytes: Option<u64>,
    pub timings: SnapshotTimings,
    pub schema_version: u32,
}

/// Result of `verify`: one boolean per invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub manifest_present: bool,
    pub manifest_parses: bool,
    pub html_present: bool,
    pub checksum_matches: bool,
    /// True when no screenshot was declared, or it was declared and exists.
    pub screenshot_consistent: bool,
}

impl VerifyReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.manifest_present
            && self.manifest_parses
            && self.html_present
            && self.checksum_matches
            && self.screenshot_consistent
    }
}
