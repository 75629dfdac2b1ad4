//! Snapshot capture, replay, and verification
//!
//! Captures are atomically persisted: HTML and optional screenshot are
//! fsynced first, then the manifest is written through a tmp-file rename
//! and fsync. `capture` does not return until the manifest is durable, so
//! anything ordered after it may read the manifest path directly. Unique
//! snapshot ids (page name + session prefix + per-session monotonic
//! timestamp) make concurrent captures lock-free.

pub mod gating;
pub mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::DriverError;
use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};
use crate::scheduler::Scheduler;
use crate::selector::{ResolveOptions, SelectorEngine};
use crate::session::context::TabContext;

pub use gating::{GatingRule, GatingTable};
pub use manifest::{SnapshotManifest, SnapshotTimings, VerifyReport, MANIFEST_SCHEMA_VERSION};

static PAGE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("static regex"));

/// Snapshot pipeline error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Stored HTML no longer matches the manifest checksum.
    #[error("integrity failure for {manifest}: checksum mismatch")]
    Integrity {
        manifest: PathBuf,
        expected: String,
        actual: String,
        correlation_id: CorrelationId,
    },

    /// The manifest file does not exist.
    #[error("manifest missing at {path}")]
    ManifestMissing {
        path: PathBuf,
        correlation_id: CorrelationId,
    },

    /// HTML was persisted but a later stage failed; partial files were
    /// cleaned up.
    #[error("partial capture during {stage}: {source}")]
    PartialCapture {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid page name {0:?} (want [a-z0-9_]+)")]
    InvalidPageName(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("manifest at {path} does not parse: {source}")]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Produces, persists, and verifies page snapshots. Owns the snapshot
/// directory; all reads and writes go through it.
pub struct SnapshotManager {
    snapshots_dir: PathBuf,
    gating: GatingTable,
    engine: Option<Arc<SelectorEngine>>,
    scheduler: Arc<Scheduler>,
    events: EventBus,
    /// Last issued capture timestamp (unix secs) per session; forced
    /// monotonic so two captures in the same second get distinct ids.
    last_stamp: DashMap<Uuid, i64>,
}

impl SnapshotManager {
    #[must_use]
    pub fn new(
        snapshots_dir: impl Into<PathBuf>,
        gating: GatingTable,
        scheduler: Arc<Scheduler>,
        events: EventBus,
    ) -> Self {
        Self {
            snapshots_dir: snapshots_dir.into(),
            gating,
            engine: None,
            scheduler,
            events,
            last_stamp: DashMap::new(),
        }
    }

    /// Attach a selector engine so gated captures can run readiness waits.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<SelectorEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    /// Capture the page in `ctx` under `page_name`.
    ///
    /// Serialized against other DOM-touching operations on the same
    /// session; captures across sessions run in parallel. On return the
    /// manifest at `{snapshots_dir}/{snapshot_id}.json` is durable.
    pub async fn capture(
        &self,
        ctx: &TabContext,
        page_name: &str,
    ) -> Result<SnapshotManifest, SnapshotError> {
        if !PAGE_NAME.is_match(page_name) {
            return Err(SnapshotError::InvalidPageName(page_name.to_string()));
        }
        self.scheduler
            .run_serialized(ctx.session_id(), self.capture_inner(ctx, page_name))
            .await
    }

    async fn capture_inner(
        &self,
        ctx: &TabContext,
        page_name: &str,
    ) -> Result<SnapshotManifest, SnapshotError> {
        let correlation = ctx.correlation().child();
        let captured_at = self.next_capture_stamp(ctx.session_id());
        let session_hex = ctx.session_id().simple().to_string();
        let snapshot_id = format!(
            "{page_name}_{}_{}",
            &session_hex[..8],
            captured_at.format("%Y%m%d_%H%M%S")
        );

        // Pull the document first; a crashed driver fails here with its
        // category intact and nothing on disk.
        let html_t0 = Instant::now();
        let html = ctx.driver().content().await?;
        let html_ms = html_t0.elapsed().as_millis() as u64;

        // Readiness wait only for gated page types.
        if let Some(rule) = self.gating.matching(page_name) {
            self.await_readiness(ctx, rule).await;
        }

        // Screenshot is best-effort; the manifest records its absence.
        let shot_t0 = Instant::now();
        let screenshot = match ctx.driver().screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(page_name, "screenshot failed, capturing without: {e}");
                None
            }
        };
        let screenshot_ms = screenshot.as_ref().map(|_| shot_t0.elapsed().as_millis() as u64);

        let checksum = hex::encode(Sha256::digest(html.as_bytes()));

        let html_path = self.snapshots_dir.join(format!("{snapshot_id}.html"));
        let screenshot_path = screenshot
            .as_ref()
            .map(|_| self.snapshots_dir.join("screenshots").join(format!("{snapshot_id}.png")));

        if let Err(e) = write_synced(&html_path, html.as_bytes()).await {
            self.cleanup_partial(&snapshot_id).await;
            return Err(SnapshotError::PartialCapture {
                stage: "html_persist",
                source: e,
            });
        }
        if let (Some(path), Some(bytes)) = (&screenshot_path, &screenshot) {
            if let Err(e) = write_synced(path, bytes).await {
                self.cleanup_partial(&snapshot_id).await;
                return Err(SnapshotError::PartialCapture {
                    stage: "screenshot_persist",
                    source: e,
                });
            }
        }

        let mut manifest = SnapshotManifest {
            snapshot_id: snapshot_id.clone(),
            session_id: ctx.session_id(),
            context_id: ctx.context_id().to_string(),
            correlation_id: correlation.clone(),
            page_name: page_name.to_string(),
            captured_at,
            url: ctx.current_url(),
            title: ctx.driver().title().await.unwrap_or_default(),
            html_path,
            screenshot_path,
            checksum,
            html_bytes: html.len() as u64,
            screenshot_bytes: screenshot.as_ref().map(|b| b.len() as u64),
            timings: SnapshotTimings {
                html_ms,
                screenshot_ms,
                persist_ms: 0,
            },
            schema_version: MANIFEST_SCHEMA_VERSION,
        };

        // The critical contract: the manifest must be durable before this
        // method returns. Write to a tmp sibling, fsync, rename.
        let persist_t0 = Instant::now();
        let manifest_path = self.manifest_path(&snapshot_id);
        let persisted = async {
            let bytes = serde_json::to_vec_pretty(&manifest)?;
            let tmp = manifest_path.with_extension("json.tmp");
            write_synced(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &manifest_path).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        if let Err(e) = persisted {
            self.cleanup_partial(&snapshot_id).await;
            return Err(SnapshotError::PartialCapture {
                stage: "manifest_persist",
                source: e,
            });
        }
        manifest.timings.persist_ms = persist_t0.elapsed().as_millis() as u64;

        info!(
            snapshot_id,
            html_bytes = manifest.html_bytes,
            screenshot = manifest.screenshot_path.is_some(),
            "snapshot captured"
        );
        self.emit(EventType::SnapshotCaptured, &correlation, ctx, &manifest);
        self.emit(EventType::SnapshotPersisted, &correlation, ctx, &manifest);
        ctx.touch();
        Ok(manifest)
    }

    /// Load a snapshot back: manifest, then HTML, re-validating the
    /// checksum byte for byte.
    pub async fn replay(
        &self,
        manifest_path: &Path,
        correlation: &CorrelationId,
    ) -> Result<(String, SnapshotManifest), SnapshotError> {
        let manifest = self.read_manifest(manifest_path, correlation).await?;
        let html = tokio::fs::read(&manifest.html_path).await.map_err(|_| {
            SnapshotError::ManifestMissing {
                path: manifest.html_path.clone(),
                correlation_id: correlation.clone(),
            }
        })?;
        let actual = hex::encode(Sha256::digest(&html));
        if actual != manifest.checksum {
            return Err(SnapshotError::Integrity {
                manifest: manifest_path.to_path_buf(),
                expected: manifest.checksum.clone(),
                actual,
                correlation_id: correlation.clone(),
            });
        }
        let html = String::from_utf8_lossy(&html).into_owned();
        Ok((html, manifest))
    }

    /// Check every invariant without returning the HTML bytes.
    pub async fn verify(
        &self,
        manifest_path: &Path,
        correlation: &CorrelationId,
    ) -> Result<VerifyReport, SnapshotError> {
        let mut report = VerifyReport {
            manifest_present: manifest_path.exists(),
            manifest_parses: false,
            html_present: false,
            checksum_matches: false,
            screenshot_consistent: false,
        };
        if !report.manifest_present {
            return Ok(report);
        }
        let manifest = match self.read_manifest(manifest_path, correlation).await {
            Ok(manifest) => manifest,
            Err(SnapshotError::ManifestCorrupt { .. }) => return Ok(report),
            Err(e) => return Err(e),
        };
        report.manifest_parses = true;

        if let Ok(html) = tokio::fs::read(&manifest.html_path).await {
            report.html_present = true;
            report.checksum_matches = hex::encode(Sha256::digest(&html)) == manifest.checksum;
        }
        report.screenshot_consistent = match &manifest.screenshot_path {
            Some(path) => path.exists(),
            None => true,
        };

        self.events.publish(
            Event::new(
                EventType::SnapshotVerified,
                correlation.clone(),
                if report.passed() {
                    Severity::Info
                } else {
                    Severity::Warn
                },
                json!({
                    "snapshot_id": manifest.snapshot_id,
                    "passed": report.passed(),
                    "checksum_matches": report.checksum_matches,
                }),
            )
            .with_session(manifest.session_id),
        );
        Ok(report)
    }

    /// Manifest path for a snapshot id.
    #[must_use]
    pub fn manifest_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{snapshot_id}.json"))
    }

    async fn read_manifest(
        &self,
        path: &Path,
        correlation: &CorrelationId,
    ) -> Result<SnapshotManifest, SnapshotError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotError::ManifestMissing {
                    path: path.to_path_buf(),
                    correlation_id: correlation.clone(),
                });
            }
            Err(e) => {
                return Err(SnapshotError::ManifestCorrupt {
                    path: path.to_path_buf(),
                    source: e.into(),
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::ManifestCorrupt {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Bounded, tolerant readiness wait for gated page types.
    async fn await_readiness(&self, ctx: &TabContext, rule: &GatingRule) {
        let Some(engine) = &self.engine else {
            debug!(
                selector = %rule.readiness_semantic_name,
                "gating rule matched but no selector engine attached, skipping wait"
            );
            return;
        };
        let budget = Duration::from_millis(rule.timeout_ms);
        let waited = tokio::time::timeout(
            budget,
            engine.resolve(ctx, &rule.readiness_semantic_name, &ResolveOptions::default()),
        )
        .await;
        match waited {
            Ok(Ok(result)) if result.resolved() => {}
            Ok(Ok(_)) | Ok(Err(_)) => {
                debug!(
                    selector = %rule.readiness_semantic_name,
                    "readiness selector did not resolve before capture"
                );
            }
            Err(_) => {
                debug!(
                    selector = %rule.readiness_semantic_name,
                    budget_ms = rule.timeout_ms,
                    "readiness wait hit its budget"
                );
            }
        }
    }

    /// Monotonic per-session capture timestamp.
    fn next_capture_stamp(&self, session_id: Uuid) -> DateTime<Utc> {
        let mut entry = self.last_stamp.entry(session_id).or_insert(0);
        let now = Utc::now().timestamp();
        let stamp = now.max(*entry + 1);
        *entry = stamp;
        Utc.timestamp_opt(stamp, 0).single().unwrap_or_else(Utc::now)
    }

    /// Remove whatever a failed capture left behind.
    async fn cleanup_partial(&self, snapshot_id: &str) {
        for path in [
            self.snapshots_dir.join(format!("{snapshot_id}.html")),
            self.snapshots_dir.join("screenshots").join(format!("{snapshot_id}.png")),
            self.snapshots_dir.join(format!("{snapshot_id}.json.tmp")),
            self.snapshots_dir.join(format!("{snapshot_id}.json")),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed partial capture file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not remove partial file {}: {e}", path.display()),
            }
        }
    }

    fn emit(
        &self,
        event_type: EventType,
        correlation: &CorrelationId,
        ctx: &TabContext,
        manifest: &SnapshotManifest,
    ) {
        self.events.publish(
            Event::new(
                event_type,
                correlation.clone(),
                Severity::Info,
                json!({
                    "snapshot_id": manifest.snapshot_id,
                    "page_name": manifest.page_name,
                    "checksum": manifest.checksum,
                    "html_bytes": manifest.html_bytes,
                    "timings": manifest.timings,
                }),
            )
            .with_session(ctx.session_id())
            .with_context(ctx.context_id().to_string()),
        );
    }
}

/// Write bytes and fsync before returning.
async fn write_synced(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
