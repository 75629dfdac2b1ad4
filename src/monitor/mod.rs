//! Per-session resource monitoring
//!
//! Samples each active session at a configurable interval, classifies the
//! usage against the session's memory budget, and escalates cleanup
//! requests to the session manager on sustained critical pressure. The
//! monitor is stateless beyond its rolling escalation counters; all real
//! state belongs to the sessions it samples.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::events::{Event, EventBus, EventType, Severity};
use crate::session::{CleanupLevel, SessionManager, SessionStatus};

/// Alert classification for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

/// One resource sample for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub memory_mb: u64,
    pub cpu_pct: f32,
    pub disk_mb: u64,
    pub sampled_at: DateTime<Utc>,
    pub alert_level: AlertLevel,
}

/// Background sampler coupled to the session manager.
pub struct ResourceMonitor {
    manager: Arc<SessionManager>,
    config: MonitorConfig,
    events: EventBus,
    system: tokio::sync::Mutex<System>,
    /// Consecutive critical samples per session, driving escalation.
    critical_streak: DashMap<Uuid, u32>,
}

impl ResourceMonitor {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, config: MonitorConfig, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            manager,
            config,
            events,
            system: tokio::sync::Mutex::new(System::new()),
            critical_streak: DashMap::new(),
        })
    }

    /// Run the sampling loop until cancellation.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("resource monitor loop exiting");
                        break;
                    }
                    _ = ticker.tick() => {
                        monitor.sample_all().await;
                    }
                }
            }
        })
    }

    /// Sample every active session once, publishing alerts and requesting
    /// cleanup where warranted.
    pub async fn sample_all(&self) -> Vec<(Uuid, ResourceMetrics)> {
        let sessions = self.manager.list_sessions(Some(SessionStatus::Active));
        let mut samples = Vec::with_capacity(sessions.len());
        for session in sessions {
            let marker = session.profile_marker().await;
            let metrics = self
                .sample_one(marker.as_deref(), session.config().memory_budget_mb)
                .await;
            self.events.publish(
                Event::new(
                    EventType::ResourceAlert,
                    session.correlation().child(),
                    match metrics.alert_level {
                        AlertLevel::Normal => Severity::Debug,
                        AlertLevel::Warning => Severity::Warn,
                        AlertLevel::Critical => Severity::Error,
                    },
                    json!({
                        "memory_mb": metrics.memory_mb,
                        "cpu_pct": metrics.cpu_pct,
                        "disk_mb": metrics.disk_mb,
                        "alert_level": metrics.alert_level,
                    }),
                )
                .with_session(session.id()),
            );

            match metrics.alert_level {
                AlertLevel::Critical => {
                    let streak = {
                        let mut entry = self.critical_streak.entry(session.id()).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    let level = match streak {
                        1 => CleanupLevel::Soft,
                        2 => CleanupLevel::Moderate,
                        _ => CleanupLevel::Aggressive,
                    };
                    warn!(
                        session_id = %session.id(),
                        memory_mb = metrics.memory_mb,
                        streak,
                        cleanup = ?level,
                        "critical resource pressure, requesting cleanup"
                    );
                    self.manager.apply_cleanup(session.id(), level).await;
                }
                AlertLevel::Warning => {
                    info!(
                        session_id = %session.id(),
                        memory_mb = metrics.memory_mb,
                        "session memory above warning threshold"
                    );
                    self.critical_streak.remove(&session.id());
                }
                AlertLevel::Normal => {
                    self.critical_streak.remove(&session.id());
                }
            }
            samples.push((session.id(), metrics));
        }
        samples
    }

    /// Sample one session by locating its browser process via the profile
    /// marker on the command line. Sessions without a live subprocess (the
    /// offline backend) sample as zero usage.
    async fn sample_one(&self, marker: Option<&str>, budget_mb: u64) -> ResourceMetrics {
        let (memory_mb, cpu_pct) = match marker {
            Some(marker) => {
                let mut system = self.system.lock().await;
                system.refresh_processes();
                let mut memory: u64 = 0;
                let mut cpu: f32 = 0.0;
                for process in system.processes().values() {
                    if process.cmd().iter().any(|arg| arg.contains(marker)) {
                        memory += process.memory();
                        cpu += process.cpu_usage();
                    }
                }
                (memory / (1024 * 1024), cpu)
            }
            None => (0, 0.0),
        };
        let disk_mb = match marker {
            Some(marker) => directory_size_mb(Path::new(marker)),
            None => 0,
        };

        ResourceMetrics {
            memory_mb,
            cpu_pct,
            disk_mb,
            sampled_at: Utc::now(),
            alert_level: self.classify(memory_mb, budget_mb),
        }
    }

    /// Classify memory usage against the session budget.
    #[must_use]
    pub fn classify(&self, memory_mb: u64, budget_mb: u64) -> AlertLevel {
        if budget_mb == 0 {
            return AlertLevel::Normal;
        }
        let fraction = memory_mb as f64 / budget_mb as f64;
        if fraction >= self.config.critical_fraction {
            AlertLevel::Critical
        } else if fraction >= self.config.warning_fraction {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

/// Best-effort recursive directory size in megabytes.
fn directory_size_mb(root: &Path) -> u64 {
    fn walk(dir: &Path, budget: &mut u32) -> u64 {
        if *budget == 0 {
            return 0;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut total = 0;
        for entry in entries.flatten() {
            if *budget == 0 {
                break;
            }
            *budget -= 1;
            let path = entry.path();
            if path.is_dir() {
                total += walk(&path, budget);
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
        total
    }
    // Cap the walk so a huge profile cannot stall the sampling loop.
    let mut budget = 4096u32;
    walk(root, &mut budget) / (1024 * 1024)
}
