//! Chrome profile directory management
//!
//! Every session gets a UUID-named user-data directory, which eliminates
//! SingletonLock contention between concurrent sessions. Profiles left
//! behind by crashed processes are detected through their lock symlink and
//! swept at startup.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROFILE_PREFIX: &str = "pagescout_profile_";

/// RAII wrapper for a profile directory.
///
/// The directory is removed on drop unless ownership is transferred with
/// [`BrowserProfile::into_path`], so an aborted launch never leaks a
/// profile into temp.
#[derive(Debug)]
pub struct BrowserProfile {
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl BrowserProfile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cleanup_on_drop: true,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the profile and return the path, disabling auto-cleanup.
    /// Used when the session backend takes over directory lifetime.
    #[must_use]
    pub fn into_path(mut self) -> PathBuf {
        self.cleanup_on_drop = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for BrowserProfile {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            debug!("removing unused profile directory {}", self.path.display());
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "failed to remove profile directory {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

/// Create a unique profile directory under temp.
///
/// Uses `create_dir` (not `create_dir_all`) so an improbable UUID
/// collision fails loudly instead of sharing a directory.
pub fn create_unique_profile() -> Result<BrowserProfile> {
    let path = std::env::temp_dir().join(format!("{PROFILE_PREFIX}{}", Uuid::new_v4()));
    std::fs::create_dir(&path)
        .with_context(|| format!("create profile directory {}", path.display()))?;
    debug!("created profile directory {}", path.display());
    Ok(BrowserProfile::new(path))
}

/// Whether a profile's `SingletonLock` belongs to a dead process.
///
/// The lock is a symlink targeting `{hostname}-{pid}`; the profile is
/// stale when that pid no longer exists.
#[must_use]
pub fn is_singleton_lock_stale(profile_dir: &Path) -> bool {
    let lock_path = profile_dir.join("SingletonLock");
    if !lock_path.exists() && !lock_path.is_symlink() {
        return true;
    }
    match std::fs::read_link(&lock_path) {
        Ok(target) => {
            let target = target.to_string_lossy();
            let Some(pid) = target.rsplit('-').next().and_then(|p| p.parse::<u32>().ok())
            else {
                warn!("unparseable SingletonLock target {target:?}, treating as active");
                return false;
            };
            let mut system = System::new();
            system.refresh_process(Pid::from_u32(pid));
            let alive = system.process(Pid::from_u32(pid)).is_some();
            if !alive {
                info!("SingletonLock pid {pid} is gone, profile is stale");
            }
            !alive
        }
        // Exists but is not a symlink: corrupted, safe to treat as stale.
        Err(_) => lock_path.is_file(),
    }
}

/// Sweep orphaned profile directories left by previous crashes.
/// Returns how many were removed.
pub fn cleanup_stale_profiles() -> Result<usize> {
    let temp_dir = std::env::temp_dir();
    let entries = std::fs::read_dir(&temp_dir)
        .with_context(|| format!("read temp directory {}", temp_dir.display()))?;

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PROFILE_PREFIX));
        if is_ours && path.is_dir() && is_singleton_lock_stale(&path) {
            info!("sweeping stale profile {}", path.display());
            match std::fs::remove_dir_all(&path) {
                Ok(()) => cleaned += 1,
                Err(e) => warn!("failed to sweep {}: {e}", path.display()),
            }
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_directory_is_removed_on_drop() {
        let profile = create_unique_profile().expect("profile");
        let path = profile.path().to_path_buf();
        assert!(path.exists());
        drop(profile);
        assert!(!path.exists());
    }

    #[test]
    fn into_path_transfers_ownership() {
        let profile = create_unique_profile().expect("profile");
        let path = profile.into_path();
        assert!(path.exists());
        std::fs::remove_dir_all(&path).expect("cleanup");
    }

    #[test]
    fn missing_lock_means_stale() {
        let profile = create_unique_profile().expect("profile");
        assert!(is_singleton_lock_stale(profile.path()));
    }
}
