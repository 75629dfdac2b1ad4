//! Serializable tab state
//!
//! Cookies, web storage, and the final URL of a tab context, keyed by
//! `(session_id, state_id)` in the state store. Navigation history is not
//! replayed on restore; the state re-enters at its final URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::{Cookie, StorageSnapshot};

/// Current schema version written to disk; readers accept this and older.
pub const BROWSER_STATE_SCHEMA_VERSION: u32 = 1;

/// A saved snapshot of one tab context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserState {
    pub schema_version: u32,
    pub session_id: Uuid,
    pub state_id: String,
    pub url: String,
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub storage: StorageSnapshot,
    pub captured_at: DateTime<Utc>,
}

impl BrowserState {
    /// State-store key for a saved state.
    #[must_use]
    pub fn storage_key(session_id: Uuid, state_id: &str) -> String {
        format!("sessions/{}/states/{state_id}", session_id.simple())
    }

    /// Prefix under which all of a session's states live.
    #[must_use]
    pub fn session_prefix(session_id: Uuid) -> String {
        format!("sessions/{}/states", session_id.simple())
    }
}
