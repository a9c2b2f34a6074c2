//! Canonical on-disk layout under the launchkit home.
//!
//! | Location | Contents |
//! |----------|----------|
//! | `sessions/<id>.json` | session record (slots, transcript) |
//! | `runs/<id>.json` | run record and package |
//! | `events/<session>.jsonl` | event journal |

use std::path::{Path, PathBuf};

use anyhow::Result;

/// Get the launchkit home directory
pub fn launchkit_home() -> Result<PathBuf> {
    Ok(crate::config::config()?.home.clone())
}

pub fn sessions_dir(home: &Path) -> PathBuf {
    home.join("sessions")
}

pub fn runs_dir(home: &Path) -> PathBuf {
    home.join("runs")
}

pub fn events_dir(home: &Path) -> PathBuf {
    home.join("events")
}
