//! JSON file stores.
//!
//! One file per record. Writes go to a sibling temp file that is renamed
//! into place, so readers never observe a half-written record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use super::{is_safe_id, RunRepository, SessionStore};
use crate::config::paths;
use crate::domain::{Run, Session};

/// Sessions under `<home>/sessions/<id>.json`
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(home: &Path) -> Self {
        Self {
            dir: paths::sessions_dir(home),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        if !is_safe_id(id) {
            return Ok(None);
        }
        read_json(&self.dir.join(format!("{}.json", id))).await
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        write_json_atomic(&self.dir, &session.id, session).await
    }
}

/// Runs under `<home>/runs/<id>.json`
pub struct FileRunRepository {
    dir: PathBuf,
}

impl FileRunRepository {
    pub fn new(home: &Path) -> Self {
        Self {
            dir: paths::runs_dir(home),
        }
    }
}

#[async_trait]
impl RunRepository for FileRunRepository {
    async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        if !is_safe_id(id) {
            return Ok(None);
        }
        read_json(&self.dir.join(format!("{}.json", id))).await
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        write_json_atomic(&self.dir, &run.id, run).await
    }

    async fn list_runs(&self, session_id: &str) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        if !self.dir.exists() {
            return Ok(runs);
        }

        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list runs in {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(run) = read_json::<Run>(&path).await? {
                if run.session_id == session_id {
                    runs.push(run);
                }
            }
        }

        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(dir: &Path, id: &str, value: &T) -> Result<()> {
    if !is_safe_id(id) {
        anyhow::bail!("Refusing to store record with unsafe id '{}'", id);
    }

    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let path = dir.join(format!("{}.json", id));
    let tmp = dir.join(format!(".{}.{}.tmp", id, Uuid::new_v4().simple()));

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize record")?;
    fs::write(&tmp, &json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldPath, Mode, SessionState, SlotUpdate};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_session_persists_slots() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path());

        let mut session = Session::new("ko", Mode::Standard);
        let (slots, _) = session
            .slots
            .apply_batch(&[SlotUpdate::text(FieldPath::ProductName, "Glow Serum", 0.93)], 1)
            .unwrap();
        session.slots = slots;
        store.save_session(&session).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.slots, session.slots);
        assert_eq!(loaded.state, SessionState::ChatCollecting);
        assert_eq!(loaded.locale, "ko");

        // No temp files left behind
        let names: Vec<_> = std::fs::read_dir(paths::sessions_dir(temp.path()))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.json", session.id)]);
    }

    #[tokio::test]
    async fn test_unknown_and_unsafe_ids() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path());

        assert!(store.get_session("sess_missing").await.unwrap().is_none());
        assert!(store.get_session("../../secrets").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_for_session() {
        let temp = TempDir::new().unwrap();
        let repo = FileRunRepository::new(temp.path());

        let first = Run::new("sess_a");
        let second = Run::new("sess_a");
        repo.save_run(&first).await.unwrap();
        repo.save_run(&second).await.unwrap();
        repo.save_run(&Run::new("sess_b")).await.unwrap();

        let runs = repo.list_runs("sess_a").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().any(|r| r.id == first.id));
        assert!(repo.get_run(&second.id).await.unwrap().is_some());
    }
}
