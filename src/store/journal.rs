//! Append-only JSONL event journal, one file per session.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{is_safe_id, EventJournal};
use crate::config::paths;
use crate::domain::StreamEvent;

pub struct JsonlJournal {
    dir: PathBuf,
}

impl JsonlJournal {
    pub fn new(home: &Path) -> Self {
        Self {
            dir: paths::events_dir(home),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        if !is_safe_id(session_id) {
            anyhow::bail!("Invalid session id for journal: '{}'", session_id);
        }
        Ok(self.dir.join(format!("{}.jsonl", session_id)))
    }

    async fn read_all(&self, session_id: &str) -> Result<Vec<StreamEvent>> {
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: StreamEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }
}

#[async_trait]
impl EventJournal for JsonlJournal {
    async fn append(&self, event: &StreamEvent) -> Result<()> {
        let path = self.path_for(&event.session_id)?;
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create events directory: {}", self.dir.display()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    async fn replay(&self, session_id: &str, after_seq: u64) -> Result<Vec<StreamEvent>> {
        let mut events = self.read_all(session_id).await?;
        events.retain(|e| e.seq > after_seq);
        Ok(events)
    }

    async fn last_seq(&self, session_id: &str) -> Result<u64> {
        Ok(self
            .read_all(session_id)
            .await?
            .iter()
            .map(|e| e.seq)
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventDraft, EventType};
    use serde_json::json;
    use tempfile::TempDir;

    fn event(seq: u64) -> StreamEvent {
        StreamEvent::sequenced(
            "sess_a",
            seq,
            EventDraft::new(EventType::StageChanged, json!({ "seq_hint": seq })),
        )
    }

    #[tokio::test]
    async fn test_append_and_replay_after_seq() {
        let temp = TempDir::new().unwrap();
        let journal = JsonlJournal::new(temp.path());

        for seq in 1..=5 {
            journal.append(&event(seq)).await.unwrap();
        }

        let replayed = journal.replay("sess_a", 3).await.unwrap();
        let seqs: Vec<u64> = replayed.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(journal.last_seq("sess_a").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_empty_journal() {
        let temp = TempDir::new().unwrap();
        let journal = JsonlJournal::new(temp.path());

        assert!(journal.replay("sess_new", 0).await.unwrap().is_empty());
        assert_eq!(journal.last_seq("sess_new").await.unwrap(), 0);
    }
}
