//! Per-session event stream bus.
//!
//! Every session has its own sequence counter, a bounded replay buffer and a
//! broadcast channel for live delivery. Sequencing, journaling, buffering and
//! broadcasting all happen under one per-session lock, so a subscriber that
//! snapshots the buffer and subscribes under the same lock sees every event
//! exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::DEFAULT_BUS_CAPACITY;
use crate::domain::{EventDraft, StreamEvent};
use crate::error::{OrchestratorError, Result};
use crate::store::EventJournal;

struct ChannelState {
    /// `None` until the counter has been seeded from the journal
    next_seq: Option<u64>,
    buffer: VecDeque<StreamEvent>,
}

struct SessionChannel {
    state: AsyncMutex<ChannelState>,
    sender: broadcast::Sender<StreamEvent>,
}

/// Sequences and fans out orchestrator events
pub struct EventBus {
    channels: Mutex<HashMap<String, Arc<SessionChannel>>>,
    capacity: usize,
    journal: Option<Arc<dyn EventJournal>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// In-memory bus keeping `capacity` events per session
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            journal: None,
        }
    }

    /// Also append every event to `journal`; resumes older than the buffer
    /// are served from it
    pub fn with_journal(mut self, journal: Arc<dyn EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn channel(&self, session_id: &str) -> Result<Arc<SessionChannel>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| OrchestratorError::InternalError("event bus lock poisoned".into()))?;

        let capacity = self.capacity;
        let channel = channels
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(capacity);
                Arc::new(SessionChannel {
                    state: AsyncMutex::new(ChannelState {
                        next_seq: None,
                        buffer: VecDeque::with_capacity(capacity),
                    }),
                    sender,
                })
            });
        Ok(Arc::clone(channel))
    }

    /// Drop channels nobody holds, returning how many went.
    ///
    /// Only a journaled bus prunes: the journal reseeds the counter and serves
    /// replays, so a dropped channel loses nothing. A channel referenced by a
    /// subscription or an in-flight publish is kept.
    pub fn prune_idle(&self) -> usize {
        if self.journal.is_none() {
            return 0;
        }
        let Ok(mut channels) = self.channels.lock() else {
            warn!("Event bus lock poisoned, skipping prune");
            return 0;
        };
        let before = channels.len();
        channels.retain(|_, channel| Arc::strong_count(channel) > 1);
        let pruned = before - channels.len();
        if pruned > 0 {
            debug!(pruned, "Pruned idle session channels");
        }
        pruned
    }

    /// Number of sessions with a live channel
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }

    async fn seed(&self, session_id: &str, state: &mut ChannelState) -> Result<u64> {
        if let Some(seq) = state.next_seq {
            return Ok(seq);
        }
        let last = match &self.journal {
            Some(journal) => journal
                .last_seq(session_id)
                .await
                .map_err(OrchestratorError::storage)?,
            None => 0,
        };
        state.next_seq = Some(last + 1);
        Ok(last + 1)
    }

    /// Assign the next `seq` and deliver.
    ///
    /// A journal failure leaves the counter untouched, so no gap is created.
    pub async fn publish(&self, session_id: &str, draft: EventDraft) -> Result<StreamEvent> {
        let channel = self.channel(session_id)?;
        let mut state = channel.state.lock().await;

        let seq = self.seed(session_id, &mut state).await?;
        let event = StreamEvent::sequenced(session_id, seq, draft);

        if let Some(journal) = &self.journal {
            journal
                .append(&event)
                .await
                .map_err(OrchestratorError::storage)?;
        }

        state.next_seq = Some(seq + 1);
        if state.buffer.len() >= self.capacity {
            state.buffer.pop_front();
        }
        state.buffer.push_back(event.clone());

        // No receivers is fine
        let _ = channel.sender.send(event.clone());
        debug!(session_id, seq, event_type = %event.event_type, "Published event");

        Ok(event)
    }

    /// Publish several events in order
    pub async fn publish_all(
        &self,
        session_id: &str,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<StreamEvent>> {
        let mut events = Vec::with_capacity(drafts.len());
        for draft in drafts {
            events.push(self.publish(session_id, draft).await?);
        }
        Ok(events)
    }

    /// Highest `seq` published for the session so far
    pub async fn last_seq(&self, session_id: &str) -> Result<u64> {
        let channel = self.channel(session_id)?;
        let mut state = channel.state.lock().await;
        Ok(self.seed(session_id, &mut state).await? - 1)
    }

    /// Subscribe, replaying events with `seq > from_seq` first.
    ///
    /// `from_seq` is the last sequence the client has already seen; `None`
    /// replays everything still available.
    pub async fn subscribe(&self, session_id: &str, from_seq: Option<u64>) -> Result<Subscription> {
        let after = from_seq.unwrap_or(0);
        let channel = self.channel(session_id)?;
        let mut state = channel.state.lock().await;
        self.seed(session_id, &mut state).await?;

        let receiver = channel.sender.subscribe();
        let backlog = self.backlog(session_id, &state, after).await?;

        Ok(Subscription {
            session_id: session_id.to_string(),
            backlog: backlog.into(),
            receiver,
            channel: Arc::clone(&channel),
            journal: self.journal.clone(),
            last_seq: after,
            closed: false,
        })
    }

    /// Non-blocking read of everything after `after`
    pub async fn events_since(&self, session_id: &str, after: u64) -> Result<Vec<StreamEvent>> {
        let channel = self.channel(session_id)?;
        let mut state = channel.state.lock().await;
        self.seed(session_id, &mut state).await?;
        self.backlog(session_id, &state, after).await
    }

    async fn backlog(
        &self,
        session_id: &str,
        state: &ChannelState,
        after: u64,
    ) -> Result<Vec<StreamEvent>> {
        buffered_or_journal(session_id, state, after, self.journal.as_deref()).await
    }
}

async fn buffered_or_journal(
    session_id: &str,
    state: &ChannelState,
    after: u64,
    journal: Option<&dyn EventJournal>,
) -> Result<Vec<StreamEvent>> {
    let oldest = state.buffer.front().map(|e| e.seq);
    let evicted = match oldest {
        Some(oldest) => oldest > after + 1,
        // Nothing buffered yet but the counter says events exist
        None => state.next_seq.is_some_and(|next| next > after + 1),
    };

    if evicted {
        if let Some(journal) = journal {
            return journal
                .replay(session_id, after)
                .await
                .map_err(OrchestratorError::storage);
        }
        warn!(session_id, after, ?oldest, "Resume point is older than the replay buffer");
    }

    Ok(state
        .buffer
        .iter()
        .filter(|e| e.seq > after)
        .cloned()
        .collect())
}

/// Ordered, deduplicated view of one session's events
pub struct Subscription {
    session_id: String,
    backlog: VecDeque<StreamEvent>,
    receiver: broadcast::Receiver<StreamEvent>,
    channel: Arc<SessionChannel>,
    journal: Option<Arc<dyn EventJournal>>,
    last_seq: u64,
    closed: bool,
}

impl Subscription {
    /// Last delivered `seq`
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Next event in `seq` order; `None` after a terminal event or when the
    /// bus goes away
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }

        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => match self.receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %self.session_id, skipped, "Subscriber lagged, refilling from buffer");
                        if self.refill().await.is_err() {
                            self.closed = true;
                            return None;
                        }
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        self.closed = true;
                        return None;
                    }
                },
            };

            if event.seq <= self.last_seq {
                continue;
            }

            self.last_seq = event.seq;
            if event.is_terminal() {
                self.closed = true;
            }
            return Some(event);
        }
    }

    async fn refill(&mut self) -> Result<()> {
        let state = self.channel.state.lock().await;
        // Drop whatever the lagged receiver still holds; the snapshot covers it
        self.receiver = self.channel.sender.subscribe();
        let backlog = buffered_or_journal(
            &self.session_id,
            &state,
            self.last_seq,
            self.journal.as_deref(),
        )
        .await?;
        self.backlog = backlog.into();
        Ok(())
    }

    /// Adapt into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}
