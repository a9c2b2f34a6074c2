//! Event Stream Integration Tests
//!
//! Tests for sequencing, resume, dedupe and journal-backed replay.

mod common;

use std::sync::Arc;

use launchkit::core::{EventBus, JobScheduler, Orchestrator};
use launchkit::domain::{EventCursor, EventDraft, EventType, Mode, SessionState};
use launchkit::store::{FileRunRepository, FileSessionStore, JsonlJournal};
use serde_json::json;
use tempfile::TempDir;

use common::{healthy_providers, no_delay, ready_session, scheduler, WAIT};

fn draft(n: u64) -> EventDraft {
    EventDraft::new(EventType::SlotUpdated, json!({ "n": n }))
}

#[tokio::test]
async fn test_resume_after_disconnect_delivers_each_event_once() {
    let bus = EventBus::new(64);
    for n in 1..=10 {
        bus.publish("sess_a", draft(n)).await.unwrap();
    }

    // First connection reads up to seq 10, then drops
    let mut first = bus.subscribe("sess_a", None).await.unwrap();
    for expected in 1..=10 {
        assert_eq!(first.next().await.unwrap().seq, expected);
    }
    let last_seen = first.last_seq();
    drop(first);

    for n in 11..=15 {
        bus.publish("sess_a", draft(n)).await.unwrap();
    }

    let mut resumed = bus.subscribe("sess_a", Some(last_seen)).await.unwrap();
    for n in 16..=18 {
        bus.publish("sess_a", draft(n)).await.unwrap();
    }

    let mut seqs = Vec::new();
    for _ in 11..=18 {
        seqs.push(resumed.next().await.unwrap().seq);
    }
    assert_eq!(seqs, (11..=18).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_resume_past_cursor_skips_seen_events() {
    let bus = EventBus::new(64);
    for n in 1..=20 {
        bus.publish("sess_a", draft(n)).await.unwrap();
    }

    let mut sub = bus.subscribe("sess_a", Some(12)).await.unwrap();
    assert_eq!(sub.next().await.unwrap().seq, 13);
}

#[tokio::test]
async fn test_cursor_drops_redelivered_events() {
    let bus = EventBus::new(64);
    let events: Vec<_> = {
        let mut out = Vec::new();
        for n in 1..=4 {
            out.push(bus.publish("sess_a", draft(n)).await.unwrap());
        }
        out
    };

    let mut cursor = EventCursor::resume_from(2);
    let delivered: Vec<u64> = events
        .iter()
        .chain(events.iter())
        .filter(|e| cursor.accept(e))
        .map(|e| e.seq)
        .collect();

    assert_eq!(delivered, vec![3, 4]);
    assert_eq!(cursor.last_seq(), 4);
}

#[tokio::test]
async fn test_evicted_events_are_served_from_journal() {
    let temp = TempDir::new().unwrap();
    let bus = EventBus::new(4).with_journal(Arc::new(JsonlJournal::new(temp.path())));
    for n in 1..=20 {
        bus.publish("sess_a", draft(n)).await.unwrap();
    }

    let seqs: Vec<u64> = bus
        .events_since("sess_a", 5)
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, (6..=20).collect::<Vec<u64>>());

    // Buffer-only bus would have lost everything before 17
    let memory_only = EventBus::new(4);
    for n in 1..=20 {
        memory_only.publish("sess_a", draft(n)).await.unwrap();
    }
    assert_eq!(memory_only.events_since("sess_a", 5).await.unwrap()[0].seq, 17);
}

#[tokio::test]
async fn test_sequence_continues_after_restart() {
    let temp = TempDir::new().unwrap();
    {
        let bus = EventBus::new(8).with_journal(Arc::new(JsonlJournal::new(temp.path())));
        for n in 1..=3 {
            bus.publish("sess_a", draft(n)).await.unwrap();
        }
    }

    let bus = EventBus::new(8).with_journal(Arc::new(JsonlJournal::new(temp.path())));
    assert_eq!(bus.last_seq("sess_a").await.unwrap(), 3);

    let mut sub = bus.subscribe("sess_a", Some(1)).await.unwrap();
    let next = bus.publish("sess_a", draft(4)).await.unwrap();
    assert_eq!(next.seq, 4);

    assert_eq!(sub.next().await.unwrap().seq, 2);
    assert_eq!(sub.next().await.unwrap().seq, 3);
    assert_eq!(sub.next().await.unwrap().seq, 4);
}

#[tokio::test]
async fn test_idle_channels_are_pruned_without_losing_history() {
    let temp = TempDir::new().unwrap();
    let bus = EventBus::new(8).with_journal(Arc::new(JsonlJournal::new(temp.path())));
    for n in 1..=3 {
        bus.publish("sess_a", draft(n)).await.unwrap();
    }
    let held = bus.subscribe("sess_b", None).await.unwrap();

    assert_eq!(bus.prune_idle(), 1);
    assert_eq!(bus.channel_count(), 1);

    // Counter and replay come back from the journal
    assert_eq!(bus.publish("sess_a", draft(4)).await.unwrap().seq, 4);
    let seqs: Vec<u64> = bus
        .events_since("sess_a", 0)
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);

    drop(held);
    assert_eq!(bus.prune_idle(), 2);
}

#[tokio::test]
async fn test_run_stream_is_ordered_and_closes_on_completion() {
    let scheduler = scheduler(healthy_providers());
    let orch = scheduler.orchestrator().clone();
    let session_id = ready_session(&orch).await;

    let last = orch.bus().last_seq(&session_id).await.unwrap();
    let mut sub = orch.bus().subscribe(&session_id, Some(last)).await.unwrap();
    let job = scheduler.submit(&session_id).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = sub.next().await {
        events.push(event);
    }
    scheduler.wait_for_terminal(&job.job_id, WAIT).await.unwrap();

    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (last + 1..=last + events.len() as u64).collect();
    assert_eq!(seqs, expected);

    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::StageChanged,
            EventType::ResearchDelta,
            EventType::StageChanged,
            EventType::StrategyDelta,
            EventType::StageChanged,
            EventType::CreativeDelta,
            EventType::VoiceDelta,
            EventType::AssetReady,
            EventType::AssetReady,
            EventType::StageChanged,
            EventType::RunCompleted,
        ]
    );
    assert!(events.iter().all(|e| e.session_id == session_id));
}

#[tokio::test]
async fn test_file_backed_session_survives_restart() {
    let temp = TempDir::new().unwrap();
    let build = || {
        let bus = EventBus::new(16).with_journal(Arc::new(JsonlJournal::new(temp.path())));
        Arc::new(
            Orchestrator::new(
                Arc::new(FileSessionStore::new(temp.path())),
                Arc::new(FileRunRepository::new(temp.path())),
                Arc::new(bus),
                healthy_providers(),
            )
            .with_retry_policy(no_delay()),
        )
    };

    let session_id = {
        let orch = build();
        let session = orch.create_session("ko", Mode::Standard).await.unwrap();
        orch.process_turn(&session.session_id, "전체 브리프").await.unwrap();
        session.session_id
    };

    let orch = build();
    let snapshot = orch.get_session(&session_id).await.unwrap();
    assert_eq!(snapshot.state, SessionState::BriefReady);
    assert_eq!(snapshot.locale, "ko");
    assert!(snapshot.gate.ready);

    let before = orch.bus().last_seq(&session_id).await.unwrap();
    assert_eq!(before, 4);

    let scheduler = JobScheduler::new(orch.clone());
    let job = scheduler.submit(&session_id).await.unwrap();
    let job = scheduler.wait_for_terminal(&job.job_id, WAIT).await.unwrap();

    let run = orch.get_run(&job.run_id).await.unwrap();
    assert_eq!(run.state, SessionState::Done);
    assert!(orch.bus().last_seq(&session_id).await.unwrap() > before);
}
