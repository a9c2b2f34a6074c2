//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use launchkit::adapters::{ProviderKind, ProviderOutput, ProviderSet, ScriptedProvider, Step};
use launchkit::core::{JobScheduler, Orchestrator, RetryPolicy};
use launchkit::domain::{
    Asset, AssetKind, FieldPath, Mode, PriceBand, SlotUpdate, SlotValue, WeeklyGoal,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// All eight required fields, comfortably above the floor
pub fn brief_updates() -> Vec<SlotUpdate> {
    vec![
        SlotUpdate::text(FieldPath::ProductName, "Glow Serum X", 0.93),
        SlotUpdate::text(FieldPath::ProductCategory, "skincare", 0.9),
        SlotUpdate::list(
            FieldPath::ProductFeatures,
            vec!["vegan".into(), "light texture".into(), "fast absorbing".into()],
            0.82,
        ),
        SlotUpdate::new(
            FieldPath::ProductPriceBand,
            SlotValue::PriceBand(PriceBand::Mid),
            0.86,
        ),
        SlotUpdate::text(FieldPath::TargetWho, "office workers in their 20s", 0.88),
        SlotUpdate::text(FieldPath::TargetWhy, "keeps skin hydrated all day", 0.84),
        SlotUpdate::list(
            FieldPath::ChannelChannels,
            vec!["Instagram".into(), "Naver".into()],
            0.9,
        ),
        SlotUpdate::new(
            FieldPath::GoalWeeklyGoal,
            SlotValue::WeeklyGoal(WeeklyGoal::Purchase),
            0.91,
        ),
    ]
}

pub fn planner_output(updates: Vec<SlotUpdate>) -> ProviderOutput {
    ProviderOutput {
        slot_updates: updates,
        ..ProviderOutput::default()
    }
}

/// Planner that fills the whole brief on every call
pub fn brief_planner() -> ScriptedProvider {
    ScriptedProvider::new("planner").then(Step::Ok(planner_output(brief_updates())))
}

pub fn no_delay() -> RetryPolicy {
    RetryPolicy {
        initial_delay_ms: 0,
        ..RetryPolicy::default()
    }
}

pub fn creative_output(title: &str) -> ProviderOutput {
    ProviderOutput {
        summary: format!("Creative set: {}", title),
        risks: vec!["Claims need proof".into()],
        assets: vec![Asset {
            asset_id: "img_1".into(),
            kind: AssetKind::Image,
            title: title.into(),
            uri: None,
            content: Some("hero visual brief".into()),
        }],
        ..ProviderOutput::default()
    }
}

pub fn voice_output() -> ProviderOutput {
    ProviderOutput {
        summary: "Warm narration script".into(),
        assets: vec![Asset {
            asset_id: "vo_1".into(),
            kind: AssetKind::Audio,
            title: "Narration".into(),
            uri: None,
            content: Some("Meet Glow Serum X.".into()),
        }],
        ..ProviderOutput::default()
    }
}

/// Every stage succeeds
pub fn healthy_providers() -> ProviderSet {
    ProviderSet::offline()
        .with(ProviderKind::Planner, Arc::new(brief_planner()))
        .with(
            ProviderKind::Research,
            Arc::new(ScriptedProvider::succeeding("research", "Competitors lean on price")),
        )
        .with(
            ProviderKind::Strategy,
            Arc::new(ScriptedProvider::succeeding("strategy", "Lead with hydration proof")),
        )
        .with(
            ProviderKind::Creative,
            Arc::new(ScriptedProvider::new("creative").then(Step::Ok(creative_output("Hero shot")))),
        )
        .with(
            ProviderKind::Voice,
            Arc::new(ScriptedProvider::new("voice").then(Step::Ok(voice_output()))),
        )
}

pub fn orchestrator(providers: ProviderSet) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::in_memory(providers).with_retry_policy(no_delay()))
}

pub fn scheduler(providers: ProviderSet) -> JobScheduler {
    JobScheduler::new(orchestrator(providers))
}

/// New session whose brief is complete after one turn
pub async fn ready_session(orchestrator: &Orchestrator) -> String {
    let session = orchestrator
        .create_session("en", Mode::Standard)
        .await
        .unwrap();
    orchestrator
        .process_turn(&session.session_id, "Here is the whole brief")
        .await
        .unwrap();
    session.session_id
}
