//! Generation runs and the launch package they produce.
//!
//! A Run is owned by one Session and outlives the turn that created it. Its
//! package stays empty until the pipeline reaches DONE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{new_id, SessionState};
use super::slots::{Slots, WeeklyGoal};

/// Maximum number of risks carried in a package
pub const MAX_RISKS: usize = 10;

/// A single generation attempt over a ready brief
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub session_id: String,

    /// Pipeline position, shares the session state machine
    pub state: SessionState,

    pub package: Option<Package>,

    /// Final provider error when the run failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("run"),
            session_id: session_id.into(),
            state: SessionState::BriefReady,
            package: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.id.clone(),
            session_id: self.session_id.clone(),
            state: self.state,
            package: self.package.clone(),
            error: self.error.clone(),
        }
    }
}

/// Run as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub session_id: String,
    pub state: SessionState,
    pub package: Option<Package>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Copy,
    Image,
    Video,
    Audio,
    #[serde(other)]
    Other,
}

/// A creative artifact produced by the creative or voice stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: String,
    pub kind: AssetKind,
    pub title: String,

    /// Location of binary content, if the provider stored any
    #[serde(default)]
    pub uri: Option<String>,

    /// Inline text content (copy, script)
    #[serde(default)]
    pub content: Option<String>,
}

/// Structured result of one pipeline stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub provider: String,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Research section of the package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchSnapshot {
    /// Research failed and the pipeline continued without it
    pub degraded: bool,
    pub reason: Option<String>,
    pub output: Option<StageOutput>,
}

impl ResearchSnapshot {
    pub fn completed(output: StageOutput) -> Self {
        Self {
            degraded: false,
            reason: None,
            output: Some(output),
        }
    }

    /// Explicitly empty snapshot used when research is unavailable
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            degraded: true,
            reason: Some(reason.into()),
            output: None,
        }
    }
}

/// KPI headline and the next actions it implies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiPlan {
    pub weekly_goal: WeeklyGoal,
    pub core_kpi: String,
    pub next_actions: Vec<String>,
}

impl KpiPlan {
    /// Derive the plan from the brief's weekly goal (inquiry when unset)
    pub fn for_goal(goal: Option<WeeklyGoal>) -> Self {
        let weekly_goal = goal.unwrap_or(WeeklyGoal::Inquiry);
        let (core_kpi, next_actions): (&str, [&str; 3]) = match weekly_goal {
            WeeklyGoal::Reach => (
                "Weekly views",
                [
                    "Publish the hook variant on every focus channel",
                    "Compare 3-second retention across variants after 48 hours",
                    "Double spend on the best-retaining variant",
                ],
            ),
            WeeklyGoal::Inquiry => (
                "Weekly inquiries",
                [
                    "Pin the inquiry call-to-action on the focus channel",
                    "Track inquiry rate per creative daily",
                    "Answer every inquiry within one business day",
                ],
            ),
            WeeklyGoal::Purchase => (
                "Weekly purchase conversions",
                [
                    "Link every creative directly to the product page",
                    "Track conversion rate per creative daily",
                    "Retarget visitors who viewed but did not buy",
                ],
            ),
        };

        Self {
            weekly_goal,
            core_kpi: core_kpi.to_string(),
            next_actions: next_actions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Aggregated output of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub brief: Slots,
    pub research: ResearchSnapshot,
    pub strategy: StageOutput,
    pub creative: StageOutput,
    pub voice: StageOutput,
    pub assets: Vec<Asset>,
    pub risks: Vec<String>,
    pub kpi: KpiPlan,

    /// Visible marker that research ran in fallback mode
    pub research_degraded: bool,
}

impl Package {
    pub fn assemble(
        brief: &Slots,
        research: ResearchSnapshot,
        strategy: StageOutput,
        creative: StageOutput,
        voice: StageOutput,
    ) -> Self {
        let goal = brief.goal.weekly_goal.as_ref().map(|f| f.value);
        let risks = collect_risks(
            research
                .output
                .iter()
                .chain([&strategy, &creative, &voice])
                .flat_map(|o| o.risks.iter()),
        );
        let research_degraded = research.degraded;

        let mut package = Self {
            brief: brief.clone(),
            research,
            strategy,
            creative: StageOutput::default(),
            voice: StageOutput::default(),
            assets: Vec::new(),
            risks,
            kpi: KpiPlan::for_goal(goal),
            research_degraded,
        };
        package.replace_assets(creative, voice);
        package
    }

    /// Swap in regenerated creative and voice output
    pub fn replace_assets(&mut self, creative: StageOutput, voice: StageOutput) {
        self.assets = creative
            .assets
            .iter()
            .chain(voice.assets.iter())
            .cloned()
            .collect();
        self.creative = creative;
        self.voice = voice;
    }
}

/// Trim, dedupe case-insensitively, keep first-seen order, cap at MAX_RISKS
fn collect_risks<'a>(risks: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for risk in risks {
        let trimmed = risk.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
            continue;
        }
        out.push(trimmed.to_string());
        if out.len() >= MAX_RISKS {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(provider: &str, risks: &[&str]) -> StageOutput {
        StageOutput {
            provider: provider.to_string(),
            summary: format!("{} summary", provider),
            risks: risks.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_run_starts_brief_ready() {
        let run = Run::new("sess_0123456789abcdef");
        assert!(run.id.starts_with("run_"));
        assert_eq!(run.state, SessionState::BriefReady);
        assert!(run.package.is_none());
        assert!(!run.is_finished());
    }

    #[test]
    fn test_risks_are_deduped_and_capped() {
        let many: Vec<String> = (0..15).map(|i| format!("risk {}", i)).collect();
        let many_refs: Vec<&str> = many.iter().map(|s| s.as_str()).collect();

        let package = Package::assemble(
            &Slots::new(),
            ResearchSnapshot::completed(output("research", &["Price war", "price war "])),
            output("strategy", &many_refs),
            output("creative", &[]),
            output("voice", &[]),
        );

        assert_eq!(package.risks.len(), MAX_RISKS);
        assert_eq!(package.risks[0], "Price war");
        assert_eq!(package.risks[1], "risk 0");
    }

    #[test]
    fn test_degraded_research_marks_package() {
        let package = Package::assemble(
            &Slots::new(),
            ResearchSnapshot::degraded("research timed out"),
            output("strategy", &[]),
            output("creative", &[]),
            output("voice", &[]),
        );

        assert!(package.research_degraded);
        assert!(package.research.output.is_none());
        assert_eq!(package.kpi.weekly_goal, WeeklyGoal::Inquiry);
    }

    #[test]
    fn test_unknown_asset_kind_deserializes_as_other() {
        let asset: Asset = serde_json::from_str(
            r#"{"asset_id":"a1","kind":"hologram","title":"Demo"}"#,
        )
        .unwrap();
        assert_eq!(asset.kind, AssetKind::Other);
    }
}
