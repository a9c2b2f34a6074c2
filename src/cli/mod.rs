//! Command-line interface for launchkit.
//!
//! Provides commands for collecting a launch brief in conversation, starting
//! generation runs, inspecting sessions and runs, and replaying event streams.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{ProviderKind, ProviderSet};
use crate::config::{self, ResolvedConfig};
use crate::core::{EventBus, JobScheduler, Orchestrator};
use crate::domain::{EventType, Mode, RunSnapshot, StreamEvent};
use crate::store::{FileRunRepository, FileSessionStore, JsonlJournal};

pub mod chat;

/// launchkit - Conversational launch-brief orchestrator
#[derive(Parser, Debug)]
#[command(name = "launchkit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start or continue an interactive brief conversation
    Chat {
        /// Resume an existing session instead of creating one
        #[arg(short, long)]
        session: Option<String>,

        /// Locale for a new session
        #[arg(short, long, default_value = "en")]
        locale: String,

        /// Generation mode for a new session (fast or standard)
        #[arg(short, long, default_value = "standard")]
        mode: Mode,
    },

    /// Create a session and print its ID
    New {
        #[arg(short, long, default_value = "en")]
        locale: String,

        #[arg(short, long, default_value = "standard")]
        mode: Mode,
    },

    /// Send one message to a session
    Say {
        session_id: String,

        message: String,
    },

    /// Run research, strategy and creative generation for a ready brief
    Generate {
        session_id: String,

        /// Seconds to wait for the job before giving up
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Regenerate creative and voice assets for a completed run
    Assets {
        run_id: String,

        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Show a session's state, slots and gate
    Session {
        session_id: String,

        /// Print the conversation transcript too
        #[arg(short, long)]
        transcript: bool,
    },

    /// Show a run and its package
    Run {
        run_id: String,

        /// Print the full package as JSON
        #[arg(long)]
        json: bool,
    },

    /// List runs of a session
    Runs { session_id: String },

    /// Replay a session's recorded events as JSON lines
    Events {
        session_id: String,

        /// Only events after this sequence number
        #[arg(short, long, default_value = "0")]
        after: u64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Chat {
                session,
                locale,
                mode,
            } => chat::execute(session, &locale, mode).await,
            Commands::New { locale, mode } => new_session(&locale, mode).await,
            Commands::Say {
                session_id,
                message,
            } => say(&session_id, &message).await,
            Commands::Generate { session_id, wait } => generate(&session_id, wait).await,
            Commands::Assets { run_id, wait } => regenerate_assets(&run_id, wait).await,
            Commands::Session {
                session_id,
                transcript,
            } => show_session(&session_id, transcript).await,
            Commands::Run { run_id, json } => show_run(&run_id, json).await,
            Commands::Runs { session_id } => list_runs(&session_id).await,
            Commands::Events { session_id, after } => replay_events(&session_id, after).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Build the file-backed orchestrator and scheduler from the resolved config
pub fn runtime(cfg: &ResolvedConfig) -> JobScheduler {
    let home: &Path = &cfg.home;
    let bus = EventBus::new(cfg.bus_capacity).with_journal(Arc::new(JsonlJournal::new(home)));

    let orchestrator = Orchestrator::new(
        Arc::new(FileSessionStore::new(home)),
        Arc::new(FileRunRepository::new(home)),
        Arc::new(bus),
        ProviderSet::from_config(&cfg.providers),
    )
    .with_settings(cfg.pipeline.clone());

    JobScheduler::new(Arc::new(orchestrator))
}

fn load_runtime() -> Result<JobScheduler> {
    Ok(runtime(config::config()?))
}

async fn new_session(locale: &str, mode: Mode) -> Result<()> {
    let scheduler = load_runtime()?;
    let session = scheduler.orchestrator().create_session(locale, mode).await?;
    println!("{}", session.session_id);
    Ok(())
}

async fn say(session_id: &str, message: &str) -> Result<()> {
    let scheduler = load_runtime()?;
    let outcome = scheduler
        .orchestrator()
        .process_turn(session_id, message)
        .await?;

    println!("{}", outcome.reply);
    eprintln!(
        "\n[{} | completeness {:.0}%]",
        outcome.state(),
        outcome.gate.completeness * 100.0
    );
    Ok(())
}

async fn generate(session_id: &str, wait: Option<u64>) -> Result<()> {
    let scheduler = load_runtime()?;
    let wait = job_wait(&scheduler, wait);
    let job = follow_job(&scheduler, session_id, wait, |s| {
        let session_id = session_id.to_string();
        async move { s.submit(&session_id).await }
    })
    .await?;

    finish_job(&scheduler, &job.run_id, job.error.as_deref()).await
}

async fn regenerate_assets(run_id: &str, wait: Option<u64>) -> Result<()> {
    let scheduler = load_runtime()?;
    let run = scheduler.orchestrator().get_run(run_id).await?;
    let wait = job_wait(&scheduler, wait);
    let job = follow_job(&scheduler, &run.session_id, wait, |s| {
        let run_id = run_id.to_string();
        async move { s.submit_assets(&run_id).await }
    })
    .await?;

    finish_job(&scheduler, &job.run_id, job.error.as_deref()).await
}

fn job_wait(scheduler: &JobScheduler, wait: Option<u64>) -> Duration {
    wait.map(Duration::from_secs)
        .unwrap_or(scheduler.orchestrator().settings().job_timeout + Duration::from_secs(5))
}

/// Subscribe, submit, print events until the stream closes, then report the job
pub(crate) async fn follow_job<F, Fut>(
    scheduler: &JobScheduler,
    session_id: &str,
    wait: Duration,
    submit: F,
) -> Result<crate::domain::Job>
where
    F: FnOnce(JobScheduler) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<crate::domain::Job>>,
{
    let bus = scheduler.orchestrator().bus();
    let last = bus.last_seq(session_id).await?;
    let mut subscription = bus.subscribe(session_id, Some(last)).await?;

    let job = submit(scheduler.clone()).await?;
    eprintln!("[Job {} started for run {}]", job.job_id, job.run_id);

    let streamed = tokio::time::timeout(wait, async {
        while let Some(event) = subscription.next().await {
            print_event(&event);
        }
    })
    .await;
    if streamed.is_err() {
        eprintln!("[Stopped waiting after {:?}]", wait);
    }

    Ok(scheduler
        .wait_for_terminal(&job.job_id, Duration::from_secs(5))
        .await?)
}

async fn finish_job(scheduler: &JobScheduler, run_id: &str, job_error: Option<&str>) -> Result<()> {
    let run = scheduler.orchestrator().get_run(run_id).await?;
    print_run(&run);

    if let Some(error) = job_error {
        eprintln!("\n[Run {} failed: {}]", run.run_id, error);
        std::process::exit(1);
    }
    Ok(())
}

/// One line per event
pub(crate) fn print_event(event: &StreamEvent) {
    let data = &event.data;
    let text = |key: &str| data.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();

    let line = match event.event_type {
        EventType::PlannerDelta => text("reply"),
        EventType::SlotUpdated => format!(
            "{} slot(s) updated",
            data.get("slot_updates")
                .and_then(|v| v.as_array())
                .map_or(0, |a| a.len())
        ),
        EventType::GateReady => "brief is ready".to_string(),
        EventType::StageChanged => match data.get("progress").and_then(|v| v.as_u64()) {
            Some(progress) => format!("{} -> {} ({}%)", text("from"), text("to"), progress),
            None => format!("{} -> {}", text("from"), text("to")),
        },
        EventType::ResearchDelta if data.get("degraded").and_then(|v| v.as_bool()) == Some(true) => {
            format!("degraded: {}", text("reason"))
        }
        EventType::ResearchDelta
        | EventType::StrategyDelta
        | EventType::CreativeDelta
        | EventType::VoiceDelta => text("summary"),
        EventType::AssetReady => data
            .pointer("/asset/title")
            .and_then(|v| v.as_str())
            .unwrap_or("asset")
            .to_string(),
        EventType::RunCompleted => format!("run {} completed", text("run_id")),
        EventType::Error => text("message"),
    };

    println!("[{:>4}] {:<16} {}", event.seq, event.event_type.as_str(), line);
}

fn print_run(run: &RunSnapshot) {
    println!();
    println!("Run ID:  {}", run.run_id);
    println!("Session: {}", run.session_id);
    println!("State:   {}", run.state);
    if let Some(error) = &run.error {
        println!("Error:   {}", error);
    }

    let Some(package) = &run.package else {
        return;
    };
    if package.research_degraded {
        println!("Research: degraded ({})", package.research.reason.as_deref().unwrap_or("unavailable"));
    } else if let Some(research) = &package.research.output {
        println!("Research: {}", research.summary);
    }
    println!("Strategy: {}", package.strategy.summary);
    println!("Creative: {}", package.creative.summary);
    println!("Voice:    {}", package.voice.summary);

    if !package.assets.is_empty() {
        println!("\nAssets:");
        for asset in &package.assets {
            println!("  {:<14} {:?} {}", asset.asset_id, asset.kind, asset.title);
        }
    }
    if !package.risks.is_empty() {
        println!("\nRisks:");
        for risk in &package.risks {
            println!("  - {}", risk);
        }
    }
    println!("\nKPI: {} ({})", package.kpi.core_kpi, package.kpi.weekly_goal.as_str());
    for action in &package.kpi.next_actions {
        println!("  - {}", action);
    }
}

async fn show_session(session_id: &str, transcript: bool) -> Result<()> {
    let scheduler = load_runtime()?;
    let session = scheduler.orchestrator().session_record(session_id).await?;
    let snapshot = session.snapshot();

    println!("Session ID: {}", snapshot.session_id);
    println!("Locale:     {}", snapshot.locale);
    println!("Mode:       {:?}", snapshot.mode);
    println!("State:      {}", snapshot.state);
    println!("Turns:      {}", session.turn);
    println!(
        "Gate:       {} ({:.0}% complete)",
        if snapshot.gate.ready { "ready" } else { "not ready" },
        snapshot.gate.completeness * 100.0
    );
    if let Some(run_id) = &snapshot.active_run {
        println!("Active run: {}", run_id);
    }

    println!("\nSlots:");
    for path in crate::domain::FieldPath::ALL {
        let value = snapshot
            .slots
            .value(path)
            .map(|v| v.display())
            .unwrap_or_else(|| "-".to_string());
        let confidence = snapshot.slots.confidence(path).unwrap_or(0.0);
        println!("  {:<24} {:<40} {:.2}", path.as_str(), value, confidence);
    }
    if !snapshot.gate.missing_required.is_empty() {
        let missing: Vec<&str> = snapshot.gate.missing_required.iter().map(|p| p.as_str()).collect();
        println!("\nMissing: {}", missing.join(", "));
    }

    if transcript {
        println!("\nTranscript:");
        for message in &session.messages {
            println!("  [{}] {:?}: {}", message.turn, message.role, message.content);
        }
    }

    Ok(())
}

async fn show_run(run_id: &str, json: bool) -> Result<()> {
    let scheduler = load_runtime()?;
    let run = scheduler.orchestrator().get_run(run_id).await?;

    if json {
        let body = serde_json::to_string_pretty(&run).context("Failed to serialize run")?;
        println!("{}", body);
    } else {
        print_run(&run);
    }
    Ok(())
}

async fn list_runs(session_id: &str) -> Result<()> {
    let scheduler = load_runtime()?;
    let runs = scheduler.orchestrator().list_runs(session_id).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<24} {:<16} {:<8}", "RUN ID", "STATE", "ASSETS");
    println!("{}", "-".repeat(50));
    for run in runs {
        let assets = run.package.as_ref().map_or(0, |p| p.assets.len());
        println!("{:<24} {:<16} {:<8}", run.run_id, run.state.as_str(), assets);
    }
    Ok(())
}

async fn replay_events(session_id: &str, after: u64) -> Result<()> {
    let scheduler = load_runtime()?;
    let events = scheduler
        .orchestrator()
        .bus()
        .events_since(session_id, after)
        .await?;

    for event in events {
        println!(
            "{}",
            serde_json::to_string(&event).context("Failed to serialize event")?
        );
    }
    Ok(())
}

async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!();
    println!("launchkit configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Sessions: {}", config::paths::sessions_dir(&cfg.home).display());
    println!("  Runs:     {}", config::paths::runs_dir(&cfg.home).display());
    println!("  Events:   {}", config::paths::events_dir(&cfg.home).display());
    println!();
    println!("Pipeline:");
    println!("  Planner timeout:   {:?}", cfg.pipeline.planner_timeout);
    println!(
        "  Research timeout:  {:?} soft / {:?} hard",
        cfg.pipeline.research_soft_timeout, cfg.pipeline.research_hard_timeout
    );
    println!("  Stage timeout:     {:?}", cfg.pipeline.stage_timeout);
    println!("  Job timeout:       {:?}", cfg.pipeline.job_timeout);
    println!("  Retry delay:       {:?}", cfg.pipeline.retry_delay);
    println!("  Event buffer:      {} per session", cfg.bus_capacity);
    println!();
    println!("Providers:");
    for kind in ProviderKind::ALL {
        match cfg.providers.get(kind) {
            Some(command) => println!("  {:<9} {} {}", kind.as_str(), command.command, command.args.join(" ")),
            None if kind == ProviderKind::Planner => println!("  {:<9} (built-in keyword planner)", kind.as_str()),
            None => println!("  {:<9} (not configured)", kind.as_str()),
        }
    }

    Ok(())
}
