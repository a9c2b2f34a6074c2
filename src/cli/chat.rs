//! Interactive brief conversation.
//!
//! Reads one message per line from stdin. Lines starting with `/` are
//! commands:
//! - `/generate` - start a run once the brief is ready and follow its events
//! - `/status` - show the gate and what is still missing
//! - `/quit` - leave; the session can be resumed with `--session`

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{follow_job, load_runtime};
use crate::core::JobScheduler;
use crate::domain::{EventType, Mode};
use crate::error::OrchestratorError;

/// Run the chat loop
pub async fn execute(session: Option<String>, locale: &str, mode: Mode) -> Result<()> {
    let scheduler = load_runtime()?;
    let orchestrator = scheduler.orchestrator();

    let session_id = match session {
        Some(id) => {
            let snapshot = orchestrator.get_session(&id).await?;
            println!("Resuming session {} ({})", snapshot.session_id, snapshot.state);
            id
        }
        None => {
            let snapshot = orchestrator.create_session(locale, mode).await?;
            println!("Session {}", snapshot.session_id);
            println!("{}", crate::core::reply::opening());
            snapshot.session_id
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/status" => show_status(&scheduler, &session_id).await?,
            "/generate" => start_generation(&scheduler, &session_id).await?,
            message => match orchestrator.process_turn(&session_id, message).await {
                Ok(outcome) => {
                    println!("{}", outcome.reply);
                    if outcome.events.iter().any(|e| e.event_type == EventType::GateReady) {
                        println!("(type /generate to start)");
                    }
                }
                Err(e) if e.is_provider_error() => {
                    eprintln!("[Planner unavailable: {}] Please try again.", e);
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    println!("Session saved: {}", session_id);
    Ok(())
}

async fn show_status(scheduler: &JobScheduler, session_id: &str) -> Result<()> {
    let snapshot = scheduler.orchestrator().get_session(session_id).await?;
    println!(
        "{} | completeness {:.0}%",
        snapshot.state,
        snapshot.gate.completeness * 100.0
    );
    for path in &snapshot.gate.missing_required {
        println!("  missing: {}", path);
    }
    Ok(())
}

async fn start_generation(scheduler: &JobScheduler, session_id: &str) -> Result<()> {
    let wait = scheduler.orchestrator().settings().job_timeout + Duration::from_secs(5);
    let result = follow_job(scheduler, session_id, wait, |s| {
        let session_id = session_id.to_string();
        async move { s.submit(&session_id).await }
    })
    .await;

    let job = match result {
        Ok(job) => job,
        Err(e) => match e.downcast_ref::<OrchestratorError>() {
            Some(OrchestratorError::GateNotReady { missing_required }) => {
                let missing: Vec<&str> = missing_required.iter().map(|p| p.as_str()).collect();
                println!("The brief is not complete yet. Missing: {}", missing.join(", "));
                return Ok(());
            }
            Some(err @ OrchestratorError::RunAlreadyInFlight { .. }) => {
                println!("{}", err);
                return Ok(());
            }
            _ => return Err(e),
        },
    };

    match &job.error {
        Some(error) => println!("Generation failed: {}", error),
        None => {
            let run = scheduler.orchestrator().get_run(&job.run_id).await?;
            let assets = run.package.as_ref().map_or(0, |p| p.assets.len());
            println!("Run {} finished with {} asset(s).", run.run_id, assets);
            println!("Use `launchkit run {}` for the full package.", run.run_id);
        }
    }

    Ok(())
}
