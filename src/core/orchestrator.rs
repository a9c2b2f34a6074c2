//! Conversation orchestrator.
//!
//! Drives turn processing and pipeline execution, invoking providers and the
//! gate evaluator, applying slot updates and publishing events. Sessions are
//! only mutated here, each read-modify-write under that session's lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};

use crate::adapters::{ProviderContext, ProviderKind, ProviderOutput, ProviderSet};
use crate::config::PipelineSettings;
use crate::domain::{
    EventDraft, EventType, Mode, Package, ResearchSnapshot, Role, Run, RunSnapshot, Session,
    SessionSnapshot, SessionState, SlotUpdate, StageOutput, StreamEvent,
};
use crate::error::{OrchestratorError, ProviderError, Result};
use crate::store::{MemoryRunRepository, MemorySessionStore, RunRepository, SessionStore};

use super::bus::EventBus;
use super::gate::GateStatus;
use super::pipeline::{
    invoke_with_retry, ProgressBand, RetryPolicy, StageBudget, CREATIVE_BAND, PERSIST_BAND,
    RESEARCH_BAND, STRATEGY_BAND,
};
use super::reply;

/// Progress sink for a running job
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Result of one conversation turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session: SessionSnapshot,
    pub reply: String,
    /// Updates that actually landed in the slots
    pub slot_updates: Vec<SlotUpdate>,
    pub gate: GateStatus,
    pub events: Vec<StreamEvent>,
}

impl TurnOutcome {
    pub fn state(&self) -> SessionState {
        self.session.state
    }
}

/// Session state machine and pipeline driver
pub struct Orchestrator {
    sessions: Arc<dyn SessionStore>,
    runs: Arc<dyn RunRepository>,
    bus: Arc<EventBus>,
    providers: ProviderSet,
    settings: PipelineSettings,
    retry: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        runs: Arc<dyn RunRepository>,
        bus: Arc<EventBus>,
        providers: ProviderSet,
    ) -> Self {
        let settings = PipelineSettings::default();
        Self {
            sessions,
            runs,
            bus,
            providers,
            retry: RetryPolicy::from_settings(&settings),
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Everything in memory, default settings
    pub fn in_memory(providers: ProviderSet) -> Self {
        Self::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryRunRepository::new()),
            Arc::new(EventBus::default()),
            providers,
        )
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.retry = RetryPolicy::from_settings(&settings);
        self.settings = settings;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn session_lock(&self, session_id: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| OrchestratorError::InternalError("session lock table poisoned".into()))?;
        Ok(Arc::clone(locks.entry(session_id.to_string()).or_default()))
    }

    async fn load_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get_session(session_id)
            .await
            .map_err(|e| {
                error!(session_id, error = %format!("{:#}", e), "Failed to load session");
                OrchestratorError::storage(e)
            })?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions.save_session(session).await.map_err(|e| {
            error!(session_id = %session.id, error = %format!("{:#}", e), "Failed to save session");
            OrchestratorError::storage(e)
        })
    }

    async fn load_run(&self, run_id: &str) -> Result<Run> {
        self.runs
            .get_run(run_id)
            .await
            .map_err(|e| {
                error!(run_id, error = %format!("{:#}", e), "Failed to load run");
                OrchestratorError::storage(e)
            })?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        self.runs.save_run(run).await.map_err(|e| {
            error!(run_id = %run.id, session_id = %run.session_id, error = %format!("{:#}", e), "Failed to save run");
            OrchestratorError::storage(e)
        })
    }

    /// Locked read-modify-write of one session
    async fn update_session<F>(&self, session_id: &str, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) -> Result<()>,
    {
        let lock = self.session_lock(session_id)?;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id).await?;
        f(&mut session)?;
        session.updated_at = Utc::now();
        self.save_session(&session).await?;
        Ok(session)
    }

    async fn publish(&self, session_id: &str, event_type: EventType, data: serde_json::Value) -> Result<StreamEvent> {
        self.bus
            .publish(session_id, EventDraft::new(event_type, data))
            .await
    }

    // ------------------------------------------------------------------
    // Sessions and turns
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn create_session(&self, locale: &str, mode: Mode) -> Result<SessionSnapshot> {
        let locale = locale.trim();
        if locale.is_empty() {
            return Err(OrchestratorError::InvalidInput("locale must not be empty".into()));
        }

        let mut session = Session::new(locale, mode);
        session.push_message(Role::Assistant, reply::opening());
        self.save_session(&session).await?;

        info!(session_id = %session.id, "Session created");
        Ok(session.snapshot())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        Ok(self.load_session(session_id).await?.snapshot())
    }

    /// Full session record including the transcript
    pub async fn session_record(&self, session_id: &str) -> Result<Session> {
        self.load_session(session_id).await
    }

    /// Process one user message.
    ///
    /// Slots are written durably before any event is published. Dropping the
    /// returned future while the planner runs leaves the session untouched;
    /// once the commit has started it finishes, events included.
    #[instrument(skip(self, user_input), fields(session_id = %session_id))]
    pub async fn process_turn(&self, session_id: &str, user_input: &str) -> Result<TurnOutcome> {
        let input = user_input.trim();
        if input.is_empty() {
            return Err(OrchestratorError::InvalidInput("message must not be empty".into()));
        }

        let guard = self.session_lock(session_id)?.lock_owned().await;

        let mut session = self.load_session(session_id).await?;
        session.turn += 1;

        if session.state != SessionState::ChatCollecting {
            return self.locked_turn(guard, session, input).await;
        }

        let gate_before = session.gate();
        let planner = self.providers.get(ProviderKind::Planner);

        let mut ctx = ProviderContext::new(ProviderKind::Planner, &session.id, session.slots.clone());
        ctx.locale = session.locale.clone();
        ctx.mode = session.mode;
        ctx.turn = session.turn;
        ctx.user_input = Some(input.to_string());
        ctx.expected_path = gate_before.next_missing();

        let budget = StageBudget::for_kind(ProviderKind::Planner, &self.settings);
        let output = match invoke_with_retry(planner.as_ref(), ProviderKind::Planner, &ctx, budget, &self.retry).await {
            Ok(output) => output,
            Err(e) => {
                let err = e.into_orchestrator(planner.name());
                self.publish(
                    session_id,
                    EventType::Error,
                    json!({
                        "code": err.code(),
                        "message": err.to_string(),
                        "stage": ProviderKind::Planner,
                        "turn": session.turn,
                        "fatal": false,
                    }),
                )
                .await?;
                return Err(err);
            }
        };

        let (slots, landed) = session
            .slots
            .apply_batch(&output.slot_updates, session.turn)
            .map_err(|e| OrchestratorError::SchemaValidationFailed {
                provider: planner.name().to_string(),
                message: e.to_string(),
            })?;
        session.slots = slots;

        let gate = session.gate();
        let reply = output
            .reply
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| reply::compose(&landed, &gate));

        session.push_message(Role::User, input);
        session.push_message(Role::Assistant, reply.clone());

        let flipped = gate.ready && !gate_before.ready;
        let next_state = if gate.ready {
            SessionState::BriefReady
        } else {
            SessionState::ChatCollecting
        };
        session.transition(next_state)?;
        session.updated_at = Utc::now();

        let mut drafts = vec![
            EventDraft::new(
                EventType::PlannerDelta,
                json!({
                    "turn": session.turn,
                    "reply": reply,
                    "summary": output.summary,
                    "slot_updates": landed,
                }),
            ),
            EventDraft::new(
                EventType::SlotUpdated,
                json!({
                    "turn": session.turn,
                    "slot_updates": landed,
                    "slots": session.slots,
                    "gate": gate,
                }),
            ),
        ];
        if flipped {
            info!(turn = session.turn, "Brief is ready");
            drafts.push(EventDraft::new(EventType::GateReady, json!({ "gate": gate })));
            drafts.push(EventDraft::new(
                EventType::StageChanged,
                json!({
                    "from": SessionState::ChatCollecting,
                    "to": SessionState::BriefReady,
                }),
            ));
        }
        let events = self.commit_turn(guard, &session, drafts).await?;

        Ok(TurnOutcome {
            session: session.snapshot(),
            reply,
            slot_updates: landed,
            gate,
            events,
        })
    }

    /// Turn after BRIEF_READY: recorded, slots unchanged
    async fn locked_turn(
        &self,
        guard: OwnedMutexGuard<()>,
        mut session: Session,
        input: &str,
    ) -> Result<TurnOutcome> {
        let reply = reply::brief_locked();
        session.push_message(Role::User, input);
        session.push_message(Role::Assistant, reply.clone());
        session.updated_at = Utc::now();

        let drafts = vec![EventDraft::new(
            EventType::PlannerDelta,
            json!({
                "turn": session.turn,
                "reply": reply,
                "slot_updates": [],
                "locked": true,
            }),
        )];
        let events = self.commit_turn(guard, &session, drafts).await?;

        Ok(TurnOutcome {
            gate: session.gate(),
            session: session.snapshot(),
            reply,
            slot_updates: Vec::new(),
            events,
        })
    }

    /// Save the session, then publish the turn's events.
    ///
    /// Runs on its own task holding the session lock, so a caller that goes
    /// away mid-commit cannot leave saved slots without their events.
    async fn commit_turn(
        &self,
        guard: OwnedMutexGuard<()>,
        session: &Session,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<StreamEvent>> {
        let sessions = Arc::clone(&self.sessions);
        let bus = Arc::clone(&self.bus);
        let session = session.clone();

        let commit = tokio::spawn(async move {
            let _guard = guard;
            sessions.save_session(&session).await.map_err(|e| {
                error!(session_id = %session.id, error = %format!("{:#}", e), "Failed to save session");
                OrchestratorError::storage(e)
            })?;
            bus.publish_all(&session.id, drafts).await
        });

        commit
            .await
            .map_err(|e| OrchestratorError::InternalError(format!("turn commit task failed: {}", e)))?
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Create a run for a ready brief.
    ///
    /// A DONE or FAILED session with a ready brief is re-armed to
    /// BRIEF_READY so a second run can start.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn start_run(&self, session_id: &str) -> Result<String> {
        let lock = self.session_lock(session_id)?;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id).await?;
        if let Some(run_id) = &session.active_run {
            return Err(OrchestratorError::RunAlreadyInFlight {
                session_id: session_id.to_string(),
                run_id: run_id.clone(),
            });
        }

        let gate = session.gate();
        if !gate.ready {
            return Err(OrchestratorError::GateNotReady {
                missing_required: gate.missing_required,
            });
        }

        let from = session.state;
        if from != SessionState::BriefReady {
            session.transition(SessionState::BriefReady)?;
        }

        let run = Run::new(session_id);
        self.save_run(&run).await?;

        session.active_run = Some(run.id.clone());
        session.run_ids.push(run.id.clone());
        session.updated_at = Utc::now();
        self.save_session(&session).await?;

        if from != SessionState::BriefReady {
            self.publish(
                session_id,
                EventType::StageChanged,
                json!({ "run_id": run.id, "from": from, "to": SessionState::BriefReady }),
            )
            .await?;
        }

        info!(run_id = %run.id, "Run created");
        Ok(run.id)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunSnapshot> {
        Ok(self.load_run(run_id).await?.snapshot())
    }

    pub async fn list_runs(&self, session_id: &str) -> Result<Vec<RunSnapshot>> {
        self.load_session(session_id).await?;
        let runs = self
            .runs
            .list_runs(session_id)
            .await
            .map_err(OrchestratorError::storage)?;
        Ok(runs.iter().map(Run::snapshot).collect())
    }

    fn stage_context(&self, kind: ProviderKind, session: &Session, run_id: &str) -> ProviderContext {
        let mut ctx = ProviderContext::new(kind, &session.id, session.slots.clone());
        ctx.run_id = Some(run_id.to_string());
        ctx.locale = session.locale.clone();
        ctx.mode = session.mode;
        ctx.turn = session.turn;
        ctx
    }

    async fn call_stage(&self, kind: ProviderKind, ctx: &ProviderContext) -> std::result::Result<StageOutput, (String, ProviderError)> {
        let provider = self.providers.get(kind);
        let budget = StageBudget::for_kind(kind, &self.settings);
        invoke_with_retry(provider.as_ref(), kind, ctx, budget, &self.retry)
            .await
            .map(|output: ProviderOutput| output.into_stage(provider.name()))
            .map_err(|e| (provider.name().to_string(), e))
    }

    /// Move run and session to the next pipeline stage
    async fn enter_stage(&self, run: &mut Run, next: SessionState, band: ProgressBand, progress: ProgressFn<'_>) -> Result<()> {
        let from = run.state;
        run.state = run.state.transition(next)?;
        run.updated_at = Utc::now();
        self.save_run(run).await?;
        self.update_session(&run.session_id, |s| s.transition(next))
            .await?;

        info!(run_id = %run.id, from = %from, to = %next, "Stage changed");
        progress(band.start);
        self.publish(
            &run.session_id,
            EventType::StageChanged,
            json!({ "run_id": run.id, "from": from, "to": next, "progress": band.start }),
        )
        .await?;
        Ok(())
    }

    /// Execute every stage of a run in order.
    ///
    /// Research failures degrade to an empty snapshot. Any other failure,
    /// storage included, leaves the run FAILED and the session unclaimed.
    #[instrument(skip(self, progress), fields(run_id = %run_id))]
    pub async fn execute_run(&self, run_id: &str, progress: ProgressFn<'_>) -> Result<RunSnapshot> {
        let mut run = self.load_run(run_id).await?;
        match self.run_stages(&mut run, progress).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                self.settle_interrupted(&mut run, &err).await;
                Err(err)
            }
        }
    }

    /// Close out a run whose stages returned early
    async fn settle_interrupted(&self, run: &mut Run, err: &OrchestratorError) {
        match run.state {
            // Already recorded by `fail_run`
            SessionState::Failed => {}
            SessionState::Done => {
                if let Err(e) = self.release_claim(run).await {
                    error!(run_id = %run.id, session_id = %run.session_id, error = %e, "Failed to release completed run");
                }
            }
            _ => {
                error!(run_id = %run.id, session_id = %run.session_id, state = %run.state, error = %err, "Run interrupted");
                self.mark_failed(run, None, err).await;
            }
        }
    }

    /// Clear the session's in-flight marker if it still points at `run`
    async fn release_claim(&self, run: &Run) -> Result<()> {
        let run_id = run.id.clone();
        let done = run.state == SessionState::Done;
        self.update_session(&run.session_id, |s| {
            if done && s.state.can_transition_to(SessionState::Done) {
                s.transition(SessionState::Done)?;
            }
            if s.active_run.as_deref() == Some(run_id.as_str()) {
                s.active_run = None;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn run_stages(&self, run: &mut Run, progress: ProgressFn<'_>) -> Result<RunSnapshot> {
        let session = self.load_session(&run.session_id).await?;
        let session_id = session.id.clone();
        let run_key = run.id.clone();
        let run_id = run_key.as_str();

        // Research
        self.enter_stage(run, SessionState::RunResearch, RESEARCH_BAND, progress)
            .await?;
        let ctx = self.stage_context(ProviderKind::Research, &session, run_id);
        let research = match self.call_stage(ProviderKind::Research, &ctx).await {
            Ok(output) => {
                self.publish(&session_id, EventType::ResearchDelta, stage_data(run_id, &output))
                    .await?;
                ResearchSnapshot::completed(output)
            }
            Err((provider, e)) => {
                warn!(provider = %provider, error = %e, "Research unavailable, continuing degraded");
                self.publish(
                    &session_id,
                    EventType::ResearchDelta,
                    json!({ "run_id": run_id, "degraded": true, "reason": e.to_string() }),
                )
                .await?;
                ResearchSnapshot::degraded(e.to_string())
            }
        };
        progress(RESEARCH_BAND.end);

        // Strategy
        self.enter_stage(run, SessionState::GenStrategy, STRATEGY_BAND, progress)
            .await?;
        let mut ctx = self.stage_context(ProviderKind::Strategy, &session, run_id);
        ctx.research = research.output.clone();
        ctx.research_degraded = research.degraded;
        let strategy = match self.call_stage(ProviderKind::Strategy, &ctx).await {
            Ok(output) => output,
            Err((provider, e)) => {
                return self
                    .fail_run(run, ProviderKind::Strategy, e.into_orchestrator(&provider))
                    .await
            }
        };
        self.publish(&session_id, EventType::StrategyDelta, stage_data(run_id, &strategy))
            .await?;
        progress(STRATEGY_BAND.end);

        // Creative and voice fan out over the same inputs
        self.enter_stage(run, SessionState::GenCreatives, CREATIVE_BAND, progress)
            .await?;
        ctx.strategy = Some(strategy.clone());
        let (creative, voice) = self.generate_assets(&ctx).await;
        let (creative, voice) = match (creative, voice) {
            (Ok(c), Ok(v)) => (c, v),
            (Err((provider, e)), _) => {
                return self
                    .fail_run(run, ProviderKind::Creative, e.into_orchestrator(&provider))
                    .await
            }
            (_, Err((provider, e))) => {
                return self
                    .fail_run(run, ProviderKind::Voice, e.into_orchestrator(&provider))
                    .await
            }
        };
        self.publish_assets(&session_id, run_id, &creative, &voice).await?;
        progress(CREATIVE_BAND.end);

        // Persist
        progress(PERSIST_BAND.start);
        let package = Package::assemble(&session.slots, research, strategy, creative, voice);
        let research_degraded = package.research_degraded;
        let asset_count = package.assets.len();

        let mut done = run.clone();
        done.state = done.state.transition(SessionState::Done)?;
        done.package = Some(package);
        done.updated_at = Utc::now();
        done.completed_at = Some(done.updated_at);
        self.save_run(&done).await?;
        *run = done;

        self.release_claim(run).await?;
        progress(PERSIST_BAND.end);

        self.publish(
            &session_id,
            EventType::StageChanged,
            json!({ "run_id": run_id, "from": SessionState::GenCreatives, "to": SessionState::Done, "progress": PERSIST_BAND.end }),
        )
        .await?;
        self.publish(
            &session_id,
            EventType::RunCompleted,
            json!({
                "run_id": run_id,
                "state": SessionState::Done,
                "research_degraded": research_degraded,
                "assets": asset_count,
            }),
        )
        .await?;

        info!(research_degraded, assets = asset_count, "Run completed");
        Ok(run.snapshot())
    }

    async fn generate_assets(
        &self,
        ctx: &ProviderContext,
    ) -> (
        std::result::Result<StageOutput, (String, ProviderError)>,
        std::result::Result<StageOutput, (String, ProviderError)>,
    ) {
        let mut creative_ctx = ctx.clone();
        creative_ctx.kind = ProviderKind::Creative;
        let mut voice_ctx = ctx.clone();
        voice_ctx.kind = ProviderKind::Voice;

        tokio::join!(
            self.call_stage(ProviderKind::Creative, &creative_ctx),
            self.call_stage(ProviderKind::Voice, &voice_ctx),
        )
    }

    async fn publish_assets(
        &self,
        session_id: &str,
        run_id: &str,
        creative: &StageOutput,
        voice: &StageOutput,
    ) -> Result<()> {
        self.publish(session_id, EventType::CreativeDelta, stage_data(run_id, creative))
            .await?;
        self.publish(session_id, EventType::VoiceDelta, stage_data(run_id, voice))
            .await?;
        for asset in creative.assets.iter().chain(voice.assets.iter()) {
            self.publish(
                session_id,
                EventType::AssetReady,
                json!({ "run_id": run_id, "asset": asset }),
            )
            .await?;
        }
        Ok(())
    }

    /// Record a fatal stage failure and hand the error back
    async fn fail_run(
        &self,
        run: &mut Run,
        stage: ProviderKind,
        err: OrchestratorError,
    ) -> Result<RunSnapshot> {
        error!(run_id = %run.id, session_id = %run.session_id, stage = %stage, error = %err, "Run failed");
        self.mark_failed(run, Some(stage), &err).await;
        Err(err)
    }

    /// Fail a run that is not terminal yet, e.g. after a job timeout.
    ///
    /// A finished run only has its session claim released.
    #[instrument(skip(self, err), fields(run_id = %run_id))]
    pub async fn abort_run(&self, run_id: &str, err: &OrchestratorError) -> Result<()> {
        let mut run = self.load_run(run_id).await?;
        if run.is_finished() {
            return self.release_claim(&run).await;
        }
        error!(session_id = %run.session_id, error = %err, "Run aborted");
        self.mark_failed(&mut run, None, err).await;
        Ok(())
    }

    /// Storage problems here are logged, never allowed to mask `err`
    async fn mark_failed(&self, run: &mut Run, stage: Option<ProviderKind>, err: &OrchestratorError) {
        match run.state.transition(SessionState::Failed) {
            Ok(state) => run.state = state,
            Err(e) => warn!(run_id = %run.id, error = %e, "Run already terminal"),
        }
        run.error = Some(err.to_string());
        run.updated_at = Utc::now();
        run.completed_at = Some(run.updated_at);
        if let Err(e) = self.save_run(run).await {
            error!(run_id = %run.id, error = %e, "Failed to persist failed run");
        }

        let run_id = run.id.clone();
        let updated = self
            .update_session(&run.session_id, |s| {
                if s.state.can_transition_to(SessionState::Failed) {
                    s.transition(SessionState::Failed)?;
                }
                if s.active_run.as_deref() == Some(run_id.as_str()) {
                    s.active_run = None;
                }
                Ok(())
            })
            .await;
        if let Err(e) = updated {
            error!(run_id = %run.id, session_id = %run.session_id, error = %e, "Failed to persist failed session");
        }

        let published = self
            .publish(
                &run.session_id,
                EventType::Error,
                json!({
                    "run_id": run.id,
                    "code": err.code(),
                    "message": err.to_string(),
                    "stage": stage,
                    "fatal": true,
                }),
            )
            .await;
        if let Err(e) = published {
            error!(run_id = %run.id, error = %e, "Failed to publish run failure");
        }
    }

    // ------------------------------------------------------------------
    // Asset regeneration
    // ------------------------------------------------------------------

    /// Claim a completed run for asset regeneration
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn begin_assets(&self, run_id: &str) -> Result<Run> {
        let run = self.load_run(run_id).await?;
        if run.state != SessionState::Done || run.package.is_none() {
            return Err(OrchestratorError::InvalidInput(format!(
                "run {} has no completed package",
                run_id
            )));
        }

        let claimed = run.id.clone();
        self.update_session(&run.session_id, |s| {
            if let Some(active) = &s.active_run {
                return Err(OrchestratorError::RunAlreadyInFlight {
                    session_id: s.id.clone(),
                    run_id: active.clone(),
                });
            }
            s.active_run = Some(claimed);
            Ok(())
        })
        .await?;

        Ok(run)
    }

    /// Regenerate creative and voice output for a completed run.
    ///
    /// The stored package is only replaced on success.
    #[instrument(skip(self, progress), fields(run_id = %run_id))]
    pub async fn execute_assets(&self, run_id: &str, progress: ProgressFn<'_>) -> Result<RunSnapshot> {
        let result = self.regenerate_assets(run_id, progress).await;

        let run = self.load_run(run_id).await?;
        self.release_claim(&run).await?;
        let session_id = run.session_id;

        if let Err(err) = &result {
            error!(session_id = %session_id, error = %err, "Asset regeneration failed");
            self.publish(
                &session_id,
                EventType::Error,
                json!({
                    "run_id": run_id,
                    "code": err.code(),
                    "message": err.to_string(),
                    "stage": ProviderKind::Creative,
                    "fatal": true,
                }),
            )
            .await?;
        }
        result
    }

    async fn regenerate_assets(&self, run_id: &str, progress: ProgressFn<'_>) -> Result<RunSnapshot> {
        let mut run = self.load_run(run_id).await?;
        let session = self.load_session(&run.session_id).await?;
        let package = run
            .package
            .as_ref()
            .ok_or_else(|| OrchestratorError::InvalidInput(format!("run {} has no package", run_id)))?;

        progress(CREATIVE_BAND.start);
        let mut ctx = self.stage_context(ProviderKind::Creative, &session, run_id);
        ctx.slots = package.brief.clone();
        ctx.research = package.research.output.clone();
        ctx.research_degraded = package.research_degraded;
        ctx.strategy = Some(package.strategy.clone());

        let (creative, voice) = self.generate_assets(&ctx).await;
        let creative = creative.map_err(|(provider, e)| e.into_orchestrator(&provider))?;
        let voice = voice.map_err(|(provider, e)| e.into_orchestrator(&provider))?;
        self.publish_assets(&session.id, run_id, &creative, &voice).await?;
        progress(CREATIVE_BAND.end);

        if let Some(package) = run.package.as_mut() {
            package.replace_assets(creative, voice);
        }
        run.updated_at = Utc::now();
        self.save_run(&run).await?;
        progress(PERSIST_BAND.end);

        let asset_count = run.package.as_ref().map(|p| p.assets.len()).unwrap_or(0);
        self.publish(
            &session.id,
            EventType::RunCompleted,
            json!({
                "run_id": run_id,
                "state": run.state,
                "regenerated": true,
                "assets": asset_count,
            }),
        )
        .await?;

        info!(assets = asset_count, "Assets regenerated");
        Ok(run.snapshot())
    }
}

fn stage_data(run_id: &str, output: &StageOutput) -> serde_json::Value {
    json!({
        "run_id": run_id,
        "provider": output.provider,
        "summary": output.summary,
        "key_points": output.key_points,
        "risks": output.risks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedProvider;

    fn orchestrator() -> Orchestrator {
        Orchestrator::in_memory(ProviderSet::offline())
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let orch = orchestrator();
        let created = orch.create_session("en", Mode::Fast).await.unwrap();

        let fetched = orch.get_session(&created.session_id).await.unwrap();
        assert_eq!(fetched.state, SessionState::ChatCollecting);
        assert!(!fetched.gate.ready);
        assert_eq!(fetched.gate.missing_required.len(), 8);
    }

    #[tokio::test]
    async fn test_unknown_session_and_empty_input() {
        let orch = orchestrator();
        assert!(matches!(
            orch.process_turn("sess_missing", "hello").await,
            Err(OrchestratorError::SessionNotFound(_))
        ));

        let session = orch.create_session("en", Mode::Standard).await.unwrap();
        assert!(matches!(
            orch.process_turn(&session.session_id, "   ").await,
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            orch.create_session("", Mode::Standard).await,
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_turn_emits_planner_and_slot_events() {
        let orch = orchestrator();
        let session = orch.create_session("en", Mode::Standard).await.unwrap();

        let outcome = orch
            .process_turn(&session.session_id, "Product name: Glow Serum X")
            .await
            .unwrap();

        assert_eq!(outcome.state(), SessionState::ChatCollecting);
        let types: Vec<EventType> = outcome.events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::PlannerDelta, EventType::SlotUpdated]);
        assert!(outcome.reply.contains("Glow Serum X"));

        let stored = orch.session_record(&session.session_id).await.unwrap();
        assert_eq!(stored.slots.product.name.unwrap().value, "Glow Serum X");
        assert_eq!(stored.turn, 1);
    }

    #[tokio::test]
    async fn test_planner_failure_keeps_collecting() {
        let providers = ProviderSet::offline().with(
            ProviderKind::Planner,
            Arc::new(ScriptedProvider::failing("planner", "model overloaded")),
        );
        let orch = Orchestrator::in_memory(providers).with_retry_policy(RetryPolicy {
            initial_delay_ms: 0,
            ..RetryPolicy::default()
        });
        let session = orch.create_session("en", Mode::Standard).await.unwrap();

        let err = orch
            .process_turn(&session.session_id, "Product name: Glow")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "model overloaded");

        let snapshot = orch.get_session(&session.session_id).await.unwrap();
        assert_eq!(snapshot.state, SessionState::ChatCollecting);
        assert!(snapshot.slots.product.name.is_none());

        let events = orch.bus().events_since(&session.session_id, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Error);
        assert!(!events[0].is_terminal());
    }
}
