//! Stage execution primitives: retry policy, stage budgets, progress bands.

use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{error, warn};

use crate::adapters::{Provider, ProviderContext, ProviderKind, ProviderOutput};
use crate::config::PipelineSettings;
use crate::error::ProviderError;

/// Retry configuration for a provider call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// One retry, paced by the configured delay
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        let delay_ms = settings.retry_delay.as_millis() as u64;
        Self {
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms.max(Self::default().max_delay_ms),
            ..Self::default()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Time allowed for one stage, across all of its attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBudget {
    pub hard: Duration,
    /// Log a warning past this point but keep waiting
    pub soft: Option<Duration>,
}

impl StageBudget {
    pub fn hard(hard: Duration) -> Self {
        Self { hard, soft: None }
    }

    pub fn for_kind(kind: ProviderKind, settings: &PipelineSettings) -> Self {
        match kind {
            ProviderKind::Planner => Self::hard(settings.planner_timeout),
            ProviderKind::Research => Self {
                hard: settings.research_hard_timeout,
                soft: Some(settings.research_soft_timeout),
            },
            _ => Self::hard(settings.stage_timeout),
        }
    }
}

/// Slice of job progress owned by one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

pub const RESEARCH_BAND: ProgressBand = ProgressBand { start: 0, end: 35 };
pub const STRATEGY_BAND: ProgressBand = ProgressBand { start: 35, end: 78 };
pub const CREATIVE_BAND: ProgressBand = ProgressBand { start: 78, end: 96 };
pub const PERSIST_BAND: ProgressBand = ProgressBand { start: 96, end: 100 };

/// Call a provider with retry under a single stage deadline.
///
/// Every attempt receives the same context. A retry never extends the
/// budget: once the hard deadline passes the last error is a timeout.
pub async fn invoke_with_retry(
    provider: &dyn Provider,
    kind: ProviderKind,
    ctx: &ProviderContext,
    budget: StageBudget,
    policy: &RetryPolicy,
) -> Result<ProviderOutput, ProviderError> {
    let started = Instant::now();
    let deadline = started + budget.hard;
    let soft_deadline = budget.soft.map(|soft| started + soft);
    let fingerprint = ctx.fingerprint();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let call = call_with_soft_warning(provider, kind, ctx, soft_deadline);
        let result = match timeout_at(deadline, call).await {
            Ok(Ok(output)) => output.validate(kind).map(|_| output),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Timeout(format!(
                "{} stage timed out after {:?}",
                kind, budget.hard
            ))),
        };

        let err = match result {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if policy.should_retry(attempt) && !remaining.is_zero() {
            let delay = policy.delay_for_attempt(attempt).min(remaining);
            warn!(
                provider = provider.name(),
                stage = %kind,
                attempt,
                %fingerprint,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        error!(
            provider = provider.name(),
            stage = %kind,
            attempt,
            %fingerprint,
            error = %err,
            "Provider call failed permanently"
        );
        return Err(err);
    }
}

async fn call_with_soft_warning(
    provider: &dyn Provider,
    kind: ProviderKind,
    ctx: &ProviderContext,
    soft_deadline: Option<Instant>,
) -> Result<ProviderOutput, ProviderError> {
    let call = provider.run(ctx);
    tokio::pin!(call);

    if let Some(soft) = soft_deadline.filter(|soft| *soft > Instant::now()) {
        tokio::select! {
            result = &mut call => return result,
            _ = sleep_until(soft) => {
                warn!(provider = provider.name(), stage = %kind, "Provider past soft timeout, still waiting");
            }
        }
    }

    call.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ScriptedProvider, Step};
    use crate::domain::Slots;

    fn ctx(kind: ProviderKind) -> ProviderContext {
        ProviderContext::new(kind, "sess_a", Slots::new())
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_default_policy_retries_once() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_progress_bands_are_contiguous() {
        let bands = [RESEARCH_BAND, STRATEGY_BAND, CREATIVE_BAND, PERSIST_BAND];
        assert_eq!(bands[0].start, 0);
        for pair in bands.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(bands[3].end, 100);
    }

    #[tokio::test]
    async fn test_retry_once_with_identical_input() {
        let provider = ScriptedProvider::new("strategy")
            .then(Step::Fail(ProviderError::Upstream("first".into())))
            .then(Step::Ok(ProviderOutput::with_summary("plan")));

        let out = invoke_with_retry(
            &provider,
            ProviderKind::Strategy,
            &ctx(ProviderKind::Strategy),
            StageBudget::hard(Duration::from_secs(5)),
            &fast_policy(),
        )
        .await
        .unwrap();

        assert_eq!(out.summary, "plan");
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_second_failure_is_returned_verbatim() {
        let provider = ScriptedProvider::new("strategy")
            .then(Step::Fail(ProviderError::Upstream("first".into())))
            .then(Step::Fail(ProviderError::Upstream("second".into())));

        let err = invoke_with_retry(
            &provider,
            ProviderKind::Strategy,
            &ctx(ProviderKind::Strategy),
            StageBudget::hard(Duration::from_secs(5)),
            &fast_policy(),
        )
        .await
        .unwrap_err();

        assert_eq!(err, ProviderError::Upstream("second".into()));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_output_counts_as_failure() {
        let provider = ScriptedProvider::new("creative").then(Step::Ok(ProviderOutput::default()));

        let err = invoke_with_retry(
            &provider,
            ProviderKind::Creative,
            &ctx(ProviderKind::Creative),
            StageBudget::hard(Duration::from_secs(5)),
            &fast_policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::SchemaValidation(_)));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_consumes_whole_budget_without_retry() {
        let provider = ScriptedProvider::new("research").then(Step::Hang);

        let err = invoke_with_retry(
            &provider,
            ProviderKind::Research,
            &ctx(ProviderKind::Research),
            StageBudget {
                hard: Duration::from_secs(20),
                soft: Some(Duration::from_secs(10)),
            },
            &fast_policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_after_soft_timeout_is_accepted() {
        let provider = ScriptedProvider::new("research").then(Step::Delay(
            Duration::from_secs(15),
            ProviderOutput::with_summary("late but fine"),
        ));

        let out = invoke_with_retry(
            &provider,
            ProviderKind::Research,
            &ctx(ProviderKind::Research),
            StageBudget {
                hard: Duration::from_secs(20),
                soft: Some(Duration::from_secs(10)),
            },
            &fast_policy(),
        )
        .await
        .unwrap();

        assert_eq!(out.summary, "late but fine");
    }
}
