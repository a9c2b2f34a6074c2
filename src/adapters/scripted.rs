//! Scripted provider for deterministic runs.
//!
//! Plays back a fixed sequence of outcomes, one per call, and records every
//! context it was called with. Once the script runs out the last step repeats.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Provider, ProviderContext, ProviderOutput};
use crate::error::ProviderError;

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum Step {
    Ok(ProviderOutput),
    Fail(ProviderError),
    /// Answer after a delay
    Delay(Duration, ProviderOutput),
    /// Never answer
    Hang,
}

pub struct ScriptedProvider {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: Mutex<Vec<ProviderContext>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider that always succeeds with the given summary
    pub fn succeeding(name: impl Into<String>, summary: &str) -> Self {
        Self::new(name).then(Step::Ok(ProviderOutput::with_summary(summary)))
    }

    /// Provider that always fails upstream with `message`
    pub fn failing(name: impl Into<String>, message: &str) -> Self {
        Self::new(name).then(Step::Fail(ProviderError::Upstream(message.to_string())))
    }

    pub fn then(self, step: Step) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }

    /// Contexts received so far, in call order
    pub fn calls(&self) -> Vec<ProviderContext> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn next_step(&self) -> Option<Step> {
        let mut steps = self.steps.lock().ok()?;
        let mut last = self.last.lock().ok()?;
        match steps.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &ProviderContext) -> Result<ProviderOutput, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ctx.clone());
        }

        match self.next_step() {
            Some(Step::Ok(output)) => Ok(output),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Delay(delay, output)) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
            Some(Step::Hang) => std::future::pending().await,
            None => Err(ProviderError::Upstream(format!(
                "{} has no scripted response",
                self.name
            ))),
        }
    }
}
