//! External command provider.
//!
//! Spawns a configured program, writes the provider context as JSON to its
//! stdin and parses a [`ProviderOutput`] from its stdout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{Provider, ProviderContext, ProviderKind, ProviderOutput};
use crate::config::ProviderCommandConfig;
use crate::error::ProviderError;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider backed by a subprocess speaking JSON over stdio
pub struct CommandProvider {
    name: String,
    program: String,
    args: Vec<String>,
    call_timeout: Duration,
}

impl CommandProvider {
    pub fn new(kind: ProviderKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: kind.as_str().to_string(),
            program: program.into(),
            args,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn from_config(kind: ProviderKind, config: &ProviderCommandConfig) -> Self {
        let mut provider = Self::new(kind, config.command.clone(), config.args.clone());
        if let Some(secs) = config.timeout_secs {
            provider.call_timeout = Duration::from_secs(secs);
        }
        provider
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn execute(&self, input: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::Upstream(format!(
                    "failed to spawn {} provider '{}': {}",
                    self.name, self.program, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(|e| {
                ProviderError::Upstream(format!("failed to write {} provider stdin: {}", self.name, e))
            })?;
            // stdin dropped here to signal EOF
        }

        let output = timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "{} provider timed out after {:?}",
                    self.name, self.call_timeout
                ))
            })?
            .map_err(|e| {
                ProviderError::Upstream(format!("failed to wait for {} provider: {}", self.name, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ProviderError::Upstream(format!(
                "{} provider exited with code {}: {}",
                self.name,
                exit_code,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &ProviderContext) -> Result<ProviderOutput, ProviderError> {
        let input = serde_json::to_vec(ctx).map_err(|e| {
            ProviderError::Upstream(format!("failed to encode {} context: {}", self.name, e))
        })?;

        debug!(provider = %self.name, program = %self.program, bytes = input.len(), "Spawning provider command");
        let stdout = self.execute(&input).await?;

        serde_json::from_slice(&stdout).map_err(|e| {
            ProviderError::SchemaValidation(format!(
                "{} provider returned invalid JSON: {}",
                self.name, e
            ))
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::Slots;

    fn sh(kind: ProviderKind, script: &str) -> CommandProvider {
        CommandProvider::new(kind, "sh", vec!["-c".to_string(), script.to_string()])
    }

    fn ctx() -> ProviderContext {
        ProviderContext::new(ProviderKind::Strategy, "sess_a", Slots::new())
    }

    #[tokio::test]
    async fn test_parses_json_stdout() {
        let provider = sh(
            ProviderKind::Strategy,
            r#"cat > /dev/null; echo '{"summary":"Lead with hydration","risks":["crowded category"]}'"#,
        );
        let out = provider.run(&ctx()).await.unwrap();
        assert_eq!(out.summary, "Lead with hydration");
        assert_eq!(out.risks, vec!["crowded category".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_json_is_schema_error() {
        let provider = sh(ProviderKind::Strategy, "cat > /dev/null; echo not json");
        let err = provider.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, ProviderError::SchemaValidation(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_upstream_error() {
        let provider = sh(ProviderKind::Strategy, "cat > /dev/null; echo quota exceeded >&2; exit 3");
        let err = provider.run(&ctx()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Upstream("strategy provider exited with code 3: quota exceeded".to_string())
        );
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let provider =
            sh(ProviderKind::Research, "sleep 5").with_timeout(Duration::from_millis(100));
        let err = provider.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
