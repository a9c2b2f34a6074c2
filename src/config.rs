//! Configuration for launchkit.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LAUNCHKIT_HOME)
//! 2. Config file (.launchkit/config.yaml)
//! 3. Defaults (~/.launchkit)
//!
//! Config file discovery:
//! - Searches current directory and parents for .launchkit/config.yaml
//! - `paths.home` is relative to the .launchkit/ directory

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::ProviderKind;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .launchkit/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub planner_timeout_secs: Option<u64>,
    pub research_soft_timeout_secs: Option<u64>,
    pub research_hard_timeout_secs: Option<u64>,
    pub stage_timeout_secs: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusConfig {
    pub buffer_capacity: Option<usize>,
}

/// External command for one provider role
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderCommandConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProvidersConfig {
    pub planner: Option<ProviderCommandConfig>,
    pub research: Option<ProviderCommandConfig>,
    pub strategy: Option<ProviderCommandConfig>,
    pub creative: Option<ProviderCommandConfig>,
    pub voice: Option<ProviderCommandConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderCommandConfig> {
        match kind {
            ProviderKind::Planner => self.planner.as_ref(),
            ProviderKind::Research => self.research.as_ref(),
            ProviderKind::Strategy => self.strategy.as_ref(),
            ProviderKind::Creative => self.creative.as_ref(),
            ProviderKind::Voice => self.voice.as_ref(),
        }
    }
}

/// Stage budgets and retry pacing
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub planner_timeout: Duration,
    /// Past this research keeps running but a warning is logged
    pub research_soft_timeout: Duration,
    pub research_hard_timeout: Duration,
    /// Budget for strategy, creative and voice stages
    pub stage_timeout: Duration,
    /// Whole-job budget enforced by the scheduler
    pub job_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            planner_timeout: Duration::from_secs(30),
            research_soft_timeout: Duration::from_secs(10),
            research_hard_timeout: Duration::from_secs(20),
            stage_timeout: Duration::from_secs(60),
            job_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl PipelineSettings {
    fn from_config(config: &PipelineConfig) -> Self {
        let defaults = Self::default();
        let secs = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        Self {
            planner_timeout: secs(config.planner_timeout_secs, defaults.planner_timeout),
            research_soft_timeout: secs(
                config.research_soft_timeout_secs,
                defaults.research_soft_timeout,
            ),
            research_hard_timeout: secs(
                config.research_hard_timeout_secs,
                defaults.research_hard_timeout,
            ),
            stage_timeout: secs(config.stage_timeout_secs, defaults.stage_timeout),
            job_timeout: secs(config.job_timeout_secs, defaults.job_timeout),
            retry_delay: config
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        }
    }
}

pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to launchkit home (sessions, runs, event journals)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    /// Events kept in memory per session for resuming subscribers
    pub bus_capacity: usize,
    pub providers: ProvidersConfig,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".launchkit").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Resolve from an optional config file and an optional LAUNCHKIT_HOME value
fn resolve(config_file: Option<PathBuf>, env_home: Option<String>) -> Result<ResolvedConfig> {
    let default_home = || -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".launchkit"))
    };

    let Some(config_path) = config_file else {
        let home = match env_home {
            Some(home) => PathBuf::from(home),
            None => default_home()?,
        };
        return Ok(ResolvedConfig {
            home,
            config_file: None,
            pipeline: PipelineSettings::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            providers: ProvidersConfig::default(),
        });
    };

    let config = load_config_file(&config_path)?;
    let launchkit_dir = config_path.parent().unwrap_or(Path::new("."));

    let home = if let Some(home) = env_home {
        PathBuf::from(home)
    } else if let Some(ref home_path) = config.paths.home {
        resolve_path(launchkit_dir, home_path)
    } else {
        default_home()?
    };

    Ok(ResolvedConfig {
        home,
        pipeline: PipelineSettings::from_config(&config.pipeline),
        bus_capacity: config
            .bus
            .buffer_capacity
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_BUS_CAPACITY),
        providers: config.providers,
        config_file: Some(config_path),
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve(find_config_file(), std::env::var("LAUNCHKIT_HOME").ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(".launchkit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, None).unwrap();

        let expected_home = dirs::home_dir().unwrap().join(".launchkit");
        assert_eq!(config.home, expected_home);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.bus_capacity, DEFAULT_BUS_CAPACITY);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_env_home_wins() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "version: \"1.0\"\npaths:\n  home: ./state\n");

        let config = resolve(Some(path), Some("/tmp/lk-env".to_string())).unwrap();
        assert_eq!(config.home, PathBuf::from("/tmp/lk-env"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
pipeline:
  research_soft_timeout_secs: 5
  job_timeout_secs: 120
  retry_delay_ms: 0
bus:
  buffer_capacity: 64
providers:
  strategy:
    command: /usr/local/bin/strategy-agent
    args: ["--json"]
    timeout_secs: 45
"#,
        );

        let config = resolve(Some(path.clone()), None).unwrap();
        assert_eq!(config.home, path.parent().unwrap().join("state"));
        assert_eq!(config.pipeline.research_soft_timeout, Duration::from_secs(5));
        assert_eq!(config.pipeline.research_hard_timeout, Duration::from_secs(20));
        assert_eq!(config.pipeline.job_timeout, Duration::from_secs(120));
        assert_eq!(config.pipeline.retry_delay, Duration::ZERO);
        assert_eq!(config.bus_capacity, 64);

        let strategy = config.providers.get(ProviderKind::Strategy).unwrap();
        assert_eq!(strategy.command, "/usr/local/bin/strategy-agent");
        assert_eq!(strategy.args, vec!["--json".to_string()]);
        assert!(config.providers.get(ProviderKind::Research).is_none());
    }

    #[test]
    fn test_invalid_yaml_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "version: [unclosed");

        let err = resolve(Some(path), None).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.launchkit");

        assert_eq!(
            resolve_path(&base, "./state"),
            PathBuf::from("/home/user/project/.launchkit/state")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
