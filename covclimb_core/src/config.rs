use crate::executor::{COVERAGE_ENV_VALUE, COVERAGE_ENV_VAR, CommandExecutorConfig};
use crate::fuzzer::SearchSettings;
use crate::trace::DEFAULT_TRACE_EXTENSION;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Input size the reference target reads from stdin.
pub const DEFAULT_INPUT_LEN: usize = 57;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_input_len")]
    pub input_len: usize,
    /// Unbounded when absent.
    #[serde(default)]
    pub max_attempts_per_position: Option<u64>,
    /// Seeded from OS entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

pub fn default_input_len() -> usize {
    DEFAULT_INPUT_LEN
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            input_len: default_input_len(),
            max_attempts_per_position: None,
            seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverageEnv {
    pub name: String,
    pub value: String,
}

fn default_coverage_env() -> CoverageEnv {
    CoverageEnv {
        name: COVERAGE_ENV_VAR.to_string(),
        value: COVERAGE_ENV_VALUE.to_string(),
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Program and arguments. Usually supplied on the command line instead.
    #[serde(default)]
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Blocking wait when absent.
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_coverage_env")]
    pub coverage_env: CoverageEnv,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            timeout_ms: None,
            coverage_env: default_coverage_env(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TraceSettings {
    #[serde(default = "default_trace_extension")]
    pub extension: String,
    /// Defaults to the executor's working directory.
    pub trace_dir: Option<PathBuf>,
}

fn default_trace_extension() -> String {
    DEFAULT_TRACE_EXTENSION.to_string()
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            extension: default_trace_extension(),
            trace_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CovclimbConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub trace: TraceSettings,
}

impl CovclimbConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Where the target's trace files show up: the explicit trace dir, else the
    /// child's working directory, else the current directory.
    pub fn trace_dir(&self) -> PathBuf {
        self.trace
            .trace_dir
            .clone()
            .or_else(|| self.executor.working_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn command_executor_config(&self) -> CommandExecutorConfig {
        let mut config = CommandExecutorConfig::new(self.executor.command.clone());
        config.working_dir = self.executor.working_dir.clone();
        config.timeout = self.executor.timeout_ms.map(Duration::from_millis);
        config.envs = vec![(
            self.executor.coverage_env.name.clone(),
            self.executor.coverage_env.value.clone(),
        )];
        config
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            input_len: self.fuzzer.input_len,
            max_attempts_per_position: self.fuzzer.max_attempts_per_position,
        }
    }
}
