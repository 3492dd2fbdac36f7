use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::{PipelineSettings, DEFAULT_WORKERS};
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

/// Configuration file structure for ci-usage.
///
/// Holds connection defaults and pipeline tuning so repeated runs against the
/// same server need no flags. Secrets are deliberately not part of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub jenkins: JenkinsConfig,

    #[serde(default)]
    pub gitlab: GitLabConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JenkinsConfig {
    /// Jenkins root URL
    pub url: Option<String>,

    /// User for basic auth
    pub username: Option<String>,

    /// Connect without credentials
    #[serde(default)]
    pub anonymous: bool,

    /// HTTP timeout per request
    #[serde(default = "default_jenkins_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab instance base URL
    pub url: Option<String>,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,

    /// HTTP timeout per request
    #[serde(default = "default_gitlab_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Concurrent requests per stage
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Fail the run when a job or build cannot be fetched after all retries
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Csv,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            anonymous: false,
            timeout_secs: default_jenkins_timeout(),
        }
    }
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: None,
            insecure: false,
            timeout_secs: default_gitlab_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            strict: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_jenkins_timeout() -> u64 {
    300
}

fn default_gitlab_timeout() -> u64 {
    60
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./ci-usage.toml
    /// 3. ./ci-usage.json
    /// 4. ./ci-usage.yaml
    /// 5. ./ci-usage.yml
    /// 6. `<user config dir>/ci-usage/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["ci-usage.toml", "ci-usage.json", "ci-usage.yaml", "ci-usage.yml"]
            .into_iter()
            .map(PathBuf::from)
            .chain(Self::user_config_path());

        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_path(&candidate);
            }
        }

        Ok(Self::default())
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ci-usage").join("config.toml"))
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Pipeline settings with an optional worker override from the command line.
    pub fn pipeline_settings(&self, workers: Option<usize>, strict: bool) -> Result<PipelineSettings> {
        let workers = workers.unwrap_or(self.pipeline.workers);
        if workers == 0 {
            anyhow::bail!("Worker count must be a positive integer");
        }

        Ok(PipelineSettings {
            workers,
            strict: strict || self.pipeline.strict,
            retry: self.retry.policy(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.workers, 25);
        assert!(!config.pipeline.strict);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.jenkins.timeout_secs, 300);
        assert_eq!(config.gitlab.timeout_secs, 60);
        assert_eq!(config.output.format, OutputFormat::Summary);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[jenkins]
url = "https://jenkins.example.com"
username = "ci-bot"

[pipeline]
workers = 8
strict = true

[retry]
max-attempts = 5
base-delay-ms = 250

[output]
format = "csv"
"#;
        write!(temp_file, "{toml_content}").unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.jenkins.url.as_deref(), Some("https://jenkins.example.com"));
        assert_eq!(config.jenkins.username.as_deref(), Some("ci-bot"));
        assert_eq!(config.jenkins.timeout_secs, 300);
        assert_eq!(config.pipeline.workers, 8);
        assert!(config.pipeline.strict);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(config.output.format, OutputFormat::Csv);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        let yaml_content = r"
gitlab:
  url: https://gitlab.example.com
  insecure: true
output:
  format: json
  pretty: true
";
        write!(temp_file, "{yaml_content}").unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.gitlab.url.as_deref(), Some("https://gitlab.example.com"));
        assert!(config.gitlab.insecure);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_json_config_without_extension() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, r#"{{"pipeline": {{"workers": 3}}}}"#).unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.pipeline.workers, 3);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let result = Config::load(Some(Path::new("does-not-exist.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "[pipeline]\nworkers = \"many\"\n").unwrap();

        let err = Config::load(Some(temp_file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML config"));
    }

    #[test]
    fn test_pipeline_settings_overrides() {
        let config = Config::default();

        let settings = config.pipeline_settings(Some(4), true).unwrap();
        assert_eq!(settings.workers, 4);
        assert!(settings.strict);
        assert_eq!(settings.retry.base_delay, Duration::from_secs(1));
        assert_eq!(settings.retry.max_delay, Duration::from_secs(60));

        let settings = config.pipeline_settings(None, false).unwrap();
        assert_eq!(settings.workers, 25);
        assert!(!settings.strict);
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = Config::default();
        assert!(config.pipeline_settings(Some(0), false).is_err());
    }
}
