use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::Term;
use log::info;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::BucketAggregator;
use crate::auth::{secret_or_prompt, value_or_prompt, Credentials};
use crate::cancel::CancelToken;
use crate::config::{Config, OutputFormat};
use crate::output::{export_report, print_summary, StageProgress};
use crate::pipeline::{FetchPipeline, LogObserver, Outcome, PipelineObserver, RunReport};
use crate::sources::{GitLabSource, JenkinsSource, RemoteSource};

#[derive(Parser)]
#[command(name = "ci-usage")]
#[command(author, version, about = "Calculate CI usage per month for an entire CI instance", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./ci-usage.toml and friends)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write json/csv output to this file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Concurrent requests per stage
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Fail instead of skipping jobs or builds that keep erroring
    #[arg(long, global = true, default_value_t = false)]
    strict: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate CI minutes for an entire Jenkins instance
    Jenkins {
        /// Jenkins root URL
        url: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(long, env = "JENKINS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Connect without credentials
        #[arg(short, long, default_value_t = false)]
        anonymous: bool,
    },
    /// Calculate CI minutes for an entire GitLab instance
    Gitlab {
        /// GitLab base URL
        url: Option<String>,

        #[arg(short, long, env = "GITLAB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Skip TLS certificate verification
        #[arg(short = 'k', long, default_value_t = false)]
        insecure: bool,
    },
}

impl Cli {
    fn jenkins_source(
        config: &Config,
        url: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        anonymous: bool,
    ) -> Result<JenkinsSource> {
        let url = url
            .or(config.jenkins.url.as_deref())
            .context("No Jenkins URL given on the command line or in the config file")?;

        let credentials = if anonymous || config.jenkins.anonymous {
            None
        } else {
            let username = username
                .map(ToOwned::to_owned)
                .or_else(|| config.jenkins.username.clone());
            Some(Credentials {
                username: value_or_prompt(username, "Jenkins username: ")?,
                password: secret_or_prompt(password.map(ToOwned::to_owned), "Jenkins password: ")?,
            })
        };

        info!("Calculating CI usage for Jenkins instance: {url}");
        JenkinsSource::new(
            url,
            credentials,
            Duration::from_secs(config.jenkins.timeout_secs),
        )
        .context("Failed to set up Jenkins client")
    }

    fn gitlab_source(
        config: &Config,
        url: Option<&str>,
        token: Option<&str>,
        insecure: bool,
    ) -> Result<GitLabSource> {
        let url = url
            .or(config.gitlab.url.as_deref())
            .context("No GitLab URL given on the command line or in the config file")?;
        let token = secret_or_prompt(token.map(ToOwned::to_owned), "GitLab private token: ")?;

        info!("Calculating CI usage for GitLab instance: {url}");
        GitLabSource::new(
            url,
            Some(token),
            Duration::from_secs(config.gitlab.timeout_secs),
            insecure || config.gitlab.insecure,
        )
        .context("Failed to set up GitLab client")
    }

    /// Runs the pipeline until it finishes or the user presses Ctrl+C.
    async fn collect(&self, config: &Config, source: Arc<dyn RemoteSource>) -> Result<RunReport> {
        let settings = config.pipeline_settings(self.workers, self.strict)?;
        let observer: Arc<dyn PipelineObserver> = if Term::stderr().is_term() {
            Arc::new(StageProgress::new(source.unit()))
        } else {
            Arc::new(LogObserver)
        };

        let cancel = CancelToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            let observer = Arc::clone(&observer);
            tokio::spawn(async move {
                if handle_interrupts(tokio::signal::ctrl_c, observer.as_ref(), &cancel).await {
                    std::process::exit(130);
                }
            })
        };

        let pipeline = FetchPipeline::new(source, settings, observer, cancel);
        let aggregator = BucketAggregator::new();
        let result = pipeline.run(&aggregator).await;
        interrupt.abort();

        let report = result.context("Failed to collect CI usage")?;
        if report.outcome == Outcome::Cancelled {
            info!("Run cancelled, reporting partial results");
        }
        Ok(report)
    }

    fn write_report(&self, config: &Config, report: &RunReport) -> Result<()> {
        let format = self.format.unwrap_or(config.output.format);
        let pretty = self.pretty || config.output.pretty;

        if format == OutputFormat::Summary {
            if self.output.is_some() {
                anyhow::bail!("--output requires --format json or --format csv");
            }
            print_summary(report);
            return Ok(());
        }

        if let Some(output_path) = &self.output {
            let mut file = std::fs::File::create(output_path)
                .with_context(|| format!("Failed to create {}", output_path.display()))?;
            export_report(report, format, pretty, &mut file)?;
            info!("Report written to: {}", output_path.display());
        } else {
            export_report(report, format, pretty, &mut std::io::stdout().lock())?;
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        let source: Arc<dyn RemoteSource> = match &self.command {
            Commands::Jenkins {
                url,
                username,
                password,
                anonymous,
            } => Arc::new(Self::jenkins_source(
                &config,
                url.as_deref(),
                username.as_deref(),
                password.as_deref(),
                *anonymous,
            )?),
            Commands::Gitlab {
                url,
                token,
                insecure,
            } => Arc::new(Self::gitlab_source(
                &config,
                url.as_deref(),
                token.as_deref(),
                *insecure,
            )?),
        };

        let report = self.collect(&config, source).await?;
        self.write_report(&config, &report)
    }
}

/// Cancels the run on the first interrupt.
///
/// Returns `true` once a second interrupt arrives, `false` when the signal
/// source fails.
async fn handle_interrupts<F, Fut>(
    mut next_interrupt: F,
    observer: &dyn PipelineObserver,
    cancel: &CancelToken,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    observer.interrupted();
    cancel.cancel();
    next_interrupt().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tokio::sync::Notify;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_jenkins_command() {
        let cli = Cli::try_parse_from([
            "ci-usage",
            "jenkins",
            "https://jenkins.example.com",
            "-u",
            "builder",
            "-w",
            "10",
            "--format",
            "csv",
        ])
        .unwrap();

        assert_eq!(cli.workers, Some(10));
        assert_eq!(cli.format, Some(OutputFormat::Csv));
        match cli.command {
            Commands::Jenkins {
                url,
                username,
                anonymous,
                ..
            } => {
                assert_eq!(url.as_deref(), Some("https://jenkins.example.com"));
                assert_eq!(username.as_deref(), Some("builder"));
                assert!(!anonymous);
            }
            Commands::Gitlab { .. } => panic!("expected jenkins command"),
        }
    }

    #[test]
    fn test_parse_gitlab_command() {
        let cli = Cli::try_parse_from([
            "ci-usage",
            "gitlab",
            "https://gitlab.example.com",
            "-k",
            "--token",
            "glpat-x",
            "--strict",
        ])
        .unwrap();

        assert!(cli.strict);
        match cli.command {
            Commands::Gitlab {
                url,
                token,
                insecure,
            } => {
                assert_eq!(url.as_deref(), Some("https://gitlab.example.com"));
                assert_eq!(token.as_deref(), Some("glpat-x"));
                assert!(insecure);
            }
            Commands::Jenkins { .. } => panic!("expected gitlab command"),
        }
    }

    #[test]
    fn test_jenkins_url_falls_back_to_config() {
        let mut config = Config::default();
        config.jenkins.url = Some("https://jenkins.internal".to_string());

        let source = Cli::jenkins_source(&config, None, None, None, true);
        assert!(source.is_ok());
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let err = Cli::jenkins_source(&Config::default(), None, None, None, true)
            .err()
            .unwrap();
        assert!(err.to_string().contains("No Jenkins URL"));
    }

    #[test]
    fn test_summary_with_output_file_is_rejected() {
        let cli = Cli::try_parse_from(["ci-usage", "--output", "usage.txt", "jenkins", "https://j"])
            .unwrap();
        let report = RunReport {
            outcome: Outcome::Completed,
            unit: "build",
            jobs_found: 0,
            jobs_disabled: 0,
            jobs_dropped: 0,
            build_refs: 0,
            builds_recorded: 0,
            builds_dropped: 0,
            stats: BucketAggregator::new().snapshot(),
        };

        assert!(cli.write_report(&Config::default(), &report).is_err());
    }

    #[tokio::test]
    async fn test_first_interrupt_cancels_second_forces_exit() {
        let interrupts = Arc::new(Notify::new());
        let cancel = CancelToken::new();
        let handler = {
            let interrupts = Arc::clone(&interrupts);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let next_interrupt = move || {
                    let interrupts = Arc::clone(&interrupts);
                    async move {
                        interrupts.notified().await;
                        Ok(())
                    }
                };
                handle_interrupts(next_interrupt, &LogObserver, &cancel).await
            })
        };

        interrupts.notify_one();
        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
            .await
            .expect("first interrupt should cancel the run");
        assert!(!handler.is_finished());

        interrupts.notify_one();
        let forced = tokio::time::timeout(Duration::from_secs(5), handler)
            .await
            .expect("second interrupt should end the handler")
            .unwrap();
        assert!(forced);
    }

    #[tokio::test]
    async fn test_failed_signal_source_leaves_run_alone() {
        let cancel = CancelToken::new();
        let failing = || async { Err(std::io::Error::other("no signal handler")) };

        assert!(!handle_interrupts(failing, &LogObserver, &cancel).await);
        assert!(!cancel.is_cancelled());
    }
}
