use crate::commands::apply::{run_apply, ApplyArgs};
use crate::commands::interactive::run_interactive;
use crate::runtime_utils::connect_runtime;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use envpatch_core::env::EnvironmentAssertion;
use envpatch_core::errors::EnvPatchError;
use envpatch_core::logging::{self, LogOptions};
use envpatch_core::mutation::{BatchPolicy, MutationOptions};
use envpatch_core::runtime::RuntimeKind;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

/// Runtime selection options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum RuntimeOption {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl From<RuntimeOption> for RuntimeKind {
    fn from(runtime: RuntimeOption) -> Self {
        match runtime {
            RuntimeOption::Docker => RuntimeKind::Docker,
            RuntimeOption::Podman => RuntimeKind::Podman,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `OK` on success, failure details on stderr
    #[default]
    Text,
    /// Per-container JSON report on stdout
    Json,
}

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Log level options
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    #[default]
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Options shared by the batch and interactive paths
#[derive(Debug, Clone, Default)]
pub struct CliContext {
    pub runtime: Option<RuntimeKind>,
    pub host: Option<String>,
    pub stop_timeout: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Change an environment variable of a container by recreating it in place",
    long_about = "Change an environment variable of a container by recreating it in place\n\n\
        Without arguments an interactive session lists the containers and lets you edit their \
        environment. With CONTAINER and NAME=VALUE every container named exactly CONTAINER is \
        recreated with the variable set.",
    color = clap::ColorChoice::Auto
)]
pub struct Cli {
    /// Exact name of the container(s) to patch
    #[arg(value_name = "CONTAINER", requires = "assignment")]
    pub container: Option<String>,

    /// Variable to set, as NAME=VALUE (the value may contain '=')
    #[arg(value_name = "NAME=VALUE", requires = "container")]
    pub assignment: Option<String>,

    /// Container runtime to use (docker or podman, can be set via ENVPATCH_RUNTIME env var)
    #[arg(long, value_enum)]
    pub runtime: Option<RuntimeOption>,

    /// Runtime API endpoint such as unix:///run/docker.sock or tcp://host:2375 (ENVPATCH_HOST)
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,

    /// Log file path (defaults to ./envpatch.log, can be set via ENVPATCH_LOG_FILE env var)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log format (text or json, can be set via ENVPATCH_LOG_FORMAT env var)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Seconds to wait for a container to stop before it is killed
    #[arg(long, value_name = "SECONDS")]
    pub stop_timeout: Option<u32>,

    /// Stop at the first container that cannot be patched
    #[arg(long)]
    pub fail_fast: bool,

    /// Do not recreate containers that already carry the requested value
    #[arg(long)]
    pub skip_unchanged: bool,

    /// Batch output format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl Cli {
    fn context(&self) -> CliContext {
        CliContext {
            runtime: self.runtime.map(Into::into),
            host: self.host.clone(),
            stop_timeout: self.stop_timeout,
        }
    }

    /// Parsed batch arguments, or `None` for the interactive session
    fn batch_target(&self) -> Result<Option<(String, EnvironmentAssertion)>> {
        match (&self.container, &self.assignment) {
            (Some(container), Some(assignment)) => {
                let assertion =
                    EnvironmentAssertion::parse(assignment).map_err(EnvPatchError::from)?;
                Ok(Some((container.clone(), assertion)))
            }
            _ => Ok(None),
        }
    }

    pub async fn dispatch(self) -> Result<()> {
        logging::init_with_options(&LogOptions {
            format: self.log_format.map(|f| f.as_str().to_string()),
            file: self.log_file.clone(),
            default_level: Some(self.log_level.as_str().to_string()),
        })?;
        tracing::debug!("CLI initialized with log level: {}", self.log_level.as_str());

        // Usage problems are reported before the runtime is contacted
        let batch = self.batch_target()?;
        if batch.is_none() && !std::io::stdout().is_terminal() {
            return Err(EnvPatchError::Configuration(
                "the interactive session needs a terminal; pass CONTAINER NAME=VALUE for batch mode"
                    .to_string(),
            )
            .into());
        }

        let context = self.context();
        let runtime = connect_runtime(&context).await?;

        match batch {
            Some((filter, assertion)) => {
                let args = ApplyArgs {
                    filter,
                    assertion,
                    options: MutationOptions {
                        stop_timeout: context.stop_timeout,
                        skip_unchanged: self.skip_unchanged,
                        policy: if self.fail_fast {
                            BatchPolicy::FailFast
                        } else {
                            BatchPolicy::ContinueOnError
                        },
                    },
                    output: self.output,
                };
                run_apply(&runtime, &args).await
            }
            None => {
                let options = MutationOptions {
                    stop_timeout: context.stop_timeout,
                    skip_unchanged: true,
                    policy: BatchPolicy::ContinueOnError,
                };
                run_interactive(Arc::new(runtime), options).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_no_arguments_selects_interactive() {
        let cli = Cli::parse_from(["envpatch"]);
        assert!(cli.container.is_none());
        assert!(cli.batch_target().unwrap().is_none());
        assert_eq!(cli.output, OutputFormat::Text);
        assert!(!cli.fail_fast);
    }

    #[test]
    fn test_two_positionals_select_batch() {
        let cli = Cli::parse_from(["envpatch", "web-1", "DSN=a=b"]);
        let (filter, assertion) = cli.batch_target().unwrap().unwrap();
        assert_eq!(filter, "web-1");
        assert_eq!(assertion.name(), "DSN");
        assert_eq!(assertion.value(), "a=b");
    }

    #[test]
    fn test_single_positional_is_rejected() {
        assert!(Cli::try_parse_from(["envpatch", "web-1"]).is_err());
    }

    #[test]
    fn test_malformed_assignment_is_usage_error() {
        let cli = Cli::parse_from(["envpatch", "web-1", "NOVALUE"]);
        let err = cli.batch_target().unwrap_err();
        let envpatch_error = err.downcast_ref::<EnvPatchError>().unwrap();
        assert!(envpatch_error.is_usage_error());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "envpatch",
            "--runtime",
            "podman",
            "--host",
            "unix:///run/podman/podman.sock",
            "--stop-timeout",
            "30",
            "--fail-fast",
            "--output",
            "json",
            "web",
            "A=1",
        ]);
        let context = cli.context();
        assert_eq!(context.runtime, Some(RuntimeKind::Podman));
        assert_eq!(context.host.as_deref(), Some("unix:///run/podman/podman.sock"));
        assert_eq!(context.stop_timeout, Some(30));
        assert!(cli.fail_fast);
        assert_eq!(cli.output, OutputFormat::Json);
    }
}
