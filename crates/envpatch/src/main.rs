use clap::Parser;
use envpatch_core::errors::EnvPatchError;

mod cli;
mod commands;
mod runtime_utils;
mod ui;

#[tokio::main]
async fn main() {
    let parsed = cli::Cli::parse();

    if let Err(err) = parsed.dispatch().await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

/// Usage errors exit with 2 like clap's own; every other failure with 1
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EnvPatchError>() {
        Some(envpatch_error) if envpatch_error.is_usage_error() => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envpatch_core::errors::{AssertionError, RuntimeError};

    #[test]
    fn test_exit_codes() {
        let usage = anyhow::Error::from(EnvPatchError::from(AssertionError::EmptyName));
        assert_eq!(exit_code(&usage), 2);

        let not_found = anyhow::Error::from(EnvPatchError::NoMatchingContainers {
            filter: "web".to_string(),
        });
        assert_eq!(exit_code(&not_found), 1);

        let runtime = anyhow::Error::from(EnvPatchError::from(RuntimeError::Connectivity {
            message: "refused".to_string(),
        }));
        assert_eq!(exit_code(&runtime), 1);

        assert_eq!(exit_code(&anyhow::anyhow!("terminal gone")), 1);
    }
}
