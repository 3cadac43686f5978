//! Environment snapshots and `NAME=VALUE` assertions
//!
//! A container's environment is an ordered list of raw entries, usually
//! `NAME=VALUE` but occasionally a bare `NAME`. Entries are split on the first
//! `=` only, so values may themselves contain `=`.

use crate::docker::Docker;
use crate::errors::{AssertionError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

/// One environment entry split into name and value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    /// Split a raw entry; a bare `NAME` yields an empty value
    pub fn from_entry(raw: &str) -> Self {
        let (name, value) = split_entry(raw);
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Split a raw entry on its first `=`
pub fn split_entry(raw: &str) -> (&str, &str) {
    raw.split_once('=').unwrap_or((raw, ""))
}

/// A requested `NAME=VALUE` binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentAssertion {
    name: String,
    value: String,
}

impl EnvironmentAssertion {
    /// Build an assertion from separate name and value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self, AssertionError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            value: value.into(),
        })
    }

    /// Parse `NAME=VALUE`; everything after the first `=` is the value
    pub fn parse(input: &str) -> Result<Self, AssertionError> {
        let (name, value) = input
            .split_once('=')
            .ok_or_else(|| AssertionError::MissingSeparator {
                input: input.to_string(),
            })?;
        Self::new(name, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Raw entry as stored in the container configuration
    pub fn to_entry(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

impl FromStr for EnvironmentAssertion {
    type Err = AssertionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EnvironmentAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Check a variable name typed by the operator
pub fn validate_name(name: &str) -> Result<(), AssertionError> {
    if name.is_empty() {
        return Err(AssertionError::EmptyName);
    }
    if name.contains('=') {
        return Err(AssertionError::NameContainsSeparator {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// What applying an assertion did to an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchOutcome {
    /// An existing entry at `index` got a new value
    Replaced { index: usize, previous: String },
    /// No entry had the name; the assertion was appended
    Appended { index: usize },
    /// The entry at `index` already carried the requested binding
    Unchanged { index: usize },
}

impl PatchOutcome {
    /// Whether the environment differs from before
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

/// Apply an assertion to an environment in place.
///
/// The first entry whose name matches is rewritten and later duplicates are
/// left alone. Without a match the assertion is appended. All other entries
/// keep their position and text.
pub fn patch_environment(env: &mut Vec<String>, assertion: &EnvironmentAssertion) -> PatchOutcome {
    let entry = assertion.to_entry();
    let position = env
        .iter()
        .position(|raw| split_entry(raw).0 == assertion.name());

    match position {
        Some(index) if env[index] == entry => PatchOutcome::Unchanged { index },
        Some(index) => {
            let previous = std::mem::replace(&mut env[index], entry);
            PatchOutcome::Replaced { index, previous }
        }
        None => {
            env.push(entry);
            PatchOutcome::Appended {
                index: env.len() - 1,
            }
        }
    }
}

/// Read a container's environment in declaration order
#[instrument(skip(docker))]
pub async fn read_environment<D>(docker: &D, container_id: &str) -> RuntimeResult<Vec<EnvVar>>
where
    D: Docker + ?Sized,
{
    let handle = docker.inspect_container(container_id).await?;
    debug!(
        "Read {} environment entries from {}",
        handle.env.len(),
        handle.name
    );
    Ok(handle.env.iter().map(|raw| EnvVar::from_entry(raw)).collect())
}
