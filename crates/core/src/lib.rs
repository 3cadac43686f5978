//! Core library for envpatch
//!
//! envpatch changes an environment variable of an existing container by
//! recreating it in place under the same name. This crate holds the runtime
//! integration, the recreate pipeline, the interactive session state machine,
//! logging, and error handling. The `envpatch` binary crate wires them to a
//! terminal.

pub mod directory;
pub mod docker;
pub mod env;
pub mod errors;
pub mod logging;
pub mod mutation;
pub mod runtime;
pub mod session;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
