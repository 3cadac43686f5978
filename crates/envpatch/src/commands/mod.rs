//! Command implementations
//!
//! `apply` is the batch path, `interactive` drives the terminal session.

pub mod apply;
pub mod interactive;
