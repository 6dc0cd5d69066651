//! BCL (Basic Command Language) interpreter core.
//!
//! The language itself lives in [`script`]; [`config`], [`cli`] and
//! [`logging`] support the `bcl` command-line runner.

pub mod cli;
pub mod config;
pub mod logging;
pub mod script;
