//! Command line interface

pub mod args;
pub mod commands;

pub use args::{Cli, Command};
pub use commands::{run, run_command};
