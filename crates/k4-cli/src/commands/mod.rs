//! CLI command implementations

mod env;
mod run;

pub use env::env_command;
pub use run::run_command;
