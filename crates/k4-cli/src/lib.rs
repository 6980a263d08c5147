//! k4wd: Run the Kubernetes port-forwards of a Forwardfile
//!
//! `run_command` starts every forward and publishes their local addresses to
//! the env file; `env_command` prints that env file for another shell.

pub mod commands;
pub mod output;
