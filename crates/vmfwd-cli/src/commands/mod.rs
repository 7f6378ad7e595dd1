//! CLI subcommand implementations.

pub mod port_forward;
