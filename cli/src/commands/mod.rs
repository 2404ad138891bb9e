//! Command handlers, one module per subcommand.

pub mod config;
pub mod install;
pub mod version;
