//! Domain layer: pure types and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod error;
pub mod install;
pub mod kubeconfig;

pub use config::{HoistConfig, HostKeyChecking, MergeStrategy};
pub use error::ProvisionError;
pub use install::InstallOptions;
