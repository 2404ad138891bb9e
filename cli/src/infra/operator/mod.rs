//! Command operators: the local and SSH implementations of `CommandOperator`.

pub mod local;
pub mod ssh;

pub use local::LocalOperator;
pub use ssh::{HostKeyPolicy, SshOperator};
