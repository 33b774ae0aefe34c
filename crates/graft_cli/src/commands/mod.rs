//! CLI commands.

pub mod delta;
pub mod fsck;
pub mod init;
