//! CLI command implementations.

pub mod budget;
pub mod init;
pub mod report;
pub mod status;
