//! CLI command implementations

pub mod selftest;
pub mod watch;
