//! Watch scenarios grouped by engine

pub mod lifecycle;
#[cfg(target_os = "linux")]
pub mod native;
pub mod polling;
