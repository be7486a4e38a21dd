//! fswatch core - shared vocabulary for the fswatch backends
//!
//! This crate provides:
//! - The closed event vocabulary (`EventType`, `Event`)
//! - The error taxonomy shared by every backend
//! - Watcher configuration (latency, content hashing)
//! - BLAKE3 content hashing used by the polling backend

pub mod config;
pub mod error;
pub mod event;
pub mod hash;

// Re-export main types for convenience
pub use config::{Config, HashAlgorithm, DEFAULT_LATENCY};
pub use error::{Result, WatchError};
pub use event::{Event, EventType};
pub use hash::ContentHash;
