//! Event vocabulary shared by every backend

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of change observed on a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Nothing happened. Default for records that could not be decoded,
    /// never delivered to an observer.
    #[default]
    Nothing,
    /// Something was created
    Created,
    /// Something was deleted
    Deleted,
    /// Contents were modified
    Modified,
    /// Something else (metadata) was modified
    Other,
}

impl EventType {
    /// Whether this kind may be delivered to an observer
    pub fn is_deliverable(self) -> bool {
        self != EventType::Nothing
    }

    /// Upper-case name, as printed by the CLI
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Nothing => "NOTHING",
            EventType::Created => "CREATED",
            EventType::Deleted => "DELETED",
            EventType::Modified => "MODIFIED",
            EventType::Other => "OTHER",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change produced by a backend
///
/// `path` is always canonical when it leaves a backend; the normalizer
/// rewrites it to the caller's spelling before the observer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Path that changed
    pub path: PathBuf,
    /// Type of change
    pub kind: EventType,
}

impl Event {
    pub fn new(path: impl Into<PathBuf>, kind: EventType) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}
