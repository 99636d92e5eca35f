//! Wire shapes for status records and watch events.
//!
//! A [`StatusRecord`] serialises as
//! `{"objectInfo": {"kind": .., "resourceVersion": ..}, "state": .., "payload": ..}`
//! and a [`WatchEvent`] as `{"payload": .., "eventType": "added"|"modified"|"deleted"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub kind: String,
    pub resource_version: u64,
}

/// Immutable snapshot of a plugin's state. Updates replace it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub object_info: ObjectInfo,
    pub state: String,
    #[serde(default)]
    pub payload: Value,
}

impl StatusRecord {
    pub fn new(kind: &str, resource_version: u64, state: &str, payload: Value) -> Self {
        Self {
            object_info: ObjectInfo {
                kind: kind.to_string(),
                resource_version,
            },
            state: state.to_string(),
            payload,
        }
    }

    pub fn kind(&self) -> &str {
        &self.object_info.kind
    }

    pub fn resource_version(&self) -> u64 {
        self.object_info.resource_version
    }

    /// The failure reason carried by a `failed` record, if any.
    pub fn reason(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent<T> {
    pub payload: T,
    pub event_type: EventType,
}

impl<T> WatchEvent<T> {
    pub fn modified(payload: T) -> Self {
        Self {
            payload,
            event_type: EventType::Modified,
        }
    }
}

impl<T: Serialize> WatchEvent<T> {
    /// One newline-terminated JSON line of the watch stream.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
