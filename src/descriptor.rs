//! Typed view of an instance descriptor file.
//!
//! The raw JSON object is what subscribers receive; this module only extracts
//! the fields the watcher itself needs. Fields are optional so that a partial
//! descriptor still yields a usable (if less capable) instance.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::path_ref::RelativePathRef;

/// A JSON object as delivered to subscribers.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// One mod entry of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRecord {
    pub name: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
}

/// Fields parsed out of a descriptor payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Process id of the external process.
    #[serde(default)]
    pub pid: Option<i64>,
    /// Working directory of the external process.
    #[serde(default, rename = "game_dir")]
    pub working_dir: Option<String>,
    #[serde(default, rename = "game_version")]
    pub version: Option<String>,
    /// Location of the world log.
    #[serde(default)]
    pub world_log: Option<RelativePathRef>,
    #[serde(default)]
    pub is_server: Option<bool>,
    #[serde(default)]
    pub mods: Option<Vec<ModRecord>>,
}

impl InstanceInfo {
    /// Parses the typed fields out of a raw payload.
    ///
    /// # Errors
    ///
    /// Returns the serde error when a present field has the wrong shape.
    pub fn from_payload(payload: &JsonObject) -> Result<Self, serde_json::Error> {
        Self::deserialize(serde_json::Value::Object(payload.clone()))
    }

    /// Working directory as a path, if present and non-empty.
    #[must_use]
    pub fn working_dir_path(&self) -> Option<PathBuf> {
        self.working_dir
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Resolved world log path, if the descriptor announces one.
    #[must_use]
    pub fn world_log_path(&self) -> Option<PathBuf> {
        self.world_log
            .as_ref()?
            .resolve(self.working_dir_path().as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(raw: &str) -> JsonObject {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parses_full_descriptor() {
        let p = payload(
            r#"{
                "pid": 4242,
                "game_dir": "/games/mc",
                "game_version": "1.16.1",
                "world_log": {"relative": true, "path": "hermes/world.log"},
                "is_server": false,
                "mods": [{"name": "SpeedRunIGT", "id": "speedrunigt", "version": "14.0"}],
                "extra": "kept in the raw payload only"
            }"#,
        );
        let info = InstanceInfo::from_payload(&p).unwrap();
        assert_eq!(info.pid, Some(4242));
        assert_eq!(info.version.as_deref(), Some("1.16.1"));
        assert_eq!(info.is_server, Some(false));
        assert_eq!(info.mods.as_ref().map(Vec::len), Some(1));
        assert_eq!(info.world_log_path(), Some(PathBuf::from("/games/mc/hermes/world.log")));
    }

    #[test]
    fn missing_fields_are_none() {
        let info = InstanceInfo::from_payload(&payload(r#"{"game_version": "1.21"}"#)).unwrap();
        assert_eq!(info.pid, None);
        assert_eq!(info.working_dir_path(), None);
        assert_eq!(info.world_log_path(), None);
    }

    #[test]
    fn wrong_field_types_are_errors() {
        assert!(InstanceInfo::from_payload(&payload(r#"{"pid": "not a number"}"#)).is_err());
    }
}
