//! Parses a scenario file (JSON array of timed lifecycle events) into
//! schedulable [`Event`]s. The only place hex-string decoding of external
//! input happens — nothing elsewhere in this crate parses hex.

use std::path::Path;

use serde::Deserialize;

use crate::event::{Event, EventParams};
use crate::ids::NodeId;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioEventType {
    NodeJoin,
    NodeLeave,
    FilePublish,
    FileRetrieve,
}

/// Raw hex-string params as they appear in the scenario file. `address`
/// doubles as the bootstrap seed node id for `NODE_JOIN` entries — the only
/// slot the scenario schema provides for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioParams {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(default, rename = "address")]
    pub seed_node_id: Option<String>,
    #[serde(default, rename = "fileID")]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioEntry {
    pub time: u64,
    pub event: ScenarioEventType,
    pub params: ScenarioParams,
}

pub type Scenario = Vec<ScenarioEntry>;

/// Fatal at startup — a malformed scenario file can't be partially honored.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid hex in scenario entry: {0}")]
    InvalidHex(#[from] crate::error::SimError),
    #[error("{event} entry missing required '{field}' param")]
    MissingParam { event: &'static str, field: &'static str },
}

pub fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl ScenarioEntry {
    pub fn into_event(self) -> Result<Event, ScenarioError> {
        let node_id = NodeId::from_hex(&self.params.node_id)?;

        let params = match self.event {
            ScenarioEventType::NodeJoin => {
                let seed_node_id = self
                    .params
                    .seed_node_id
                    .as_deref()
                    .map(NodeId::from_hex)
                    .transpose()?;
                EventParams::NodeJoin { node_id, seed_node_id }
            }
            ScenarioEventType::NodeLeave => EventParams::NodeLeave { node_id },
            ScenarioEventType::FilePublish => {
                let file_id_hex = self.params.file_id.ok_or(ScenarioError::MissingParam {
                    event: "FILE_PUBLISH",
                    field: "fileID",
                })?;
                let file_id = NodeId::from_hex(&file_id_hex)?;
                EventParams::FilePublish { node_id, file_id }
            }
            ScenarioEventType::FileRetrieve => {
                let file_id_hex = self.params.file_id.ok_or(ScenarioError::MissingParam {
                    event: "FILE_RETRIEVE",
                    field: "fileID",
                })?;
                let file_id = NodeId::from_hex(&file_id_hex)?;
                EventParams::FileRetrieve { node_id, file_id }
            }
        };

        Ok(Event::new(self.time, params))
    }
}

/// Parse every entry in a scenario into events, in file order.
pub fn into_events(scenario: Scenario) -> Result<Vec<Event>, ScenarioError> {
    scenario.into_iter().map(ScenarioEntry::into_event).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_four_event_kinds() {
        let json = r#"[
            {"time": 0, "event": "NODE_JOIN", "params": {"nodeID": "11"}},
            {"time": 5, "event": "NODE_JOIN", "params": {"nodeID": "22", "address": "11"}},
            {"time": 10, "event": "FILE_PUBLISH", "params": {"nodeID": "22", "fileID": "33"}},
            {"time": 20, "event": "FILE_RETRIEVE", "params": {"nodeID": "11", "fileID": "33"}},
            {"time": 30, "event": "NODE_LEAVE", "params": {"nodeID": "22"}}
        ]"#;
        let scenario: Scenario = serde_json::from_str(json).expect("parse scenario json");
        let events = into_events(scenario).expect("convert scenario entries");
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0].params, EventParams::NodeJoin { seed_node_id: None, .. }));
        assert!(matches!(events[1].params, EventParams::NodeJoin { seed_node_id: Some(_), .. }));
    }

    #[test]
    fn file_publish_without_file_id_is_an_error() {
        let json = r#"[{"time": 0, "event": "FILE_PUBLISH", "params": {"nodeID": "11"}}]"#;
        let scenario: Scenario = serde_json::from_str(json).expect("parse scenario json");
        let err = into_events(scenario).expect_err("missing fileID must error");
        assert!(matches!(err, ScenarioError::MissingParam { .. }));
    }
}
