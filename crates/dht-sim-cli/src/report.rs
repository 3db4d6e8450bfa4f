//! The event-stream line reporter and the final network-state JSON writer.

use std::path::Path;

use dht_sim_core::{Event, EventParams, NetworkState, Observer};
use tracing::info;

/// Subscribes to the simulator's event stream and logs a one-line summary
/// of each event via `tracing`, in the style the teacher daemon's event bus
/// logs subscriber deliveries.
pub struct LineReporter;

impl Observer for LineReporter {
    fn on_event(&mut self, event: &Event) {
        match &event.params {
            EventParams::SimulationStart => info!(time = event.time, "SIMULATION_START"),
            EventParams::SimulationEnd => info!(time = event.time, "SIMULATION_END"),
            EventParams::SimulationTick { .. } => {}
            EventParams::NodeJoin { node_id, .. } => {
                info!(time = event.time, node = %node_id, "NODE_JOIN")
            }
            EventParams::NodeLeave { node_id } => {
                info!(time = event.time, node = %node_id, "NODE_LEAVE")
            }
            EventParams::FilePublish { node_id, file_id } => {
                info!(time = event.time, node = %node_id, file = %file_id, "FILE_PUBLISH")
            }
            EventParams::FileRetrieve { node_id, file_id } => {
                info!(time = event.time, node = %node_id, file = %file_id, "FILE_RETRIEVE")
            }
            EventParams::MessageSent { message } => {
                info!(time = event.time, from = %message.source_id, to = %message.target_id, kind = ?message.kind, "MESSAGE_SENT")
            }
            EventParams::MessageReceived { message } => {
                info!(time = event.time, from = %message.source_id, to = %message.target_id, kind = ?message.kind, "MESSAGE_RECEIVED")
            }
            EventParams::MessageDropped { message } => {
                info!(time = event.time, from = %message.source_id, to = %message.target_id, kind = ?message.kind, "MESSAGE_DROPPED")
            }
        }
    }
}

/// Errors writing the final report. Fatal: if the report can't be written
/// the run is not considered to have succeeded.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to create output directory: {0}")]
    CreateDir(std::io::Error),
    #[error("failed to write network state report: {0}")]
    Write(std::io::Error),
    #[error("failed to serialize network state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write `state` as `<out_dir>/network_state.json`, creating `out_dir` if
/// necessary.
pub fn write_network_state(state: &NetworkState, out_dir: &Path) -> Result<(), ReportError> {
    std::fs::create_dir_all(out_dir).map_err(ReportError::CreateDir)?;
    let path = out_dir.join("network_state.json");
    let json = serde_json::to_string_pretty(state)?;
    std::fs::write(path, json).map_err(ReportError::Write)
}
