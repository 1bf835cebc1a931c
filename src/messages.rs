// Message types exchanged with the UI over zenoh

use serde::{Deserialize, Serialize};

use crate::canopen::NodeId;
use crate::drive::{OperationMode, ProfileParams};

/// Command from the UI -> runtime, one per caller-facing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriveCommand {
    Connect { bitrate_kbps: u32 },
    Disconnect,
    ScanNodes,
    EnableMode { node: NodeId, mode: OperationMode },
    DisableMode { node: NodeId },
    SetTarget { node: NodeId, mode: OperationMode, value: f64 },
    StartMotion { node: NodeId, profile: ProfileParams },
    StopMotion { node: NodeId },
    PollActualPosition { node: NodeId },
    SetNodeId { old: NodeId, new: NodeId },
    SaveParameters { node: NodeId },
    RestoreParameters { node: NodeId },
    Reboot { node: NodeId },
}

impl DriveCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DriveCommand::Connect { .. } => "connect",
            DriveCommand::Disconnect => "disconnect",
            DriveCommand::ScanNodes => "scan_nodes",
            DriveCommand::EnableMode { .. } => "enable_mode",
            DriveCommand::DisableMode { .. } => "disable_mode",
            DriveCommand::SetTarget { .. } => "set_target",
            DriveCommand::StartMotion { .. } => "start_motion",
            DriveCommand::StopMotion { .. } => "stop_motion",
            DriveCommand::PollActualPosition { .. } => "poll_actual_position",
            DriveCommand::SetNodeId { .. } => "set_node_id",
            DriveCommand::SaveParameters { .. } => "save_parameters",
            DriveCommand::RestoreParameters { .. } => "restore_parameters",
            DriveCommand::Reboot { .. } => "reboot",
        }
    }
}

/// What a successful command produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutcome {
    Done,
    Nodes { nodes: Vec<NodeId> },
    Position { degrees: Option<f64> },
}

/// Reply published by the runtime for every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub op: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CommandOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failing step of an aborted multi-step sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
}

/// Telemetry published from poll ticks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    Position { node: NodeId, degrees: f64 },
}
