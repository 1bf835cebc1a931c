use crate::canopen::{InvalidNodeId, NodeId, Object, SdoError};
use crate::transport::TransportError;

use super::control::{DriveState, OperationMode};

/// Error types for drive operations
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("{sequence} sequence on node {node} aborted at step {step} ({object:?}): {source}")]
    SequenceAborted {
        node: NodeId,
        sequence: &'static str,
        /// 1-based index of the step that failed
        step: usize,
        object: Object,
        #[source]
        source: SdoError,
    },

    #[error(transparent)]
    Sdo(#[from] SdoError),

    #[error("Failed to open CAN channel: {0}")]
    Transport(#[from] TransportError),

    #[error("Not connected to the CAN bus")]
    NotConnected,

    #[error(transparent)]
    InvalidNodeId(#[from] InvalidNodeId),

    #[error("Unsupported bitrate: {0} kbit/s")]
    InvalidBitrate(u32),

    #[error("Target value {0} is not a finite number")]
    InvalidTarget(f64),

    #[error("Node {node} cannot {action} while {state:?} (mode {mode:?})")]
    InvalidState {
        node: NodeId,
        action: &'static str,
        state: DriveState,
        mode: Option<OperationMode>,
    },
}

impl DriveError {
    /// Step at which a multi-step sequence stopped
    pub fn failed_step(&self) -> Option<usize> {
        match self {
            DriveError::SequenceAborted { step, .. } => Some(*step),
            _ => None,
        }
    }
}
