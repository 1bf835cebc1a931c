// CiA 402 drive control for Roboservo actuators
//
// Provides:
// - Control word, operation mode and drive state types
// - Enable/disable, start/stop and target update sequences
// - Node discovery over a bounded id range
// - One-shot maintenance operations (node id, store/restore, reboot)

pub mod control;
mod discovery;
mod error;
mod maintenance;
mod sequencer;

pub use control::{
    ControlWord, DriveState, OperationMode, ProfileParams, counts_to_degrees, degrees_to_counts,
};
pub use error::DriveError;
