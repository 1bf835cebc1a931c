// CANopen client plumbing for Roboservo drives
//
// Provides:
// - CAN frame and node-id addressing (SDO COB-IDs)
// - Object dictionary entries used by the drive sequencer
// - Expedited SDO upload/download client with bounded per-frame retries

pub mod frame;
pub mod od;
pub mod retry;
pub mod sdo;

pub use frame::{CanFrame, InvalidNodeId, NodeId};
pub use od::{Object, ObjectIndex};
pub use retry::RetryPolicy;
pub use sdo::{AbortCode, SdoClient, SdoError, SdoRequest, SdoResponse};
