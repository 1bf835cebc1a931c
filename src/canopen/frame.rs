// CAN frames and CANopen node addressing
//
// Only 11-bit standard identifiers are used: SDO requests go out on
// 0x600 + node id, responses come back on 0x580 + node id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// COB-ID base for SDO requests (client -> server)
pub const SDO_REQUEST_BASE: u16 = 0x600;
/// COB-ID base for SDO responses (server -> client)
pub const SDO_RESPONSE_BASE: u16 = 0x580;

/// Largest standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// Node id on the CANopen bus, always within 1..=127
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Node id {0} is outside the CANopen range 1..=127")]
pub struct InvalidNodeId(pub u8);

impl NodeId {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 127;

    pub fn new(id: u8) -> Result<Self, InvalidNodeId> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidNodeId(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Identifier the client transmits SDO requests on
    pub fn request_cob_id(self) -> u16 {
        SDO_REQUEST_BASE + self.0 as u16
    }

    /// Identifier the node answers on
    pub fn response_cob_id(self) -> u16 {
        SDO_RESPONSE_BASE + self.0 as u16
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeId;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<NodeId> for u8 {
    fn from(node: NodeId) -> Self {
        node.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classic CAN data frame with a standard identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u16,
    len: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Build a frame; returns `None` for extended ids or more than 8 data bytes
    pub fn new(id: u16, data: &[u8]) -> Option<Self> {
        if id > MAX_STANDARD_ID || data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            len: data.len() as u8,
            data: buf,
        })
    }

    /// Full 8-byte frame; the id is truncated to 11 bits
    pub fn with_payload(id: u16, data: [u8; 8]) -> Self {
        Self {
            id: id & MAX_STANDARD_ID,
            len: 8,
            data,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Payload zero-padded to the full 8 bytes
    pub fn padded(&self) -> [u8; 8] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_err());
        assert!(NodeId::new(1).is_ok());
        assert!(NodeId::new(127).is_ok());
        assert_eq!(NodeId::new(128), Err(InvalidNodeId(128)));
    }

    #[test]
    fn test_cob_ids_for_every_node() {
        for id in NodeId::MIN..=NodeId::MAX {
            let node = NodeId::new(id).unwrap();
            assert_eq!(node.request_cob_id(), 0x600 + id as u16);
            assert_eq!(node.response_cob_id(), 0x580 + id as u16);
            assert!(node.request_cob_id() <= MAX_STANDARD_ID);
        }
    }

    #[test]
    fn test_frame_limits() {
        assert!(CanFrame::new(0x800, &[]).is_none());
        assert!(CanFrame::new(0x600, &[0; 9]).is_none());

        let frame = CanFrame::new(0x605, &[0x40, 0x41, 0x60]).unwrap();
        assert_eq!(frame.data(), &[0x40, 0x41, 0x60]);
        assert_eq!(frame.padded(), [0x40, 0x41, 0x60, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_node_id_serde() {
        let node: NodeId = serde_json::from_str("5").unwrap();
        assert_eq!(node.get(), 5);
        assert!(serde_json::from_str::<NodeId>("0").is_err());
        assert_eq!(serde_json::to_string(&node).unwrap(), "5");
    }
}
