// Object dictionary entries of the Roboservo drive
//
// Every entry lives at sub-index 0 except the store/restore signatures,
// which use sub-index 1 ("all parameters").

use std::fmt;

/// Object dictionary address (index + sub-index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIndex {
    pub index: u16,
    pub subindex: u8,
}

impl ObjectIndex {
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }
}

impl fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}/{:02X}", self.index, self.subindex)
    }
}

/// Objects the sequencer reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Object {
    StoreParameters,
    RestoreParameters,
    NodeId,
    ControlWord,
    StatusWord,
    OperationMode,
    ActualPosition,
    TargetTorque,
    TargetPosition,
    ProfileVelocity,
    ProfileAcceleration,
    ProfileDeceleration,
    TargetVelocity,
}

impl Object {
    pub const fn index(self) -> ObjectIndex {
        match self {
            Object::StoreParameters => ObjectIndex::new(0x1010, 0x01),
            Object::RestoreParameters => ObjectIndex::new(0x1011, 0x01),
            Object::NodeId => ObjectIndex::new(0x2000, 0x00),
            Object::ControlWord => ObjectIndex::new(0x6040, 0x00),
            Object::StatusWord => ObjectIndex::new(0x6041, 0x00),
            Object::OperationMode => ObjectIndex::new(0x6060, 0x00),
            Object::ActualPosition => ObjectIndex::new(0x6064, 0x00),
            Object::TargetTorque => ObjectIndex::new(0x6071, 0x00),
            Object::TargetPosition => ObjectIndex::new(0x607A, 0x00),
            Object::ProfileVelocity => ObjectIndex::new(0x6081, 0x00),
            Object::ProfileAcceleration => ObjectIndex::new(0x6083, 0x00),
            Object::ProfileDeceleration => ObjectIndex::new(0x6084, 0x00),
            Object::TargetVelocity => ObjectIndex::new(0x60FF, 0x00),
        }
    }
}

impl From<Object> for ObjectIndex {
    fn from(object: Object) -> Self {
        object.index()
    }
}

/// ASCII "save", little-endian, written to StoreParameters
pub const SAVE_SIGNATURE: u32 = 0x6576_6173;
/// ASCII "load", little-endian, written to RestoreParameters
pub const LOAD_SIGNATURE: u32 = 0x6461_6F6C;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures_spell_ascii() {
        assert_eq!(&SAVE_SIGNATURE.to_le_bytes(), b"save");
        assert_eq!(&LOAD_SIGNATURE.to_le_bytes(), b"load");
    }

    #[test]
    fn test_display() {
        assert_eq!(Object::StoreParameters.index().to_string(), "0x1010/01");
        assert_eq!(Object::TargetVelocity.index().to_string(), "0x60FF/00");
    }
}
