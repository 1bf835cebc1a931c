// Raw CAN frame I/O
//
// The SDO client only needs five primitives from a bus adapter. A serial
// line CAN (SLCAN) adapter is provided; tests use a scripted in-memory bus.

use std::fmt;
use std::time::Duration;

use crate::canopen::CanFrame;

#[cfg(test)]
pub mod mock;
pub mod slcan;

pub use slcan::SlcanTransport;

/// Nominal CAN bitrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitrate {
    Kbps1000,
    Kbps800,
    Kbps500,
    Kbps250,
    Kbps125,
    Kbps100,
    Kbps95,
    Kbps83,
    Kbps50,
    Kbps47,
    Kbps33,
    Kbps20,
    Kbps10,
    Kbps5,
}

impl Bitrate {
    pub const ALL: [Bitrate; 14] = [
        Bitrate::Kbps1000,
        Bitrate::Kbps800,
        Bitrate::Kbps500,
        Bitrate::Kbps250,
        Bitrate::Kbps125,
        Bitrate::Kbps100,
        Bitrate::Kbps95,
        Bitrate::Kbps83,
        Bitrate::Kbps50,
        Bitrate::Kbps47,
        Bitrate::Kbps33,
        Bitrate::Kbps20,
        Bitrate::Kbps10,
        Bitrate::Kbps5,
    ];

    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::Kbps1000 => 1000,
            Bitrate::Kbps800 => 800,
            Bitrate::Kbps500 => 500,
            Bitrate::Kbps250 => 250,
            Bitrate::Kbps125 => 125,
            Bitrate::Kbps100 => 100,
            Bitrate::Kbps95 => 95,
            Bitrate::Kbps83 => 83,
            Bitrate::Kbps50 => 50,
            Bitrate::Kbps47 => 47,
            Bitrate::Kbps33 => 33,
            Bitrate::Kbps20 => 20,
            Bitrate::Kbps10 => 10,
            Bitrate::Kbps5 => 5,
        }
    }

    pub fn from_kbps(kbps: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.kbps() == kbps)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kbit/s", self.kbps())
    }
}

/// Error types for bus adapter communication
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CAN channel is not open")]
    NotOpen,

    #[error("Bitrate {0} is not supported by the adapter")]
    UnsupportedBitrate(Bitrate),

    #[error("Adapter rejected the request")]
    Rejected,

    #[error("Malformed frame from adapter: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A CAN channel. Implementations own exactly one channel.
pub trait Transport: Send {
    /// Open the channel at the given bitrate
    fn open(&mut self, bitrate: Bitrate) -> Result<()>;

    /// Close the channel; closing a closed channel is a no-op
    fn close(&mut self);

    /// Queue one frame for transmission
    fn write_frame(&mut self, frame: &CanFrame) -> Result<()>;

    /// Wait up to `timeout` for the next received frame
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<CanFrame>>;

    /// Discard everything waiting in the receive queue
    fn reset(&mut self);
}
