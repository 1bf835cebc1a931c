// Drive-side vocabulary: control words, operation modes, units

use serde::{Deserialize, Serialize};

/// Encoder counts per output shaft revolution
pub const COUNTS_PER_REVOLUTION: u32 = 0x40000;

/// Control word commands (object 0x6040)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    Shutdown = 0x0006,
    SwitchOnEnable = 0x000F,
    EnableHalt = 0x010F,
    EnableStart = 0x003F,
    Reboot = 0x0806,
}

impl ControlWord {
    pub fn value(self) -> u32 {
        self as u16 as u32
    }
}

/// Modes of operation (object 0x6060)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Cyclic synchronous torque
    Torque = 0x0A,
    /// Profile velocity
    Velocity = 0x03,
    /// Profile position
    Position = 0x01,
}

impl OperationMode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Velocity and position moves are started explicitly with a motion profile
    pub fn has_motion_profile(self) -> bool {
        matches!(self, OperationMode::Velocity | OperationMode::Position)
    }
}

/// Per-node state as last confirmed by the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    #[default]
    Disabled,
    ModeSet,
    Ready,
    Enabled,
    Moving,
    Halted,
}

/// Motion profile: speed in rpm, ramps in rpm/s, target in the mode's unit.
/// Profile values go to the drive in tenths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileParams {
    pub velocity: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    /// Applied as a target update before motion starts
    #[serde(default)]
    pub target: Option<f64>,
}

/// Display value to tenths, rounded to nearest
pub fn to_tenths(value: f64) -> i32 {
    (value * 10.0).round() as i32
}

pub fn degrees_to_counts(degrees: f64) -> i32 {
    (degrees / 360.0 * COUNTS_PER_REVOLUTION as f64).round() as i32
}

pub fn counts_to_degrees(counts: i32) -> f64 {
    counts as f64 / COUNTS_PER_REVOLUTION as f64 * 360.0
}
