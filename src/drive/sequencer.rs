// Enable/disable, motion start/stop and target updates
//
// Every chain is a list of SDO writes issued in order. A step's confirmation
// gates the next one, and drive state only advances after a confirmed step.

use tracing::{debug, info, warn};

use super::control::{
    ControlWord, DriveState, OperationMode, ProfileParams, counts_to_degrees, degrees_to_counts,
    to_tenths,
};
use super::error::DriveError;
use crate::canopen::{NodeId, Object};
use crate::config::Bounds;
use crate::session::{NodeDrive, Session};
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Bring `node` into `mode` and enable it.
    ///
    /// The drive only accepts a new mode from Shutdown, so the sequence is
    /// Shutdown, mode write, Shutdown, Switch On + Enable.
    pub fn enable_mode(&mut self, node: NodeId, mode: OperationMode) -> Result<(), DriveError> {
        const SEQUENCE: &str = "enable";
        info!("Enabling node {} in {:?} mode", node, mode);

        self.step(node, SEQUENCE, 1, Object::ControlWord, ControlWord::Shutdown.value())?;
        let drive = self.drive_mut(node);
        drive.state = DriveState::Disabled;
        drive.mode = None;

        self.step(node, SEQUENCE, 2, Object::OperationMode, mode.code() as u32)?;
        let drive = self.drive_mut(node);
        drive.state = DriveState::ModeSet;
        drive.mode = Some(mode);

        self.step(node, SEQUENCE, 3, Object::ControlWord, ControlWord::Shutdown.value())?;
        self.drive_mut(node).state = DriveState::Ready;

        self.step(node, SEQUENCE, 4, Object::ControlWord, ControlWord::SwitchOnEnable.value())?;
        self.drive_mut(node).state = DriveState::Enabled;

        if mode == OperationMode::Position {
            // Seed the displayed position before the first move
            self.poll_actual_position(node);
        }

        info!("Node {} enabled in {:?} mode", node, mode);
        Ok(())
    }

    /// Send Shutdown. The node is considered disabled even if it does not confirm.
    pub fn disable_mode(&mut self, node: NodeId) -> Result<(), DriveError> {
        info!("Disabling node {}", node);
        let result = self.write(node, Object::ControlWord, ControlWord::Shutdown.value());
        self.drives.insert(node, NodeDrive::default());

        if let Err(e) = &result {
            warn!("Node {} did not confirm shutdown: {}", node, e);
        }
        result
    }

    /// Send a new target for `mode`, clamped to the configured limits.
    ///
    /// Torque is given in percent, velocity in rpm, position in degrees.
    pub fn set_target(
        &mut self,
        node: NodeId,
        mode: OperationMode,
        value: f64,
    ) -> Result<(), DriveError> {
        if !value.is_finite() {
            return Err(DriveError::InvalidTarget(value));
        }
        let limits = self.config.limits;

        match mode {
            OperationMode::Torque => {
                let tenths = clamp_tenths(limits.torque, value, "torque");
                self.write(node, Object::TargetTorque, tenths as u32)
            }
            OperationMode::Velocity => {
                let tenths = clamp_tenths(limits.velocity, value, "velocity");
                self.write(node, Object::TargetVelocity, tenths as u32)
            }
            OperationMode::Position => {
                let min = limits.position.min as f64 / 10.0;
                let max = limits.position.max as f64 / 10.0;
                let degrees = value.clamp(min, max);
                if degrees != value {
                    debug!("Position target {} clamped to {}", value, degrees);
                }

                let counts = degrees_to_counts(degrees);
                self.write(node, Object::TargetPosition, counts as u32)?;

                if self.drive(node).state == DriveState::Moving {
                    // Toggle the set-point bit so the drive seeks the new target mid-move
                    let switch_on = ControlWord::SwitchOnEnable.value();
                    let start = ControlWord::EnableStart.value();
                    self.step(node, "re-seek", 1, Object::ControlWord, switch_on)?;
                    self.step(node, "re-seek", 2, Object::ControlWord, start)?;
                }
                Ok(())
            }
        }
    }

    /// Load the motion profile and start moving (velocity and position modes)
    pub fn start_motion(
        &mut self,
        node: NodeId,
        profile: &ProfileParams,
    ) -> Result<(), DriveError> {
        const SEQUENCE: &str = "start motion";

        let drive = self.drive(node);
        let mode = match drive.mode {
            Some(mode)
                if mode.has_motion_profile()
                    && matches!(
                        drive.state,
                        DriveState::Enabled | DriveState::Halted | DriveState::Moving
                    ) =>
            {
                mode
            }
            _ => {
                return Err(DriveError::InvalidState {
                    node,
                    action: "start motion",
                    state: drive.state,
                    mode: drive.mode,
                });
            }
        };

        if let Some(target) = profile.target {
            self.set_target(node, mode, target)?;
        }

        info!("Starting {:?} motion on node {}", mode, node);
        let velocity = profile_tenths(profile.velocity);
        let acceleration = profile_tenths(profile.acceleration);
        let deceleration = profile_tenths(profile.deceleration);
        self.step(node, SEQUENCE, 1, Object::ProfileVelocity, velocity)?;
        self.step(node, SEQUENCE, 2, Object::ProfileAcceleration, acceleration)?;
        self.step(node, SEQUENCE, 3, Object::ProfileDeceleration, deceleration)?;
        self.step(node, SEQUENCE, 4, Object::ControlWord, ControlWord::EnableStart.value())?;
        self.drive_mut(node).state = DriveState::Moving;
        Ok(())
    }

    /// Halt the current motion, keeping the drive enabled
    pub fn stop_motion(&mut self, node: NodeId) -> Result<(), DriveError> {
        info!("Stopping motion on node {}", node);
        self.write(node, Object::ControlWord, ControlWord::EnableHalt.value())?;

        let drive = self.drive_mut(node);
        if matches!(drive.state, DriveState::Enabled | DriveState::Moving) {
            drive.state = DriveState::Halted;
        }
        Ok(())
    }

    /// Read the actual position in degrees.
    ///
    /// Failures are not errors: the next poll simply tries again.
    pub fn poll_actual_position(&mut self, node: NodeId) -> Option<f64> {
        match self.read(node, Object::ActualPosition) {
            Ok(raw) => {
                let degrees = counts_to_degrees(raw as i32);
                self.drive_mut(node).actual_position = Some(degrees);
                Some(degrees)
            }
            Err(e) => {
                debug!("Position poll of node {} failed: {}", node, e);
                None
            }
        }
    }

    fn step(
        &mut self,
        node: NodeId,
        sequence: &'static str,
        step: usize,
        object: Object,
        value: u32,
    ) -> Result<(), DriveError> {
        self.write(node, object, value).map_err(|e| match e {
            DriveError::Sdo(source) => {
                warn!("{} sequence on node {} failed at step {}", sequence, node, step);
                DriveError::SequenceAborted {
                    node,
                    sequence,
                    step,
                    object,
                    source,
                }
            }
            other => other,
        })
    }
}

fn clamp_tenths(bounds: Bounds, value: f64, what: &str) -> i32 {
    let tenths = to_tenths(value);
    let clamped = bounds.clamp(tenths);
    if clamped != tenths {
        debug!("{} target {} clamped to {} tenths", what, value, clamped);
    }
    clamped
}

fn profile_tenths(value: f64) -> u32 {
    to_tenths(value).max(0) as u32
}
