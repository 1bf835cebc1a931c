// One-shot maintenance writes outside the mode state machine

use std::thread;

use tracing::{info, warn};

use super::control::ControlWord;
use super::error::DriveError;
use crate::canopen::od::{LOAD_SIGNATURE, SAVE_SIGNATURE};
use crate::canopen::{NodeId, Object};
use crate::session::{NodeDrive, Session};
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Assign a new node id. Takes effect on the drive after save + reboot.
    pub fn set_node_id(&mut self, old: NodeId, new: NodeId) -> Result<(), DriveError> {
        info!("Changing node id {} -> {}", old, new);
        self.write(old, Object::NodeId, new.get() as u32)?;

        if let Some(drive) = self.drives.remove(&old) {
            self.drives.insert(new, drive);
        }
        Ok(())
    }

    /// Persist the current parameters to non-volatile memory
    pub fn save_parameters(&mut self, node: NodeId) -> Result<(), DriveError> {
        info!("Saving parameters on node {}", node);
        self.write(node, Object::StoreParameters, SAVE_SIGNATURE)
    }

    /// Restore factory default parameters
    pub fn restore_parameters(&mut self, node: NodeId) -> Result<(), DriveError> {
        info!("Restoring default parameters on node {}", node);
        self.write(node, Object::RestoreParameters, LOAD_SIGNATURE)
    }

    /// Shut the drive down and reboot it.
    ///
    /// Blocks for both settle delays; nothing else reaches the bus meanwhile.
    pub fn reboot(&mut self, node: NodeId) -> Result<(), DriveError> {
        info!("Rebooting node {}", node);
        self.write(node, Object::ControlWord, ControlWord::Shutdown.value())?;
        self.drives.insert(node, NodeDrive::default());
        thread::sleep(self.config.shutdown_settle());

        // A rebooting drive may go silent before it confirms
        if let Err(e) = self.write(node, Object::ControlWord, ControlWord::Reboot.value()) {
            warn!("Node {} did not confirm reboot command: {}", node, e);
        }
        thread::sleep(self.config.reboot_settle());

        info!("Node {} reboot complete", node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{DriveState, OperationMode};
    use crate::session::testing::{node, session};
    use std::time::{Duration, Instant};

    #[test]
    fn test_save_parameters_single_download() {
        let (mut session, bus) = session();
        session.save_parameters(node(5)).unwrap();

        let bus = bus.lock().unwrap();
        assert_eq!(bus.written.len(), 1);
        assert_eq!(
            bus.downloads(),
            vec![(5, Object::StoreParameters.index(), 0x6576_6173)]
        );
        assert_eq!(Object::StoreParameters.index().subindex, 0x01);
    }

    #[test]
    fn test_restore_parameters() {
        let (mut session, bus) = session();
        session.restore_parameters(node(2)).unwrap();
        assert_eq!(
            bus.lock().unwrap().downloads(),
            vec![(2, Object::RestoreParameters.index(), 0x6461_6F6C)]
        );
    }

    #[test]
    fn test_set_node_id_moves_state() {
        let (mut session, bus) = session();
        session.enable_mode(node(1), OperationMode::Torque).unwrap();
        bus.lock().unwrap().written.clear();

        session.set_node_id(node(1), node(8)).unwrap();
        assert_eq!(
            bus.lock().unwrap().downloads(),
            vec![(1, Object::NodeId.index(), 8)]
        );
        assert_eq!(session.drive(node(8)).state, DriveState::Enabled);
        assert_eq!(session.drive(node(1)).state, DriveState::Disabled);
    }

    #[test]
    fn test_set_node_id_failure_keeps_state() {
        let (mut session, bus) = session();
        session.enable_mode(node(1), OperationMode::Torque).unwrap();
        bus.lock().unwrap().absent.insert(1);

        assert!(session.set_node_id(node(1), node(8)).is_err());
        assert_eq!(session.drive(node(1)).state, DriveState::Enabled);
    }

    #[test]
    fn test_reboot_sequence() {
        let (mut session, bus) = session();
        session.enable_mode(node(3), OperationMode::Velocity).unwrap();
        bus.lock().unwrap().written.clear();

        session.reboot(node(3)).unwrap();
        let cw = Object::ControlWord.index();
        assert_eq!(
            bus.lock().unwrap().downloads(),
            vec![(3, cw, 0x0006), (3, cw, 0x0806)]
        );
        assert_eq!(session.drive(node(3)).state, DriveState::Disabled);
    }

    #[test]
    fn test_reboot_waits_for_settle_delays() {
        let (mut session, _bus) = session();
        session.config.shutdown_settle_ms = 20;
        session.config.reboot_settle_ms = 60;

        let start = Instant::now();
        session.reboot(node(3)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_reboot_stops_if_shutdown_fails() {
        let (mut session, bus) = session();
        bus.lock().unwrap().absent.insert(3);

        assert!(session.reboot(node(3)).is_err());
        assert_eq!(bus.lock().unwrap().downloads().len(), 1);
    }
}
