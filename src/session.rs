// CAN session: one bus channel, the SDO client on it, and per-node drive state
//
// A Session is the only owner of the transport. Every operation takes
// `&mut self`, so at most one SDO transaction is ever outstanding.

use std::collections::HashMap;

use tracing::info;

use crate::canopen::{NodeId, Object, SdoClient};
use crate::config::SessionConfig;
use crate::drive::{DriveError, DriveState, OperationMode};
use crate::transport::{Bitrate, Transport};

/// Drive state of one node as confirmed during this session
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeDrive {
    pub state: DriveState,
    pub mode: Option<OperationMode>,
    /// Last successfully polled position in degrees
    pub actual_position: Option<f64>,
}

pub struct Session<T> {
    pub(crate) sdo: SdoClient<T>,
    pub(crate) config: SessionConfig,
    pub(crate) drives: HashMap<NodeId, NodeDrive>,
    bitrate: Option<Bitrate>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let sdo = SdoClient::new(transport)
            .with_retry(config.retry)
            .with_read_timeout(config.read_timeout())
            .with_strict_download_abort(config.strict_download_abort);

        Self {
            sdo,
            config,
            drives: HashMap::new(),
            bitrate: None,
        }
    }

    /// Open the CAN channel. Reconnecting closes the current channel first.
    pub fn connect(&mut self, bitrate: Bitrate) -> Result<(), DriveError> {
        if self.bitrate.is_some() {
            self.disconnect();
        }
        info!("Connecting to CAN bus at {}", bitrate);
        self.sdo.transport_mut().open(bitrate)?;
        self.bitrate = Some(bitrate);
        Ok(())
    }

    /// Close the channel and forget all per-node state
    pub fn disconnect(&mut self) {
        if self.bitrate.take().is_some() {
            info!("Disconnecting from CAN bus");
            self.sdo.transport_mut().close();
        }
        self.drives.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.bitrate.is_some()
    }

    pub fn bitrate(&self) -> Option<Bitrate> {
        self.bitrate
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.sdo.transport()
    }

    /// Confirmed state of `node`; unknown nodes are Disabled
    pub fn drive(&self, node: NodeId) -> NodeDrive {
        self.drives.get(&node).copied().unwrap_or_default()
    }

    /// Nodes currently executing a motion, in id order
    pub fn moving_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .drives
            .iter()
            .filter(|(_, drive)| drive.state == DriveState::Moving)
            .map(|(&node, _)| node)
            .collect();
        nodes.sort();
        nodes
    }

    pub(crate) fn drive_mut(&mut self, node: NodeId) -> &mut NodeDrive {
        self.drives.entry(node).or_default()
    }

    pub(crate) fn sdo(&mut self) -> Result<&mut SdoClient<T>, DriveError> {
        if self.bitrate.is_none() {
            return Err(DriveError::NotConnected);
        }
        Ok(&mut self.sdo)
    }

    pub(crate) fn write(
        &mut self,
        node: NodeId,
        object: Object,
        value: u32,
    ) -> Result<(), DriveError> {
        self.sdo()?.download(node, object.index(), value)?;
        Ok(())
    }

    pub(crate) fn read(&mut self, node: NodeId, object: Object) -> Result<u32, DriveError> {
        Ok(self.sdo()?.upload(node, object.index())?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::canopen::RetryPolicy;
    use crate::transport::mock::{MockBus, MockTransport};

    /// Connected session on a mock bus with no retry pauses or settle delays
    pub(crate) fn session() -> (Session<MockTransport>, Arc<Mutex<MockBus>>) {
        let config = SessionConfig {
            retry: RetryPolicy::new(10, Duration::ZERO),
            shutdown_settle_ms: 0,
            reboot_settle_ms: 0,
            ..SessionConfig::default()
        };
        let (transport, bus) = MockTransport::new();
        let mut session = Session::new(transport, config);
        session.connect(Bitrate::Kbps1000).unwrap();
        (session, bus)
    }

    pub(crate) fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }
}
