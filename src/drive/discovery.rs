// Node discovery: probe each id in the configured range for a status word.
// Sequential on purpose; the bus carries one SDO transaction at a time.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::error::DriveError;
use crate::canopen::{NodeId, Object, SdoError};
use crate::session::Session;
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Ids in the scan range that answered a status word read
    pub fn scan_nodes(&mut self) -> Result<BTreeSet<NodeId>, DriveError> {
        let range = self.config.scan_range();
        info!("Scanning node ids {}..={}", range.start(), range.end());

        let sdo = self.sdo()?;
        let mut found = BTreeSet::new();

        for id in range {
            let Ok(node) = NodeId::new(id) else {
                continue;
            };
            match sdo.upload(node, Object::StatusWord.index()) {
                Ok(status) => {
                    debug!("Node {} responding, status word 0x{:04X}", node, status);
                    found.insert(node);
                }
                // The adapter itself is failing; every further probe would too
                Err(e @ SdoError::Transport { .. }) => return Err(e.into()),
                Err(e) => debug!("Node {} not present: {}", node, e),
            }
        }

        info!("Found {} node(s): {:?}", found.len(), found);
        Ok(found)
    }
}
