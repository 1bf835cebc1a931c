// Scripted in-memory CAN bus answering SDO requests like a set of drives

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Bitrate, Result, Transport, TransportError};
use crate::canopen::sdo::{AbortCode, Direction, SdoRequest, SdoResponse};
use crate::canopen::{CanFrame, ObjectIndex};

/// Abort code the mock answers with
pub const MOCK_ABORT: AbortCode = AbortCode(0x0602_0000);

#[derive(Debug, Default)]
pub struct MockBus {
    pub open: Option<Bitrate>,
    pub fail_writes: bool,
    pub write_attempts: u32,
    pub resets: u32,
    /// Every frame that made it onto the bus
    pub written: Vec<CanFrame>,
    /// Receive queue
    pub pending: VecDeque<CanFrame>,
    /// Node ids that never answer
    pub absent: HashSet<u8>,
    /// Objects no node confirms
    pub no_reply: HashSet<ObjectIndex>,
    /// Objects every node answers with an abort
    pub aborts: HashSet<ObjectIndex>,
    /// NotReady frames sent ahead of every upload answer
    pub not_ready: u32,
    /// Frame injected ahead of every answer
    pub noise: Option<CanFrame>,
    /// Object values per (node, object); downloads update them
    pub values: HashMap<(u8, ObjectIndex), u32>,
}

impl MockBus {
    pub fn requests(&self) -> Vec<SdoRequest> {
        self.written.iter().filter_map(SdoRequest::decode).collect()
    }

    /// (node, object, value) of every download, in bus order
    pub fn downloads(&self) -> Vec<(u8, ObjectIndex, u32)> {
        self.requests()
            .into_iter()
            .filter(|r| r.direction == Direction::Download)
            .map(|r| (r.node.get(), r.object, r.payload))
            .collect()
    }

    fn respond(&mut self, request: &SdoRequest) {
        let node = request.node.get();
        if self.absent.contains(&node) || self.no_reply.contains(&request.object) {
            return;
        }
        if let Some(noise) = self.noise {
            self.pending.push_back(noise);
        }

        let reply_id = request.node.response_cob_id();
        let response = if self.aborts.contains(&request.object) {
            SdoResponse::Abort(MOCK_ABORT)
        } else {
            match request.direction {
                Direction::Upload => {
                    for _ in 0..self.not_ready {
                        let data = SdoResponse::NotReady.encode(request.object);
                        self.pending.push_back(CanFrame::with_payload(reply_id, data));
                    }
                    let value = self.values.get(&(node, request.object)).copied();
                    SdoResponse::Success(value.unwrap_or(0))
                }
                Direction::Download => {
                    self.values.insert((node, request.object), request.payload);
                    SdoResponse::Success(0)
                }
            }
        };

        let mut data = response.encode(request.object);
        if request.direction == Direction::Download && matches!(response, SdoResponse::Success(_)) {
            data[0] = crate::canopen::sdo::CMD_DOWNLOAD_RESPONSE;
        }
        self.pending.push_back(CanFrame::with_payload(reply_id, data));
    }
}

pub struct MockTransport {
    bus: Arc<Mutex<MockBus>>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<Mutex<MockBus>>) {
        let bus = Arc::new(Mutex::new(MockBus::default()));
        (Self { bus: Arc::clone(&bus) }, bus)
    }
}

impl Transport for MockTransport {
    fn open(&mut self, bitrate: Bitrate) -> Result<()> {
        self.bus.lock().unwrap().open = Some(bitrate);
        Ok(())
    }

    fn close(&mut self) {
        self.bus.lock().unwrap().open = None;
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<()> {
        let mut bus = self.bus.lock().unwrap();
        bus.write_attempts += 1;
        if bus.fail_writes {
            return Err(TransportError::Rejected);
        }
        bus.written.push(*frame);
        if let Some(request) = SdoRequest::decode(frame) {
            bus.respond(&request);
        }
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> Result<Option<CanFrame>> {
        Ok(self.bus.lock().unwrap().pending.pop_front())
    }

    fn reset(&mut self) {
        let mut bus = self.bus.lock().unwrap();
        bus.resets += 1;
        bus.pending.clear();
    }
}
