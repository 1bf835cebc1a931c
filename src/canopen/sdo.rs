// Expedited SDO client
//
// Frame layouts (index little-endian, sub-index in byte 3):
//   download request  [0x22, idx_lo, idx_hi, sub, v0, v1, v2, v3]
//   upload request    [0x40, idx_lo, idx_hi, sub, 0, 0, 0, 0]
//   response          byte 0: 0x80 = abort, 0x00 = not ready, else data in bytes 4..8

use std::fmt;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::frame::{CanFrame, NodeId};
use super::od::ObjectIndex;
use super::retry::RetryPolicy;
use crate::transport::{Transport, TransportError};

/// Initiate expedited download, 4 data bytes
pub const CMD_DOWNLOAD_REQUEST: u8 = 0x22;
/// Initiate upload
pub const CMD_UPLOAD_REQUEST: u8 = 0x40;
/// Expedited upload response, 4 data bytes
pub const CMD_UPLOAD_RESPONSE: u8 = 0x43;
/// Download confirmation
pub const CMD_DOWNLOAD_RESPONSE: u8 = 0x60;
/// Abort transfer
pub const CMD_ABORT: u8 = 0x80;
/// Server has nothing to report yet
pub const CMD_NOT_READY: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// One expedited SDO transaction as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoRequest {
    pub node: NodeId,
    pub object: ObjectIndex,
    pub direction: Direction,
    /// Value to write; always 0 for uploads
    pub payload: u32,
}

impl SdoRequest {
    pub fn upload(node: NodeId, object: ObjectIndex) -> Self {
        Self {
            node,
            object,
            direction: Direction::Upload,
            payload: 0,
        }
    }

    pub fn download(node: NodeId, object: ObjectIndex, value: u32) -> Self {
        Self {
            node,
            object,
            direction: Direction::Download,
            payload: value,
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let command = match self.direction {
            Direction::Upload => CMD_UPLOAD_REQUEST,
            Direction::Download => CMD_DOWNLOAD_REQUEST,
        };
        let [idx_lo, idx_hi] = self.object.index.to_le_bytes();
        let [v0, v1, v2, v3] = self.payload.to_le_bytes();
        [command, idx_lo, idx_hi, self.object.subindex, v0, v1, v2, v3]
    }

    pub fn to_frame(&self) -> CanFrame {
        CanFrame::with_payload(self.node.request_cob_id(), self.encode())
    }

    /// Parse a request frame seen on the bus
    pub fn decode(frame: &CanFrame) -> Option<Self> {
        let node_id = frame.id().checked_sub(super::frame::SDO_REQUEST_BASE)?;
        let node = NodeId::new(u8::try_from(node_id).ok()?).ok()?;
        let data = frame.padded();
        let object = ObjectIndex::new(u16::from_le_bytes([data[1], data[2]]), data[3]);

        match data[0] {
            CMD_UPLOAD_REQUEST => Some(Self::upload(node, object)),
            CMD_DOWNLOAD_REQUEST => Some(Self::download(
                node,
                object,
                u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            )),
            _ => None,
        }
    }
}

/// SDO abort code (CiA 301)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortCode(pub u32);

impl AbortCode {
    pub fn description(self) -> Option<&'static str> {
        let text = match self.0 {
            0x0503_0000 => "Toggle bit not alternated",
            0x0504_0000 => "SDO protocol timed out",
            0x0504_0001 => "Command specifier not valid or unknown",
            0x0504_0005 => "Out of memory",
            0x0601_0000 => "Unsupported access to an object",
            0x0601_0001 => "Attempt to read a write only object",
            0x0601_0002 => "Attempt to write a read only object",
            0x0602_0000 => "Object does not exist in the object dictionary",
            0x0604_0043 => "General parameter incompatibility",
            0x0604_0047 => "General internal incompatibility in the device",
            0x0606_0000 => "Access failed due to a hardware error",
            0x0607_0010 => "Data type does not match, length of service parameter does not match",
            0x0609_0011 => "Sub-index does not exist",
            0x0609_0030 => "Invalid value for parameter",
            0x0609_0031 => "Value of parameter written too high",
            0x0609_0032 => "Value of parameter written too low",
            0x0800_0000 => "General error",
            0x0800_0020 => "Data cannot be transferred or stored to the application",
            0x0800_0021 => "Data cannot be transferred because of local control",
            0x0800_0022 => "Data cannot be transferred because of the present device state",
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "0x{:08X} ({})", self.0, text),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// Decoded server response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoResponse {
    Success(u32),
    NotReady,
    Abort(AbortCode),
}

impl SdoResponse {
    /// Decode response bytes; short frames are zero-padded
    pub fn decode(data: &[u8]) -> Self {
        let mut bytes = [0u8; 8];
        let len = data.len().min(8);
        bytes[..len].copy_from_slice(&data[..len]);
        let value = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        match bytes[0] {
            CMD_ABORT => SdoResponse::Abort(AbortCode(value)),
            CMD_NOT_READY => SdoResponse::NotReady,
            _ => SdoResponse::Success(value),
        }
    }

    /// Encode as a server would answer a request for `object`
    pub fn encode(&self, object: ObjectIndex) -> [u8; 8] {
        let (command, value) = match *self {
            SdoResponse::Success(value) => (CMD_UPLOAD_RESPONSE, value),
            SdoResponse::NotReady => (CMD_NOT_READY, 0),
            SdoResponse::Abort(code) => (CMD_ABORT, code.0),
        };
        let [idx_lo, idx_hi] = object.index.to_le_bytes();
        let [v0, v1, v2, v3] = value.to_le_bytes();
        [command, idx_lo, idx_hi, object.subindex, v0, v1, v2, v3]
    }
}

/// Error types for SDO transactions
#[derive(Debug, thiserror::Error)]
pub enum SdoError {
    #[error("Could not transmit to node {node} after {attempts} attempts: {source}")]
    Transport {
        node: NodeId,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Timeout waiting for SDO response from node {node} for {object}")]
    Timeout { node: NodeId, object: ObjectIndex },

    #[error("Node {node} aborted SDO transfer of {object}: {code}")]
    ProtocolAbort {
        node: NodeId,
        object: ObjectIndex,
        code: AbortCode,
    },
}

pub type Result<T> = std::result::Result<T, SdoError>;

/// SDO client bound to one CAN channel.
///
/// Transactions are strictly sequential: the `&mut self` receiver is what
/// keeps a second request off the bus while one is outstanding.
pub struct SdoClient<T> {
    transport: T,
    retry: RetryPolicy,
    read_timeout: Duration,
    strict_download_abort: bool,
}

impl<T: Transport> SdoClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            read_timeout: Duration::ZERO,
            strict_download_abort: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How long a single receive attempt may block inside the adapter
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Report abort frames that answer a download as errors
    pub fn with_strict_download_abort(mut self, strict: bool) -> Self {
        self.strict_download_abort = strict;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read a 32-bit object from a node
    pub fn upload(&mut self, node: NodeId, object: ObjectIndex) -> Result<u32> {
        let request = SdoRequest::upload(node, object);
        match self.transact(&request)? {
            SdoResponse::Success(value) => {
                debug!("Upload from node {}: {} = 0x{:08X}", node, object, value);
                Ok(value)
            }
            SdoResponse::Abort(code) => {
                debug!("Upload from node {} of {} aborted: {}", node, object, code);
                Err(SdoError::ProtocolAbort { node, object, code })
            }
            // receive() keeps waiting on NotReady for uploads
            SdoResponse::NotReady => Err(SdoError::Timeout { node, object }),
        }
    }

    /// Write a 32-bit object on a node
    pub fn download(&mut self, node: NodeId, object: ObjectIndex, value: u32) -> Result<()> {
        let request = SdoRequest::download(node, object, value);
        debug!("Download to node {}: {} = 0x{:08X}", node, object, value);

        match self.transact(&request)? {
            SdoResponse::Abort(code) if self.strict_download_abort => {
                Err(SdoError::ProtocolAbort { node, object, code })
            }
            SdoResponse::Abort(code) => {
                warn!(
                    "Node {} answered write of {} with abort {}, treating as confirmed",
                    node, object, code
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn transact(&mut self, request: &SdoRequest) -> Result<SdoResponse> {
        // Frames left over from unrelated traffic must not be taken as our answer
        self.transport.reset();
        self.transmit(request)?;
        self.receive(request)
    }

    fn transmit(&mut self, request: &SdoRequest) -> Result<()> {
        let frame = request.to_frame();
        let transport = &mut self.transport;

        self.retry
            .run(|attempt| {
                transport.write_frame(&frame).inspect_err(|e| {
                    debug!(
                        "Transmit attempt {} to node {} failed: {}",
                        attempt, request.node, e
                    )
                })
            })
            .map_err(|source| {
                warn!(
                    "Giving up transmitting to node {} after {} attempts",
                    request.node, self.retry.max_attempts
                );
                SdoError::Transport {
                    node: request.node,
                    attempts: self.retry.max_attempts.max(1),
                    source,
                }
            })
    }

    fn receive(&mut self, request: &SdoRequest) -> Result<SdoResponse> {
        let expected_id = request.node.response_cob_id();
        let timeout = self.read_timeout;
        let transport = &mut self.transport;

        self.retry
            .run(|attempt| {
                let frame = match transport.read_frame(timeout) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        trace!("Receive attempt {}: no frame", attempt);
                        return Err(());
                    }
                    Err(e) => {
                        debug!("Receive attempt {} failed: {}", attempt, e);
                        return Err(());
                    }
                };

                if frame.id() != expected_id {
                    trace!(
                        "Discarding frame 0x{:03X} while waiting for 0x{:03X}",
                        frame.id(),
                        expected_id
                    );
                    return Err(());
                }

                // A download is confirmed by any answer at all
                let response = SdoResponse::decode(frame.data());
                if response == SdoResponse::NotReady && request.direction == Direction::Upload {
                    trace!("Node {} not ready (attempt {})", request.node, attempt);
                    return Err(());
                }
                Ok(response)
            })
            .map_err(|()| {
                debug!(
                    "No SDO response from node {} for {}",
                    request.node, request.object
                );
                SdoError::Timeout {
                    node: request.node,
                    object: request.object,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canopen::Object;
    use crate::transport::mock::MockTransport;
    use std::time::Instant;

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn fast_client(transport: MockTransport) -> SdoClient<MockTransport> {
        SdoClient::new(transport).with_retry(RetryPolicy::new(10, Duration::ZERO))
    }

    #[test]
    fn test_download_request_layout() {
        let request = SdoRequest::download(node(5), Object::ControlWord.index(), 0x0006);
        let frame = request.to_frame();
        assert_eq!(frame.id(), 0x605);
        assert_eq!(frame.data(), &[0x22, 0x40, 0x60, 0x00, 0x06, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_upload_request_layout() {
        let request = SdoRequest::upload(node(3), Object::StatusWord.index());
        let frame = request.to_frame();
        assert_eq!(frame.id(), 0x603);
        assert_eq!(frame.data(), &[0x40, 0x41, 0x60, 0x00, 0, 0, 0, 0]);
    }

    #[test]
    fn test_download_request_decodes_back() {
        let request =
            SdoRequest::download(node(127), Object::StoreParameters.index(), 0x6576_6173);
        assert_eq!(SdoRequest::decode(&request.to_frame()), Some(request));

        let velocity = Object::TargetVelocity.index();
        let negative = SdoRequest::download(node(1), velocity, -250i32 as u32);
        assert_eq!(SdoRequest::decode(&negative.to_frame()), Some(negative));
    }

    #[test]
    fn test_decode_rejects_non_request_frames() {
        let response = CanFrame::with_payload(0x585, [0x43, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(SdoRequest::decode(&response), None);
        let unknown = CanFrame::with_payload(0x605, [0x2F, 0x60, 0x60, 0, 1, 0, 0, 0]);
        assert_eq!(SdoRequest::decode(&unknown), None);
    }

    #[test]
    fn test_response_decoding() {
        assert_eq!(
            SdoResponse::decode(&[0x43, 0x64, 0x60, 0x00, 0x00, 0x00, 0x01, 0x00]),
            SdoResponse::Success(0x0001_0000)
        );
        assert_eq!(SdoResponse::decode(&[0x00; 8]), SdoResponse::NotReady);
        assert_eq!(
            SdoResponse::decode(&[0x80, 0x41, 0x60, 0x00, 0x00, 0x00, 0x02, 0x06]),
            SdoResponse::Abort(AbortCode(0x0602_0000))
        );
        // Short frames behave as zero-padded
        assert_eq!(SdoResponse::decode(&[0x60]), SdoResponse::Success(0));
    }

    #[test]
    fn test_upload_response_value_survives_encoding() {
        let object = Object::ActualPosition.index();
        let response = SdoResponse::Success(0xDEAD_BEEF);
        assert_eq!(SdoResponse::decode(&response.encode(object)), response);
    }

    #[test]
    fn test_abort_code_display() {
        assert_eq!(
            AbortCode(0x0602_0000).to_string(),
            "0x06020000 (Object does not exist in the object dictionary)"
        );
        assert_eq!(AbortCode(0x1234_5678).to_string(), "0x12345678");
    }

    #[test]
    fn test_upload_returns_value() {
        let (transport, bus) = MockTransport::new();
        bus.lock()
            .unwrap()
            .values
            .insert((2, Object::ActualPosition.index()), 0x0001_0000);

        let mut client = fast_client(transport);
        let value = client.upload(node(2), Object::ActualPosition.index()).unwrap();
        assert_eq!(value, 0x0001_0000);
    }

    #[test]
    fn test_upload_abort_is_protocol_abort() {
        let (transport, bus) = MockTransport::new();
        bus.lock().unwrap().aborts.insert(Object::StatusWord.index());

        let mut client = fast_client(transport);
        let err = client.upload(node(3), Object::StatusWord.index()).unwrap_err();
        assert!(matches!(
            err,
            SdoError::ProtocolAbort { node: n, code: AbortCode(0x0602_0000), .. } if n.get() == 3
        ));
    }

    #[test]
    fn test_write_failure_gives_up_after_ten_attempts() {
        let (transport, bus) = MockTransport::new();
        bus.lock().unwrap().fail_writes = true;

        // Default policy: 10 attempts, 50 ms apart
        let mut client = SdoClient::new(transport);
        let start = Instant::now();
        let err = client
            .download(node(1), Object::ControlWord.index(), 0x0006)
            .unwrap_err();

        assert!(matches!(err, SdoError::Transport { attempts: 10, .. }));
        assert_eq!(bus.lock().unwrap().write_attempts, 10);
        assert!(start.elapsed() >= Duration::from_millis(9 * 50));
    }

    #[test]
    fn test_silent_node_times_out() {
        let (transport, bus) = MockTransport::new();
        bus.lock().unwrap().absent.insert(4);

        let mut client = fast_client(transport);
        let err = client.upload(node(4), Object::StatusWord.index()).unwrap_err();
        assert!(matches!(err, SdoError::Timeout { .. }));
        assert_eq!(bus.lock().unwrap().written.len(), 1);
    }

    #[test]
    fn test_stale_frames_are_flushed_before_request() {
        let (transport, bus) = MockTransport::new();
        {
            let mut bus = bus.lock().unwrap();
            let stale = SdoResponse::Success(99).encode(Object::StatusWord.index());
            bus.pending.push_back(CanFrame::with_payload(0x583, stale));
            bus.values.insert((3, Object::StatusWord.index()), 0x0237);
        }

        let mut client = fast_client(transport);
        assert_eq!(client.upload(node(3), Object::StatusWord.index()).unwrap(), 0x0237);
        assert_eq!(bus.lock().unwrap().resets, 1);
    }

    #[test]
    fn test_upload_waits_through_not_ready() {
        let (transport, bus) = MockTransport::new();
        {
            let mut bus = bus.lock().unwrap();
            bus.not_ready = 3;
            bus.values.insert((6, Object::StatusWord.index()), 0x1234);
        }

        let mut client = fast_client(transport);
        assert_eq!(client.upload(node(6), Object::StatusWord.index()).unwrap(), 0x1234);
    }

    #[test]
    fn test_not_ready_beyond_budget_times_out() {
        let (transport, bus) = MockTransport::new();
        bus.lock().unwrap().not_ready = 20;

        let mut client = fast_client(transport);
        let err = client.upload(node(6), Object::StatusWord.index()).unwrap_err();
        assert!(matches!(err, SdoError::Timeout { .. }));
    }

    #[test]
    fn test_frames_from_other_nodes_are_ignored() {
        let (transport, bus) = MockTransport::new();
        {
            let mut bus = bus.lock().unwrap();
            let foreign = SdoResponse::Success(7).encode(Object::StatusWord.index());
            bus.noise = Some(CanFrame::with_payload(0x585, foreign));
            bus.values.insert((3, Object::StatusWord.index()), 42);
        }

        let mut client = fast_client(transport);
        assert_eq!(client.upload(node(3), Object::StatusWord.index()).unwrap(), 42);
    }

    #[test]
    fn test_download_abort_is_lenient_by_default() {
        let (transport, bus) = MockTransport::new();
        bus.lock().unwrap().aborts.insert(Object::ControlWord.index());

        let mut client = fast_client(transport);
        assert!(client.download(node(1), Object::ControlWord.index(), 0x0F).is_ok());

        let mut client = client.with_strict_download_abort(true);
        let err = client
            .download(node(1), Object::ControlWord.index(), 0x0F)
            .unwrap_err();
        assert!(matches!(err, SdoError::ProtocolAbort { .. }));
    }
}
