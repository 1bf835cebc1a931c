// Serial-line CAN (SLCAN / Lawicel ASCII) adapter
//
// Commands are ASCII lines terminated by '\r':
//   S<n>   set bitrate (0 = 10k .. 8 = 1M)
//   O / C  open / close the channel
//   t<iii><l><dd..>  standard data frame (transmit and receive)
// The adapter answers commands with '\r' on success and BEL (0x07) on error.

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace, warn};

use super::{Bitrate, Result, Transport, TransportError};
use crate::canopen::CanFrame;

/// Serial speed of the adapter's virtual COM port
pub const DEFAULT_SERIAL_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

const CR: u8 = b'\r';
const BELL: u8 = 0x07;

/// SLCAN bitrate selector, if the adapter can produce this rate
pub fn bitrate_code(bitrate: Bitrate) -> Option<char> {
    match bitrate {
        Bitrate::Kbps10 => Some('0'),
        Bitrate::Kbps20 => Some('1'),
        Bitrate::Kbps50 => Some('2'),
        Bitrate::Kbps100 => Some('3'),
        Bitrate::Kbps125 => Some('4'),
        Bitrate::Kbps250 => Some('5'),
        Bitrate::Kbps500 => Some('6'),
        Bitrate::Kbps800 => Some('7'),
        Bitrate::Kbps1000 => Some('8'),
        _ => None,
    }
}

/// Encode a frame as a transmit line, including the trailing '\r'
pub fn encode_frame(frame: &CanFrame) -> String {
    let mut line = format!("t{:03X}{}", frame.id(), frame.data().len());
    for byte in frame.data() {
        // Writing into a String cannot fail
        let _ = write!(line, "{:02X}", byte);
    }
    line.push('\r');
    line
}

/// Parse one received line (without the '\r').
///
/// Returns `Ok(None)` for lines that are not standard data frames
/// (command acknowledgements, extended or remote frames).
pub fn parse_line(line: &[u8]) -> Result<Option<CanFrame>> {
    let Some((&kind, rest)) = line.split_first() else {
        return Ok(None);
    };
    if kind != b't' {
        return Ok(None);
    }

    let text = std::str::from_utf8(rest)
        .map_err(|_| TransportError::Malformed(format!("{:02X?}", line)))?;
    let malformed = || TransportError::Malformed(format!("t{}", text));

    // Byte offsets below assume one byte per character
    if text.len() < 4 || !text.is_ascii() {
        return Err(malformed());
    }
    let id = u16::from_str_radix(&text[..3], 16).map_err(|_| malformed())?;
    let len = text[3..4].parse::<usize>().map_err(|_| malformed())?;
    let hex = &text[4..];
    if len > 8 || hex.len() < len * 2 {
        return Err(malformed());
    }

    let mut data = [0u8; 8];
    for (i, byte) in data.iter_mut().take(len).enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| malformed())?;
    }

    CanFrame::new(id, &data[..len]).map(Some).ok_or_else(malformed)
}

/// CAN channel behind an SLCAN serial adapter
pub struct SlcanTransport {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
    // Bytes received but not yet terminated by '\r'
    rx: Vec<u8>,
}

impl SlcanTransport {
    pub fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            port: None,
            rx: Vec::new(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(line.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    /// Take the next complete line out of the receive buffer
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.rx.iter().position(|&b| b == CR || b == BELL)?;
        let mut line: Vec<u8> = self.rx.drain(..=end).collect();
        if line.pop() == Some(BELL) {
            warn!("SLCAN adapter on {} reported an error", self.port_name);
        }
        Some(line)
    }
}

impl Transport for SlcanTransport {
    fn open(&mut self, bitrate: Bitrate) -> Result<()> {
        let code = bitrate_code(bitrate).ok_or(TransportError::UnsupportedBitrate(bitrate))?;

        debug!("Opening SLCAN adapter on {}", self.port_name);
        let port = serialport::new(&self.port_name, DEFAULT_SERIAL_BAUDRATE)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        self.port = Some(port);
        self.rx.clear();

        // Close first in case a previous session left the channel open
        self.send_line("C\r")?;
        self.send_line(&format!("S{}\r", code))?;
        self.send_line("O\r")?;
        self.reset();

        debug!("SLCAN channel open at {}", bitrate);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.is_none() {
            return;
        }
        if let Err(e) = self.send_line("C\r") {
            warn!("Failed to close SLCAN channel cleanly: {}", e);
        }
        self.port = None;
        self.rx.clear();
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<()> {
        let line = encode_frame(frame);
        trace!("SLCAN tx {}", line.trim_end());
        self.send_line(&line)
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];

        loop {
            while let Some(line) = self.next_line() {
                if let Some(frame) = parse_line(&line)? {
                    return Ok(Some(frame));
                }
            }

            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now).max(Duration::from_millis(1));
            let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
            port.set_timeout(remaining)?;

            match port.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline && !self.rx.contains(&CR) {
                return Ok(None);
            }
        }
    }

    fn reset(&mut self) {
        self.rx.clear();
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                debug!("Failed to flush SLCAN receive buffer: {}", e);
            }
        }
    }
}

impl Drop for SlcanTransport {
    fn drop(&mut self) {
        self.close();
    }
}
