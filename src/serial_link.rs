use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Bytes requested from the port per read.
const READ_CHUNK: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link closed")]
    Closed,
}

/// Inbound side of a transport: yields raw chunks in arrival order.
pub trait ByteSource {
    /// Return the bytes available now. An empty chunk means nothing arrived yet.
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError>;
}

/// Outbound side of a transport: accepts one delimited frame at a time.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError>;
}

/// Serial connection to a UART bridge carrying the sensor stream.
pub struct SerialLink {
    serial: Box<dyn SerialPort>,
    port: String,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink").field("port", &self.port).finish()
    }
}

impl SerialLink {
    /// Open `port` and discard anything already buffered.
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, LinkError> {
        log::debug!("Opening serial link on {} at {} baud", port, baud_rate);
        let serial = serialport::new(port, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()?;

        let mut link = Self {
            serial,
            port: port.to_string(),
        };
        link.flush()?;
        Ok(link)
    }

    /// Names of the serial ports present on this machine.
    pub fn available_ports() -> Result<Vec<String>, LinkError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

impl ByteSource for SerialLink {
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut buf = [0u8; READ_CHUNK];
        match self.serial.read(&mut buf) {
            Ok(0) => Err(LinkError::Closed),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl FrameSink for SerialLink {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.serial.write_all(frame)?;
        self.serial.flush()?;
        Ok(())
    }
}

/// In-memory transport that plays back recorded chunks and keeps what is sent.
#[derive(Debug, Default)]
pub struct ReplayLink {
    chunks: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl ReplayLink {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().collect(),
            sent: Vec::new(),
        }
    }

    /// Split one recorded stream into notifications of at most `mtu` bytes.
    pub fn from_stream(stream: &[u8], mtu: usize) -> Self {
        Self::new(stream.chunks(mtu.max(1)).map(<[u8]>::to_vec))
    }

    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Frames written through [`FrameSink::send_frame`], oldest first.
    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent
    }
}

impl ByteSource for ReplayLink {
    fn read_chunk(&mut self) -> Result<Vec<u8>, LinkError> {
        self.chunks.pop_front().ok_or(LinkError::Closed)
    }
}

impl FrameSink for ReplayLink {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_splits_stream_by_mtu() {
        let stream: Vec<u8> = (0..50).collect();
        let mut link = ReplayLink::from_stream(&stream, 20);

        assert_eq!(link.read_chunk().unwrap().len(), 20);
        assert_eq!(link.read_chunk().unwrap().len(), 20);
        assert_eq!(link.read_chunk().unwrap(), (40..50).collect::<Vec<u8>>());
        assert!(link.is_exhausted());
        assert!(matches!(link.read_chunk(), Err(LinkError::Closed)));
    }

    #[test]
    fn test_replay_records_sent_frames() {
        let mut link = ReplayLink::default();
        link.send_frame(&[0x02, 0x08, 0x00]).unwrap();
        assert_eq!(link.sent_frames(), &[vec![0x02, 0x08, 0x00]]);
    }

    #[test]
    fn test_available_ports() {
        // Depends on the host; only checks that enumeration does not misbehave.
        match SerialLink::available_ports() {
            Ok(ports) => assert!(ports.iter().all(|p| !p.is_empty())),
            Err(LinkError::SerialPort(_)) => {}
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
