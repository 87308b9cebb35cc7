//! Delimiter framing for the sensor byte stream.
//!
//! The device sends every message COBS-encoded and terminated by a single
//! `0x00`. Notifications arrive in arbitrary slices, so [`FrameDecoder`]
//! buffers bytes until a delimiter shows up and hands back whole frames.

/// Byte value reserved as the frame delimiter.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Largest COBS code byte: a run of 254 data bytes with no implied zero.
const MAX_RUN_CODE: u8 = 0xFF;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("Frame does not end with the 0x00 delimiter")]
    MissingDelimiter,

    #[error("Frame contains no encoded payload")]
    EmptyFrame,

    #[error("Unexpected zero byte at offset {offset} inside encoded frame")]
    UnexpectedZero { offset: usize },

    #[error("COBS block at offset {offset} needs {needed} bytes but only {available} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Pending buffer holds {pending} bytes without a delimiter (limit {limit})")]
    FrameTooLarge { pending: usize, limit: usize },
}

/// One delimiter-terminated unit of stream data, still COBS encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Raw frame bytes, including the trailing delimiter.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Strip the byte stuffing and the delimiter, yielding the payload.
    pub fn decode(&self) -> Result<Vec<u8>, FrameDecodeError> {
        cobs_decode(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Incremental delimiter scanner over the inbound byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    // Bytes before this index are known to contain no delimiter.
    scanned: usize,
    max_pending: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that refuses to hold more than `limit` undelimited bytes.
    ///
    /// The limit is only enforced by [`FrameDecoder::check_overflow`].
    pub fn with_max_pending(limit: usize) -> Self {
        Self {
            max_pending: Some(limit),
            ..Self::default()
        }
    }

    /// Append `bytes` and return every frame completed by them, in order.
    ///
    /// Bytes after the last delimiter stay buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == FRAME_DELIMITER)
        {
            let end = self.scanned + offset;
            let bytes: Vec<u8> = self.pending.drain(..=end).collect();
            self.scanned = 0;
            frames.push(Frame { bytes });
        }
        self.scanned = self.pending.len();

        if !frames.is_empty() {
            log::debug!(
                "Extracted {} frame(s), {} byte(s) pending",
                frames.len(),
                self.pending.len()
            );
        }
        frames
    }

    /// Enforce the pending-size limit, dropping the buffered bytes when exceeded.
    pub fn check_overflow(&mut self) -> Result<(), FrameDecodeError> {
        match self.max_pending {
            Some(limit) if self.pending.len() > limit => {
                let pending = self.pending.len();
                self.clear();
                Err(FrameDecodeError::FrameTooLarge { pending, limit })
            }
            _ => Ok(()),
        }
    }

    /// Number of bytes waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.scanned = 0;
    }
}

/// Decode one COBS frame (with its trailing delimiter) into the payload.
pub fn cobs_decode(frame: &[u8]) -> Result<Vec<u8>, FrameDecodeError> {
    let body = match frame.split_last() {
        Some((&FRAME_DELIMITER, body)) => body,
        _ => return Err(FrameDecodeError::MissingDelimiter),
    };
    if body.is_empty() {
        return Err(FrameDecodeError::EmptyFrame);
    }

    let mut payload = Vec::with_capacity(body.len());
    let mut pos = 0;
    while pos < body.len() {
        let code = body[pos];
        if code == FRAME_DELIMITER {
            return Err(FrameDecodeError::UnexpectedZero { offset: pos });
        }

        let end = pos + usize::from(code);
        if end > body.len() {
            return Err(FrameDecodeError::Truncated {
                offset: pos,
                needed: usize::from(code) - 1,
                available: body.len() - pos - 1,
            });
        }

        let block = &body[pos + 1..end];
        if let Some(zero) = block.iter().position(|&b| b == FRAME_DELIMITER) {
            return Err(FrameDecodeError::UnexpectedZero {
                offset: pos + 1 + zero,
            });
        }
        payload.extend_from_slice(block);

        pos = end;
        if code != MAX_RUN_CODE && pos < body.len() {
            payload.push(0);
        }
    }

    Ok(payload)
}

/// COBS-encode `payload`. The result contains no zero byte and no delimiter.
pub fn cobs_encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 254 + 2);
    let mut code_index = 0;
    let mut code = 1u8;
    out.push(0);

    for &byte in payload {
        if byte == 0 {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
            if code == MAX_RUN_CODE {
                out[code_index] = code;
                code_index = out.len();
                out.push(0);
                code = 1;
            }
        }
    }
    out[code_index] = code;

    out
}

/// COBS-encode `payload` and append the delimiter, ready for the wire.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = cobs_encode(payload);
    frame.push(FRAME_DELIMITER);
    frame
}
