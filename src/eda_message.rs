//! Measurement payloads exchanged with the EDA sensor.
//!
//! Payloads use the protobuf wire format. The device sends `EdaBuffer`
//! messages:
//!
//! ```text
//! message Timestamp { uint64 time = 1; uint32 us = 2; }
//! message Impedance { float real = 1; float imag = 2; }
//! message EdaBuffer { repeated Impedance data = 1; Timestamp timestamp = 2; }
//! ```
//!
//! and the host sends a bare `Timestamp` to set the device clock.

use bytes::{Buf, BufMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Excitation frequencies of one sweep, in the order the samples arrive.
pub const FREQUENCY_TABLE: [u32; 16] = [
    12, 28, 32, 36, 44, 68, 84, 108, 136, 196, 256, 324, 400, 484, 576, 724,
];

/// Scale applied to the inverse impedance modulus.
const MAGNITUDE_SCALE: f64 = 1_000_000.0;

const FIELD_DATA: u32 = 1;
const FIELD_TIMESTAMP: u32 = 2;
const FIELD_TIME: u32 = 1;
const FIELD_US: u32 = 2;
const FIELD_REAL: u32 = 1;
const FIELD_IMAG: u32 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Payload truncated while reading {context}")]
    Truncated { context: &'static str },

    #[error("Varint longer than 10 bytes")]
    VarintOverflow,

    #[error("Invalid field number 0")]
    InvalidFieldNumber,

    #[error("Unsupported wire type {0}")]
    UnsupportedWireType(u8),

    #[error("Field {field} has wire type {found:?}, expected {expected:?}")]
    WrongWireType {
        field: u32,
        expected: WireType,
        found: WireType,
    },

    #[error("Value {value} does not fit field {field}")]
    ValueOutOfRange { field: u32, value: u64 },

    #[error("Measurement has no timestamp")]
    MissingTimestamp,

    #[error("Measurement has {0} samples, at most 16 are defined")]
    TooManySamples(usize),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_tag_bits(bits: u8) -> Result<Self, ParseError> {
        match bits {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            other => Err(ParseError::UnsupportedWireType(other)),
        }
    }

    fn bits(self) -> u64 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }
}

/// One point of an impedance sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexSample {
    pub real: f64,
    pub imag: f64,
    pub frequency_hz: u32,
}

impl ComplexSample {
    /// Scaled inverse modulus, `1e6 / |Z|`.
    pub fn magnitude(&self) -> f64 {
        MAGNITUDE_SCALE / (self.real * self.real + self.imag * self.imag).sqrt()
    }
}

/// A decoded sweep: device timestamp in seconds plus the samples in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub timestamp: f64,
    pub samples: Vec<ComplexSample>,
}

/// Device clock value, seconds since the Unix epoch plus microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceTimestamp {
    pub time: u64,
    pub us: u32,
}

impl DeviceTimestamp {
    pub fn new(time: u64, us: u32) -> Self {
        Self { time, us }
    }

    /// Clock reading for `now`. Times before the epoch clamp to zero.
    pub fn from_system_time(now: SystemTime) -> Self {
        let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            time: since_epoch.as_secs(),
            us: since_epoch.subsec_micros(),
        }
    }

    pub fn as_seconds(&self) -> f64 {
        self.time as f64 + f64::from(self.us) * 1e-6
    }

    /// Protobuf encoding of the `Timestamp` control message. Zero fields are omitted.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        if self.time != 0 {
            put_key(&mut buf, FIELD_TIME, WireType::Varint);
            put_varint(&mut buf, self.time);
        }
        if self.us != 0 {
            put_key(&mut buf, FIELD_US, WireType::Varint);
            put_varint(&mut buf, u64::from(self.us));
        }
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ParseError> {
        let mut buf = payload;
        let mut timestamp = Self::default();
        while buf.has_remaining() {
            let (field, wire) = read_key(&mut buf)?;
            match field {
                FIELD_TIME => {
                    expect_wire(field, wire, WireType::Varint)?;
                    timestamp.time = read_varint(&mut buf)?;
                }
                FIELD_US => {
                    expect_wire(field, wire, WireType::Varint)?;
                    let value = read_varint(&mut buf)?;
                    timestamp.us = u32::try_from(value)
                        .map_err(|_| ParseError::ValueOutOfRange { field, value })?;
                }
                _ => skip_field(&mut buf, wire)?,
            }
        }
        Ok(timestamp)
    }
}

/// Decode an `EdaBuffer` payload into a [`Measurement`].
///
/// Samples take their frequency from [`FREQUENCY_TABLE`] by position. Short
/// sweeps are accepted as-is.
pub fn decode_measurement(payload: &[u8]) -> Result<Measurement, ParseError> {
    let mut buf = payload;
    let mut pairs: Vec<(f32, f32)> = Vec::with_capacity(FREQUENCY_TABLE.len());
    let mut timestamp = None;

    while buf.has_remaining() {
        let (field, wire) = read_key(&mut buf)?;
        match field {
            FIELD_DATA => {
                expect_wire(field, wire, WireType::LengthDelimited)?;
                let body = read_length_delimited(&mut buf)?;
                pairs.push(decode_impedance(body)?);
            }
            FIELD_TIMESTAMP => {
                expect_wire(field, wire, WireType::LengthDelimited)?;
                let body = read_length_delimited(&mut buf)?;
                timestamp = Some(DeviceTimestamp::decode(body)?);
            }
            _ => skip_field(&mut buf, wire)?,
        }
    }

    let timestamp = timestamp.ok_or(ParseError::MissingTimestamp)?;
    if pairs.len() > FREQUENCY_TABLE.len() {
        return Err(ParseError::TooManySamples(pairs.len()));
    }

    let samples = pairs
        .into_iter()
        .zip(FREQUENCY_TABLE)
        .map(|((real, imag), frequency_hz)| ComplexSample {
            real: f64::from(real),
            imag: f64::from(imag),
            frequency_hz,
        })
        .collect();

    Ok(Measurement {
        timestamp: timestamp.as_seconds(),
        samples,
    })
}

/// Device-side encoding of an `EdaBuffer`, used for replays and simulation.
pub fn encode_measurement(timestamp: &DeviceTimestamp, pairs: &[(f32, f32)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(pairs.len() * 12 + 20);
    for &(real, imag) in pairs {
        let mut body = Vec::with_capacity(10);
        put_key(&mut body, FIELD_REAL, WireType::Fixed32);
        body.put_f32_le(real);
        put_key(&mut body, FIELD_IMAG, WireType::Fixed32);
        body.put_f32_le(imag);

        put_key(&mut buf, FIELD_DATA, WireType::LengthDelimited);
        put_varint(&mut buf, body.len() as u64);
        buf.put_slice(&body);
    }

    let stamp = timestamp.encode();
    put_key(&mut buf, FIELD_TIMESTAMP, WireType::LengthDelimited);
    put_varint(&mut buf, stamp.len() as u64);
    buf.put_slice(&stamp);
    buf
}

fn decode_impedance(payload: &[u8]) -> Result<(f32, f32), ParseError> {
    let mut buf = payload;
    let (mut real, mut imag) = (0.0, 0.0);
    while buf.has_remaining() {
        let (field, wire) = read_key(&mut buf)?;
        match field {
            FIELD_REAL => {
                expect_wire(field, wire, WireType::Fixed32)?;
                real = read_f32(&mut buf)?;
            }
            FIELD_IMAG => {
                expect_wire(field, wire, WireType::Fixed32)?;
                imag = read_f32(&mut buf)?;
            }
            _ => skip_field(&mut buf, wire)?,
        }
    }
    Ok((real, imag))
}

fn read_varint(buf: &mut &[u8]) -> Result<u64, ParseError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(ParseError::Truncated { context: "varint" });
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ParseError::VarintOverflow)
}

fn read_key(buf: &mut &[u8]) -> Result<(u32, WireType), ParseError> {
    let key = read_varint(buf)?;
    let wire = WireType::from_tag_bits((key & 0x07) as u8)?;
    let field = u32::try_from(key >> 3).map_err(|_| ParseError::InvalidFieldNumber)?;
    if field == 0 {
        return Err(ParseError::InvalidFieldNumber);
    }
    Ok((field, wire))
}

fn read_f32(buf: &mut &[u8]) -> Result<f32, ParseError> {
    if buf.remaining() < 4 {
        return Err(ParseError::Truncated { context: "float" });
    }
    Ok(buf.get_f32_le())
}

fn read_length_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ParseError> {
    let len = read_varint(buf)?;
    let len = usize::try_from(len).map_err(|_| ParseError::Truncated {
        context: "length-delimited field",
    })?;
    if buf.remaining() < len {
        return Err(ParseError::Truncated {
            context: "length-delimited field",
        });
    }
    let whole: &'a [u8] = *buf;
    let (body, rest) = whole.split_at(len);
    *buf = rest;
    Ok(body)
}

fn skip_field(buf: &mut &[u8], wire: WireType) -> Result<(), ParseError> {
    let width = match wire {
        WireType::Varint => {
            read_varint(buf)?;
            return Ok(());
        }
        WireType::LengthDelimited => {
            read_length_delimited(buf)?;
            return Ok(());
        }
        WireType::Fixed64 => 8,
        WireType::Fixed32 => 4,
    };
    if buf.remaining() < width {
        return Err(ParseError::Truncated {
            context: "fixed-width field",
        });
    }
    buf.advance(width);
    Ok(())
}

fn expect_wire(field: u32, found: WireType, expected: WireType) -> Result<(), ParseError> {
    if found == expected {
        Ok(())
    } else {
        Err(ParseError::WrongWireType {
            field,
            expected,
            found,
        })
    }
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_key(buf: &mut Vec<u8>, field: u32, wire: WireType) {
    put_varint(buf, (u64::from(field) << 3) | wire.bits());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sweep(count: usize) -> Vec<(f32, f32)> {
        (0..count)
            .map(|i| (1000.0 + i as f32 * 10.0, -(i as f32) * 5.0))
            .collect()
    }

    #[test]
    fn test_timestamp_combines_seconds_and_micros() {
        let payload = encode_measurement(&DeviceTimestamp::new(100, 500_000), &sweep(16));
        let measurement = decode_measurement(&payload).unwrap();
        assert!((measurement.timestamp - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_samples_take_frequencies_by_position() {
        let pairs = sweep(16);
        let payload = encode_measurement(&DeviceTimestamp::new(1, 0), &pairs);
        let measurement = decode_measurement(&payload).unwrap();

        assert_eq!(measurement.samples.len(), FREQUENCY_TABLE.len());
        for ((sample, (real, imag)), freq) in measurement.samples.iter().zip(&pairs).zip(FREQUENCY_TABLE) {
            assert_eq!(sample.real, f64::from(*real));
            assert_eq!(sample.imag, f64::from(*imag));
            assert_eq!(sample.frequency_hz, freq);
        }
        assert_eq!(measurement.samples[0].frequency_hz, 12);
        assert_eq!(measurement.samples[15].frequency_hz, 724);
    }

    #[test]
    fn test_short_sweep_is_accepted() {
        let payload = encode_measurement(&DeviceTimestamp::new(5, 0), &sweep(3));
        let measurement = decode_measurement(&payload).unwrap();
        assert_eq!(measurement.samples.len(), 3);
        assert_eq!(measurement.samples[2].frequency_hz, 32);
    }

    #[test]
    fn test_too_many_samples_rejected() {
        let payload = encode_measurement(&DeviceTimestamp::new(5, 0), &sweep(17));
        assert_eq!(decode_measurement(&payload), Err(ParseError::TooManySamples(17)));
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let mut payload = encode_measurement(&DeviceTimestamp::new(5, 0), &sweep(2));
        // Drop the trailing timestamp field: key, length and the two varint fields.
        let stamp_len = DeviceTimestamp::new(5, 0).encode().len();
        payload.truncate(payload.len() - stamp_len - 2);
        assert_eq!(decode_measurement(&payload), Err(ParseError::MissingTimestamp));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let payload = encode_measurement(&DeviceTimestamp::new(5, 0), &sweep(4));
        let cut = &payload[..payload.len() / 2];
        assert!(matches!(
            decode_measurement(cut),
            Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn test_wrong_field_type_rejected() {
        // Field 1 as a varint instead of an embedded message.
        let payload = [0x08, 0x01];
        assert_eq!(
            decode_measurement(&payload),
            Err(ParseError::WrongWireType {
                field: 1,
                expected: WireType::LengthDelimited,
                found: WireType::Varint,
            })
        );
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut payload = vec![
            0x18, 0x96, 0x01, // field 3 varint
            0x25, 1, 2, 3, 4, // field 4 fixed32
            0x29, 1, 2, 3, 4, 5, 6, 7, 8, // field 5 fixed64
            0x32, 0x02, 0xAA, 0xBB, // field 6 bytes
        ];
        payload.extend(encode_measurement(&DeviceTimestamp::new(7, 250_000), &sweep(2)));
        let measurement = decode_measurement(&payload).unwrap();
        assert_eq!(measurement.samples.len(), 2);
        assert!((measurement.timestamp - 7.25).abs() < 1e-9);
    }

    #[test]
    fn test_group_wire_type_rejected() {
        assert_eq!(
            decode_measurement(&[0x0B]),
            Err(ParseError::UnsupportedWireType(3))
        );
    }

    #[test]
    fn test_magnitude() {
        let sample = ComplexSample {
            real: 3.0,
            imag: 4.0,
            frequency_hz: 12,
        };
        assert_eq!(sample.magnitude(), 200_000.0);
    }

    #[test]
    fn test_timestamp_control_message() {
        let now = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let stamp = DeviceTimestamp::from_system_time(now);
        assert_eq!(stamp, DeviceTimestamp::new(1_700_000_000, 123_456));

        let encoded = stamp.encode();
        assert_eq!(encoded[0], 0x08);
        assert_eq!(DeviceTimestamp::decode(&encoded).unwrap(), stamp);
        assert!((stamp.as_seconds() - 1_700_000_000.123_456).abs() < 1e-6);
    }

    #[test]
    fn test_zero_timestamp_encodes_empty() {
        assert!(DeviceTimestamp::default().encode().is_empty());
        assert_eq!(DeviceTimestamp::decode(&[]).unwrap(), DeviceTimestamp::default());
    }

    #[test]
    fn test_micros_out_of_range() {
        let mut payload = Vec::new();
        put_key(&mut payload, FIELD_US, WireType::Varint);
        put_varint(&mut payload, u64::from(u32::MAX) + 1);
        assert!(matches!(
            DeviceTimestamp::decode(&payload),
            Err(ParseError::ValueOutOfRange { field: 2, .. })
        ));
    }
}
