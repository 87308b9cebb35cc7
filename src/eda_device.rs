//! GATT identifiers and small notification parsers for the EDA wearable.
//!
//! Measurements travel over the Nordic UART Service. Battery and firmware
//! information use the standard Battery and Device Information services.

use uuid::Uuid;

use crate::eda_message::ParseError;

/// Advertised names of compatible devices start with this prefix.
pub const DEVICE_NAME_PREFIX: &str = "EDA";

/// Nordic UART Service.
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Host to device writes (control messages).
pub const NUS_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Device to host notifications (measurement stream).
pub const NUS_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Battery Level characteristic (0x2A19).
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Firmware Revision String characteristic (0x2A26).
pub const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);

pub fn is_eda_device(name: &str) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX)
}

/// Battery level in percent from a Battery Level read or notification.
pub fn parse_battery_level(data: &[u8]) -> Result<u8, ParseError> {
    let level = *data
        .first()
        .ok_or_else(|| ParseError::InvalidData("empty battery notification".to_string()))?;
    if level > 100 {
        return Err(ParseError::InvalidData(format!(
            "battery level {}% out of range",
            level
        )));
    }
    Ok(level)
}

pub fn parse_firmware_revision(data: &[u8]) -> Result<String, ParseError> {
    let revision = std::str::from_utf8(data)
        .map_err(|e| ParseError::InvalidData(format!("firmware revision: {}", e)))?;
    Ok(revision.trim_end_matches('\0').trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids() {
        assert_eq!(
            NUS_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            NUS_RX_CHAR_UUID.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            BATTERY_LEVEL_UUID.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_device_name_filter() {
        assert!(is_eda_device("EDA-0042"));
        assert!(!is_eda_device("Aranet4 12345"));
    }

    #[test]
    fn test_battery_level() {
        assert_eq!(parse_battery_level(&[87]).unwrap(), 87);
        assert!(parse_battery_level(&[]).is_err());
        assert!(parse_battery_level(&[101]).is_err());
    }

    #[test]
    fn test_firmware_revision() {
        assert_eq!(parse_firmware_revision(b"1.2.0\0").unwrap(), "1.2.0");
        assert!(parse_firmware_revision(&[0xFF, 0xFE]).is_err());
    }
}
