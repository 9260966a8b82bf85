//! Typed payloads exchanged with the device.
//!
//! This module decodes the application messages carried by reassembled data
//! frames (scan lists, status reports, error codes) and defines the events
//! a [`ProtocolSession`](crate::session::ProtocolSession) emits.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ProtocolError, Result};
use crate::framing::{data, FrameType};

/// Wi-Fi operating mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpMode {
    /// Wi-Fi off.
    Null,
    /// Station only.
    Station,
    /// Soft access point only.
    SoftAp,
    /// Station and soft access point.
    StationSoftAp,
    /// A value outside the known range.
    Unknown(u8),
}

impl OpMode {
    /// Returns the wire value.
    pub fn as_byte(self) -> u8 {
        match self {
            OpMode::Null => 0x00,
            OpMode::Station => 0x01,
            OpMode::SoftAp => 0x02,
            OpMode::StationSoftAp => 0x03,
            OpMode::Unknown(value) => value,
        }
    }
}

impl From<u8> for OpMode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => OpMode::Null,
            0x01 => OpMode::Station,
            0x02 => OpMode::SoftAp,
            0x03 => OpMode::StationSoftAp,
            other => OpMode::Unknown(other),
        }
    }
}

/// Error codes reported by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceErrorCode {
    /// Frame sequence out of order.
    Sequence,
    /// Frame checksum mismatch.
    Checksum,
    /// Device failed to decrypt a frame.
    Decrypt,
    /// Device failed to encrypt a frame.
    Encrypt,
    /// Device security setup failed.
    InitSecurity,
    /// Device ran out of memory for key agreement.
    DhMalloc,
    /// Device rejected the key agreement parameters.
    DhParam,
    /// Device could not read the negotiation parameters.
    ReadParam,
    /// A code outside the known range.
    Unknown(u8),
}

impl From<u8> for DeviceErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0 => DeviceErrorCode::Sequence,
            1 => DeviceErrorCode::Checksum,
            2 => DeviceErrorCode::Decrypt,
            3 => DeviceErrorCode::Encrypt,
            4 => DeviceErrorCode::InitSecurity,
            5 => DeviceErrorCode::DhMalloc,
            6 => DeviceErrorCode::DhParam,
            7 => DeviceErrorCode::ReadParam,
            other => DeviceErrorCode::Unknown(other),
        }
    }
}

impl DeviceErrorCode {
    /// Returns the wire value.
    pub fn as_byte(self) -> u8 {
        match self {
            DeviceErrorCode::Sequence => 0,
            DeviceErrorCode::Checksum => 1,
            DeviceErrorCode::Decrypt => 2,
            DeviceErrorCode::Encrypt => 3,
            DeviceErrorCode::InitSecurity => 4,
            DeviceErrorCode::DhMalloc => 5,
            DeviceErrorCode::DhParam => 6,
            DeviceErrorCode::ReadParam => 7,
            DeviceErrorCode::Unknown(value) => value,
        }
    }

    /// Decodes an error report payload (first byte is the code).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        payload
            .first()
            .map(|&code| DeviceErrorCode::from(code))
            .ok_or_else(|| ProtocolError::MalformedFrame("empty device error report".to_string()))
    }
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorCode::Sequence => write!(f, "sequence error"),
            DeviceErrorCode::Checksum => write!(f, "checksum error"),
            DeviceErrorCode::Decrypt => write!(f, "decrypt error"),
            DeviceErrorCode::Encrypt => write!(f, "encrypt error"),
            DeviceErrorCode::InitSecurity => write!(f, "security init error"),
            DeviceErrorCode::DhMalloc => write!(f, "key agreement allocation error"),
            DeviceErrorCode::DhParam => write!(f, "key agreement parameter error"),
            DeviceErrorCode::ReadParam => write!(f, "parameter read error"),
            DeviceErrorCode::Unknown(code) => write!(f, "unknown error {:#04x}", code),
        }
    }
}

/// One access point from a scan list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i8,
}

/// A decoded scan list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiList {
    /// Networks in the order the device reported them.
    pub networks: Vec<WifiNetwork>,
    /// Set when a malformed entry cut the list short.
    pub truncated: bool,
}

impl WifiList {
    /// Decodes `{len, rssi, ssid[len - 1]}` entries until the buffer is used up.
    ///
    /// An entry whose declared length overruns the buffer (or is zero) ends
    /// the list with `truncated` set. Entries whose SSID is not UTF-8 are
    /// skipped.
    pub fn parse(payload: &[u8]) -> Self {
        let mut list = WifiList::default();
        let mut index = 0;

        while index < payload.len() {
            let len = payload[index] as usize;
            let end = index + 1 + len;
            if len == 0 || end > payload.len() {
                warn!(
                    offset = index,
                    declared = len,
                    available = payload.len() - index - 1,
                    "wifi list entry overruns payload, truncating"
                );
                list.truncated = true;
                break;
            }

            let rssi = payload[index + 1] as i8;
            match std::str::from_utf8(&payload[index + 2..end]) {
                Ok(ssid) => list.networks.push(WifiNetwork {
                    ssid: ssid.to_string(),
                    rssi,
                }),
                Err(_) => warn!(offset = index, "skipping wifi list entry with non UTF-8 SSID"),
            }
            index = end;
        }

        list
    }
}

/// Device Wi-Fi status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Current operating mode.
    pub opmode: OpMode,
    /// Station connection state (0 means connected).
    pub station_state: u8,
    /// Number of stations attached to the soft AP.
    pub softap_connections: u8,
    /// BSSID of the AP the station is connected to.
    pub bssid: Option<[u8; 6]>,
    /// SSID of the AP the station is connected to.
    pub ssid: Option<String>,
}

impl DeviceInfo {
    /// Decodes a status report: three fixed bytes followed by
    /// `{subtype, len, value}` entries.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 3 {
            return Err(ProtocolError::MalformedFrame(format!(
                "wifi status report needs 3 bytes, have {}",
                payload.len()
            )));
        }

        let mut info = DeviceInfo {
            opmode: OpMode::from(payload[0]),
            station_state: payload[1],
            softap_connections: payload[2],
            bssid: None,
            ssid: None,
        };

        let mut rest = &payload[3..];
        while rest.len() >= 2 {
            let subtype = rest[0];
            let len = rest[1] as usize;
            let Some(value) = rest.get(2..2 + len) else {
                warn!(subtype, declared = len, "wifi status entry overruns payload");
                break;
            };

            match subtype {
                data::STA_BSSID if len == 6 => {
                    let mut bssid = [0u8; 6];
                    bssid.copy_from_slice(value);
                    info.bssid = Some(bssid);
                }
                data::STA_SSID => {
                    info.ssid = Some(String::from_utf8_lossy(value).into_owned());
                }
                _ => {}
            }
            rest = &rest[2 + len..];
        }

        Ok(info)
    }

    /// Returns whether the station interface reports a connection.
    pub fn is_station_connected(&self) -> bool {
        self.station_state == 0
    }

    /// Formats the BSSID as colon separated hex.
    pub fn bssid_string(&self) -> Option<String> {
        self.bssid.map(|b| {
            b.iter()
                .map(|byte| format!("{:02x}", byte))
                .collect::<Vec<_>>()
                .join(":")
        })
    }
}

/// Firmware protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl Version {
    /// Decodes a version reply.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            [major, minor, ..] => Ok(Self {
                major: *major,
                minor: *minor,
            }),
            _ => Err(ProtocolError::MalformedFrame(format!(
                "version reply needs 2 bytes, have {}",
                payload.len()
            ))),
        }
    }
}

/// Protection applied to one class of outbound frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSecurity {
    /// Append a CRC16 trailer.
    pub checksum: bool,
    /// Encrypt the payload.
    pub encrypt: bool,
}

impl FrameSecurity {
    fn nibble(self) -> u8 {
        (self.checksum as u8) | ((self.encrypt as u8) << 1)
    }
}

/// Security mode announced to the device once the key is established.
///
/// The announcement byte holds the control-frame policy in its high nibble
/// and the data-frame policy in its low nibble (bit 0 checksum, bit 1
/// encryption).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityMode {
    /// Policy for control frames.
    pub control: FrameSecurity,
    /// Policy for data frames.
    pub data: FrameSecurity,
}

impl Default for SecurityMode {
    fn default() -> Self {
        Self {
            control: FrameSecurity::default(),
            data: FrameSecurity {
                checksum: true,
                encrypt: true,
            },
        }
    }
}

impl SecurityMode {
    /// Returns the announcement payload byte.
    pub fn as_byte(self) -> u8 {
        (self.control.nibble() << 4) | self.data.nibble()
    }

    /// Returns the policy for frames of `frame_type`.
    pub fn for_frame(self, frame_type: FrameType) -> FrameSecurity {
        match frame_type {
            FrameType::Control => self.control,
            _ => self.data,
        }
    }
}

/// Events produced while processing inbound frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session key is established; the session is secured.
    NegotiationComplete,
    /// A Wi-Fi scan list arrived.
    WifiList(WifiList),
    /// The device reported an error.
    DeviceError(DeviceErrorCode),
    /// The device reported its Wi-Fi status.
    DeviceInfo(DeviceInfo),
    /// The device replied with its protocol version.
    Version(Version),
    /// The device sent application-defined data.
    CustomData(Vec<u8>),
    /// The device acknowledged the frame with this sequence number.
    Ack(u8),
    /// A valid frame with no handler arrived.
    UnhandledFrame {
        /// Frame type.
        frame_type: FrameType,
        /// Frame subtype.
        subtype: u8,
    },
    /// An inbound frame was dropped; the session continues.
    FrameDropped {
        /// Why the frame was dropped.
        error: ProtocolError,
    },
    /// Cipher state was lost; the session went back to idle.
    SessionReset {
        /// What forced the reset.
        error: ProtocolError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wifi_list_single_entry() {
        let list = WifiList::parse(&[0x04, 0xEC, 0x41, 0x42, 0x43]);
        assert_eq!(
            list.networks,
            vec![WifiNetwork {
                ssid: "ABC".to_string(),
                rssi: -20,
            }]
        );
        assert!(!list.truncated);
    }

    #[test]
    fn test_wifi_list_multiple_entries() {
        let mut payload = vec![0x05, 0xC4];
        payload.extend_from_slice(b"home");
        payload.extend_from_slice(&[0x01, 0xB0]);
        payload.extend_from_slice(&[0x06, 0xD8]);
        payload.extend_from_slice(b"guest");

        let list = WifiList::parse(&payload);
        assert_eq!(list.networks.len(), 3);
        assert_eq!(list.networks[0].ssid, "home");
        assert_eq!(list.networks[0].rssi, -60);
        assert_eq!(list.networks[1].ssid, "");
        assert_eq!(list.networks[1].rssi, -80);
        assert_eq!(list.networks[2].ssid, "guest");
        assert!(!list.truncated);
    }

    #[test]
    fn test_wifi_list_truncates_on_overrun() {
        let payload = [0x04, 0xEC, 0x41, 0x42, 0x43, 0x09, 0xD0, 0x58];
        let list = WifiList::parse(&payload);
        assert_eq!(list.networks.len(), 1);
        assert!(list.truncated);
    }

    #[test]
    fn test_wifi_list_length_counts_rssi_byte() {
        // A length of 3 covers the RSSI byte and two SSID bytes; the
        // trailing byte is then read as an overrunning length.
        let list = WifiList::parse(&[0x03, 0xEC, 0x41, 0x42, 0x43]);
        assert_eq!(list.networks.len(), 1);
        assert_eq!(list.networks[0].ssid, "AB");
        assert!(list.truncated);
    }

    #[test]
    fn test_wifi_list_zero_length_entry_truncates() {
        let list = WifiList::parse(&[0x00, 0x03, 0xEC, 0x41, 0x42]);
        assert!(list.networks.is_empty());
        assert!(list.truncated);
    }

    #[test]
    fn test_wifi_list_skips_invalid_utf8() {
        let payload = [0x03, 0xEC, 0xFF, 0xFE, 0x02, 0xEC, 0x5A];
        let list = WifiList::parse(&payload);
        assert_eq!(list.networks.len(), 1);
        assert_eq!(list.networks[0].ssid, "Z");
        assert!(!list.truncated);
    }

    #[test]
    fn test_wifi_list_empty() {
        assert_eq!(WifiList::parse(&[]), WifiList::default());
    }

    #[test]
    fn test_device_info_fixed_fields_only() {
        let info = DeviceInfo::parse(&[0x01, 0x00, 0x02]).unwrap();
        assert_eq!(info.opmode, OpMode::Station);
        assert!(info.is_station_connected());
        assert_eq!(info.softap_connections, 2);
        assert_eq!(info.bssid, None);
        assert_eq!(info.ssid, None);
    }

    #[test]
    fn test_device_info_with_bssid_and_ssid() {
        let mut payload = vec![0x01, 0x00, 0x00];
        payload.extend_from_slice(&[0x01, 0x06, 0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
        payload.extend_from_slice(&[0x02, 0x04]);
        payload.extend_from_slice(b"home");

        let info = DeviceInfo::parse(&payload).unwrap();
        assert_eq!(info.bssid_string().as_deref(), Some("aa:bb:cc:01:02:03"));
        assert_eq!(info.ssid.as_deref(), Some("home"));
    }

    #[test]
    fn test_device_info_stops_at_overrun() {
        let payload = [0x01, 0x01, 0x00, 0x02, 0x09, b'x'];
        let info = DeviceInfo::parse(&payload).unwrap();
        assert!(!info.is_station_connected());
        assert_eq!(info.ssid, None);
    }

    #[test]
    fn test_device_info_too_short() {
        assert!(matches!(
            DeviceInfo::parse(&[0x01, 0x00]),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DeviceErrorCode::parse(&[0x02]).unwrap(), DeviceErrorCode::Decrypt);
        assert_eq!(DeviceErrorCode::parse(&[0x07]).unwrap(), DeviceErrorCode::ReadParam);
        assert_eq!(
            DeviceErrorCode::parse(&[0x42]).unwrap(),
            DeviceErrorCode::Unknown(0x42)
        );
        assert!(DeviceErrorCode::parse(&[]).is_err());
        assert_eq!(DeviceErrorCode::DhParam.to_string(), "key agreement parameter error");
        assert_eq!(DeviceErrorCode::DhParam.as_byte(), 6);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(
            Version::parse(&[0x01, 0x03]).unwrap(),
            Version { major: 1, minor: 3 }
        );
        assert!(Version::parse(&[0x01]).is_err());
    }

    #[test]
    fn test_opmode_roundtrip() {
        for byte in 0..=4u8 {
            assert_eq!(OpMode::from(byte).as_byte(), byte);
        }
        assert_eq!(OpMode::from(4), OpMode::Unknown(4));
    }

    #[test]
    fn test_default_security_mode_byte() {
        assert_eq!(SecurityMode::default().as_byte(), 0x03);
    }

    #[test]
    fn test_security_mode_nibbles() {
        let mode = SecurityMode {
            control: FrameSecurity {
                checksum: true,
                encrypt: false,
            },
            data: FrameSecurity {
                checksum: false,
                encrypt: true,
            },
        };
        assert_eq!(mode.as_byte(), 0x12);
        assert!(mode.for_frame(FrameType::Control).checksum);
        assert!(mode.for_frame(FrameType::Data).encrypt);
    }
}
