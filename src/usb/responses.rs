//! Decoding of U2FHID response payloads: the INIT handshake reply and
//! ERROR frames.
use crate::error::{Error, Result};

/// Reply to an INIT sent on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitResponse {
    /// Echo of the nonce carried in the request. A mismatch means the reply
    /// was meant for a different host process.
    pub nonce: [u8; 8],
    /// The channel identifier allocated to this session.
    pub cid: u32,
    /// U2FHID protocol version (2).
    pub protocol_version: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    /// Capability bits, see [`CAPABILITY_WINK`][crate::usb::CAPABILITY_WINK]
    /// and [`CAPABILITY_LOCK`][crate::usb::CAPABILITY_LOCK].
    pub capabilities: u8,
}

impl InitResponse {
    /// Hardware version as a dotted triple, e.g. `"1.0.2"`.
    pub fn device_version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_build
        )
    }
}

impl TryFrom<&[u8]> for InitResponse {
    type Error = Error;

    fn try_from(d: &[u8]) -> Result<Self> {
        if d.len() < 17 {
            return Err(Error::ProtocolViolation("INIT response shorter than 17 bytes"));
        }
        let nonce = d[..8]
            .try_into()
            .map_err(|_| Error::ProtocolViolation("INIT response shorter than 17 bytes"))?;
        let cid = u32::from_be_bytes(
            d[8..12]
                .try_into()
                .map_err(|_| Error::ProtocolViolation("INIT response shorter than 17 bytes"))?,
        );
        Ok(InitResponse {
            nonce,
            cid,
            protocol_version: d[12],
            version_major: d[13],
            version_minor: d[14],
            version_build: d[15],
            capabilities: d[16],
        })
    }
}

/// Error code carried in the first payload byte of an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    InvalidCommand,
    InvalidParameter,
    InvalidMessageLength,
    InvalidSequenceValue,
    MessageTimeout,
    ChannelBusy,
    Unknown(u8),
}

impl From<u8> for DeviceError {
    fn from(v: u8) -> Self {
        match v {
            0x01 => DeviceError::InvalidCommand,
            0x02 => DeviceError::InvalidParameter,
            0x03 => DeviceError::InvalidMessageLength,
            0x04 => DeviceError::InvalidSequenceValue,
            0x05 => DeviceError::MessageTimeout,
            0x06 => DeviceError::ChannelBusy,
            v => DeviceError::Unknown(v),
        }
    }
}

impl From<&[u8]> for DeviceError {
    fn from(d: &[u8]) -> Self {
        if d.is_empty() {
            DeviceError::Unknown(0)
        } else {
            DeviceError::from(d[0])
        }
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::MessageTimeout => Error::Timeout,
            DeviceError::ChannelBusy => Error::TokenBusy,
            DeviceError::InvalidCommand => Error::ProtocolViolation("token rejected the command"),
            DeviceError::InvalidParameter => {
                Error::ProtocolViolation("token rejected a command parameter")
            }
            DeviceError::InvalidMessageLength => {
                Error::ProtocolViolation("token rejected the message length")
            }
            DeviceError::InvalidSequenceValue => {
                Error::ProtocolViolation("token rejected the frame sequence")
            }
            DeviceError::Unknown(_) => Error::ProtocolViolation("token reported an unknown error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_response_parse() {
        let d: &[u8] = &[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // nonce
            0xaa, 0xbb, 0xcc, 0xdd, // cid
            0x02, // protocol version
            0x01, 0x00, 0x02, // device version
            0x01, // capabilities
        ];
        let r = InitResponse::try_from(d).unwrap();
        assert_eq!(r.nonce, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(r.cid, 0xaabbccdd);
        assert_eq!(r.protocol_version, 2);
        assert_eq!(r.device_version(), "1.0.2");
        assert_eq!(r.capabilities, 0x01);
    }

    #[test]
    fn init_response_too_short() {
        assert!(InitResponse::try_from(&[0u8; 16][..]).is_err());
    }

    #[test]
    fn device_error_mapping() {
        assert_eq!(Error::from(DeviceError::from(0x05u8)), Error::Timeout);
        assert_eq!(Error::from(DeviceError::from(0x06u8)), Error::TokenBusy);
        assert!(matches!(
            Error::from(DeviceError::from(0x04u8)),
            Error::ProtocolViolation(_)
        ));
        assert!(matches!(
            Error::from(DeviceError::from(0x7fu8)),
            Error::ProtocolViolation(_)
        ));
    }

    #[test]
    fn device_error_from_empty_payload() {
        assert_eq!(DeviceError::from(&[][..]), DeviceError::Unknown(0));
    }
}
