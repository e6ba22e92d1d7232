//! Extended-length APDU construction and response splitting (ISO 7816-4).
//!
//! U2F wraps each instruction in a command APDU carried by a U2FHID `MSG`
//! exchange. Responses terminate in a big-endian two-byte status word.
use crate::error::{Error, Result};

pub const APDU_CLA: u8 = 0x00;

// Response status words.
pub const SW_NO_ERROR: u16 = 0x9000;
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
pub const SW_WRONG_DATA: u16 = 0x6a80;
pub const SW_INCORRECT_P1P2: u16 = 0x6a86;
pub const SW_WRONG_LENGTH: u16 = 0x6700;
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6e00;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6d00;

/// Serialises an extended-length command APDU.
///
/// The Lc field is always present, even for empty data, and Le is always
/// `0x0000` (65536 bytes). Some tokens (HyperFIDO among them) refuse
/// requests without the maximum Le.
pub fn build_extended(ins: u8, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > u16::MAX as usize {
        return Err(Error::ProtocolViolation("APDU data exceeds 65535 bytes"));
    }
    let mut o = Vec::with_capacity(9 + data.len());
    o.extend_from_slice(&[APDU_CLA, ins, p1, p2, 0x00]);
    o.extend_from_slice(&(data.len() as u16).to_be_bytes());
    o.extend_from_slice(data);
    o.extend_from_slice(&[0x00, 0x00]);
    Ok(o)
}

/// Splits a response APDU into its payload and trailing status word.
pub fn split_response(resp: &[u8]) -> Result<(&[u8], u16)> {
    if resp.len() < 2 {
        return Err(Error::ProtocolViolation(
            "APDU response shorter than a status word",
        ));
    }
    let (payload, sw) = resp.split_at(resp.len() - 2);
    Ok((payload, u16::from_be_bytes([sw[0], sw[1]])))
}

/// Maps a non-`SW_NO_ERROR` status word onto the error taxonomy.
pub fn status_to_error(status: u16) -> Error {
    match status {
        SW_CONDITIONS_NOT_SATISFIED => Error::UserPresenceRequired,
        SW_WRONG_DATA => Error::InvalidKeyHandle,
        status => Error::UnsupportedOperation(Some(status)),
    }
}
