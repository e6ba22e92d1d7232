//! U2F raw message constants and the request/response objects exchanged with
//! a relying party.
//!
//! The object shapes follow the FIDO U2F JavaScript API: requests are
//! produced by the server ("started" requests carrying a challenge), and
//! responses carry websafe-base64 blobs the server verifies.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The only U2F protocol version this library supports.
pub const U2F_VERSION_STRING: &str = "U2F_V2";

// U2F raw message instructions.
pub const INS_REGISTER: u8 = 0x01;
pub const INS_AUTHENTICATE: u8 = 0x02;
pub const INS_VERSION: u8 = 0x03;

// Authenticate control byte (P1).
pub const P1_CHECK_ONLY: u8 = 0x07;
pub const P1_ENFORCE_PRESENCE_AND_SIGN: u8 = 0x03;
pub const P1_DONT_ENFORCE_PRESENCE_AND_SIGN: u8 = 0x08;

pub const CLIENT_DATA_TYP_REGISTER: &str = "navigator.id.finishEnrollment";
pub const CLIENT_DATA_TYP_AUTHENTICATE: &str = "navigator.id.getAssertion";

/// Key handles must fit their length in one octet of the authenticate
/// message.
pub const MAX_KEY_HANDLE_SIZE: usize = 255;

/// The clientData object the host signs into each request, binding the
/// server's challenge to the caller's origin.
#[derive(Debug, Clone, Serialize)]
pub struct ClientData<'a> {
    pub typ: &'static str,
    pub challenge: &'a str,
    pub origin: Option<&'a str>,
}

impl ClientData<'_> {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|_| Error::ProtocolViolation("clientData is not serialisable"))
    }
}

/// A server-produced registration challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRegistration {
    pub app_id: String,
    pub challenge: String,
    pub version: String,
}

/// A server-produced authentication challenge for one registered key handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAuthentication {
    pub app_id: String,
    pub challenge: String,
    /// Websafe-base64 key handle from the matching registration.
    pub key_handle: String,
    pub version: String,
}

/// A completed registration, ready to return to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub registration_data: String,
    pub client_data: String,
}

/// A completed assertion, ready to return to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub client_data: String,
    pub signature_data: String,
    pub key_handle: String,
}

pub fn websafe_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn websafe_decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|_| Error::ProtocolViolation("value is not websafe base64"))
}
