//! The U2F protocol implementation on top of a [`U2FHidToken`] session:
//! registration, authentication, key-handle probing and version discovery.
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::apdu::{self, SW_INS_NOT_SUPPORTED, SW_NO_ERROR};
use crate::error::{Error, Result};
use crate::hid::HidDevice;
use crate::proto::{
    AuthenticateResponse, ClientData, RegisterResponse, StartedAuthentication,
    StartedRegistration, websafe_decode, websafe_encode, CLIENT_DATA_TYP_AUTHENTICATE,
    CLIENT_DATA_TYP_REGISTER, INS_AUTHENTICATE, INS_REGISTER, INS_VERSION, MAX_KEY_HANDLE_SIZE,
    P1_CHECK_ONLY, P1_DONT_ENFORCE_PRESENCE_AND_SIGN, P1_ENFORCE_PRESENCE_AND_SIGN,
    U2F_VERSION_STRING,
};
use crate::usb::U2FHidToken;
use crate::util::compute_sha256;

/// Poll interval while the token waits for a touch.
const PRESENCE_POLL: Duration = Duration::from_millis(100);

/// U2F operations against one open token session.
///
/// `register` and `authenticate` poll through the token's user-presence
/// prompt internally; every other failure surfaces as an [`Error`].
#[derive(Debug)]
pub struct U2FAuthenticator<D: HidDevice> {
    token: U2FHidToken<D>,
}

impl<D: HidDevice> U2FAuthenticator<D> {
    pub fn new(token: U2FHidToken<D>) -> Self {
        U2FAuthenticator { token }
    }

    /// The underlying session, for transport commands like
    /// [`wink`][U2FHidToken::wink] and [`lock`][U2FHidToken::lock].
    pub fn token(&mut self) -> &mut U2FHidToken<D> {
        &mut self.token
    }

    pub fn close(&mut self) {
        self.token.close();
    }

    /// One APDU exchange: wrap, transmit, split, map the status word.
    async fn apdu(&mut self, ins: u8, p1: u8, data: &[u8]) -> Result<Vec<u8>> {
        let req = apdu::build_extended(ins, p1, 0x00, data)?;
        let resp = self.token.msg(&req).await?;
        let (payload, status) = apdu::split_response(&resp)?;
        if status == SW_NO_ERROR {
            Ok(payload.to_vec())
        } else {
            Err(apdu::status_to_error(status))
        }
    }

    /// Repeats an APDU while the token reports user-presence-required.
    /// Returns `Ok(None)` if `cancel` fires during a wait.
    async fn apdu_with_presence(
        &mut self,
        ins: u8,
        p1: u8,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        loop {
            match self.apdu(ins, p1, data).await {
                Ok(payload) => return Ok(Some(payload)),
                Err(Error::UserPresenceRequired) => {
                    trace!("waiting for user presence");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = sleep(PRESENCE_POLL) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Queries the token's U2F version string. Legacy tokens that predate
    /// the version instruction report as `"v0"`.
    pub async fn get_version(&mut self) -> Result<String> {
        match self.apdu(INS_VERSION, 0x00, &[]).await {
            Ok(payload) => String::from_utf8(payload)
                .map_err(|_| Error::ProtocolViolation("version string is not ASCII")),
            Err(Error::UnsupportedOperation(Some(SW_INS_NOT_SUPPORTED))) => Ok("v0".to_string()),
            Err(e) => Err(e),
        }
    }

    /// Registers a new credential for `request`, polling until the user
    /// touches the token. Returns `Ok(None)` if cancelled first.
    pub async fn register(
        &mut self,
        request: &StartedRegistration,
        facet: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<RegisterResponse>> {
        if request.version != U2F_VERSION_STRING {
            return Err(Error::UnsupportedOperation(None));
        }
        let client_data = ClientData {
            typ: CLIENT_DATA_TYP_REGISTER,
            challenge: &request.challenge,
            origin: facet,
        }
        .to_json()?;

        let mut msg = Vec::with_capacity(64);
        msg.extend_from_slice(&compute_sha256(client_data.as_bytes()));
        msg.extend_from_slice(&compute_sha256(request.app_id.as_bytes()));

        let registration_data = match self
            .apdu_with_presence(INS_REGISTER, 0x00, &msg, cancel)
            .await?
        {
            Some(d) => d,
            None => return Ok(None),
        };
        Ok(Some(RegisterResponse {
            registration_data: websafe_encode(&registration_data),
            client_data: websafe_encode(client_data.as_bytes()),
        }))
    }

    /// Produces an assertion for `request`, polling until the user touches
    /// the token. Returns `Ok(None)` if cancelled first.
    ///
    /// With `enforce_user_presence` unset, tokens that refuse to sign
    /// without a touch fail with
    /// [`Error::UnsupportedOperation`].
    pub async fn authenticate(
        &mut self,
        request: &StartedAuthentication,
        enforce_user_presence: bool,
        facet: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<AuthenticateResponse>> {
        if request.version != U2F_VERSION_STRING {
            return Err(Error::UnsupportedOperation(None));
        }
        let client_data = ClientData {
            typ: CLIENT_DATA_TYP_AUTHENTICATE,
            challenge: &request.challenge,
            origin: facet,
        }
        .to_json()?;

        let msg = authenticate_message(&client_data, request)?;
        let p1 = if enforce_user_presence {
            P1_ENFORCE_PRESENCE_AND_SIGN
        } else {
            P1_DONT_ENFORCE_PRESENCE_AND_SIGN
        };

        let signature_data = match self
            .apdu_with_presence(INS_AUTHENTICATE, p1, &msg, cancel)
            .await?
        {
            Some(d) => d,
            None => return Ok(None),
        };
        Ok(Some(AuthenticateResponse {
            client_data: websafe_encode(client_data.as_bytes()),
            signature_data: websafe_encode(&signature_data),
            key_handle: request.key_handle.clone(),
        }))
    }

    /// Asks the token whether `request.key_handle` is one of its own,
    /// without signing.
    ///
    /// A check-only authenticate must be refused: user-presence-required
    /// means the handle belongs to this token, invalid-key-handle means it
    /// does not. A token that answers with success is broken.
    pub async fn check_key_handle(&mut self, request: &StartedAuthentication) -> Result<bool> {
        if request.version != U2F_VERSION_STRING {
            return Err(Error::UnsupportedOperation(None));
        }
        let client_data = ClientData {
            typ: CLIENT_DATA_TYP_AUTHENTICATE,
            challenge: &request.challenge,
            origin: None,
        }
        .to_json()?;
        let msg = authenticate_message(&client_data, request)?;

        match self.apdu(INS_AUTHENTICATE, P1_CHECK_ONLY, &msg).await {
            Ok(_) => Err(Error::ProtocolViolation(
                "token accepted a check-only authenticate",
            )),
            Err(Error::UserPresenceRequired) => Ok(true),
            Err(Error::InvalidKeyHandle) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// `challenge_param || application_param || key_handle_len || key_handle`.
fn authenticate_message(client_data: &str, request: &StartedAuthentication) -> Result<Vec<u8>> {
    let key_handle = websafe_decode(&request.key_handle)?;
    if key_handle.len() > MAX_KEY_HANDLE_SIZE {
        return Err(Error::ProtocolViolation("key handle exceeds 255 bytes"));
    }
    let mut msg = Vec::with_capacity(65 + key_handle.len());
    msg.extend_from_slice(&compute_sha256(client_data.as_bytes()));
    msg.extend_from_slice(&compute_sha256(request.app_id.as_bytes()));
    msg.push(key_handle.len() as u8);
    msg.extend_from_slice(&key_handle);
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_message_layout() {
        let request = StartedAuthentication {
            app_id: "https://example.com".to_string(),
            challenge: "test".to_string(),
            key_handle: websafe_encode(&[0x0b; 16]),
            version: U2F_VERSION_STRING.to_string(),
        };
        let msg = authenticate_message("{}", &request).unwrap();
        assert_eq!(msg.len(), 32 + 32 + 1 + 16);
        assert_eq!(msg[..32], compute_sha256(b"{}"));
        assert_eq!(msg[32..64], compute_sha256(b"https://example.com"));
        assert_eq!(msg[64], 16);
        assert_eq!(&msg[65..], &[0x0b; 16]);
    }

    #[test]
    fn oversized_key_handle_rejected() {
        let request = StartedAuthentication {
            app_id: "app".to_string(),
            challenge: "c".to_string(),
            key_handle: websafe_encode(&[0; 256]),
            version: U2F_VERSION_STRING.to_string(),
        };
        assert!(authenticate_message("{}", &request).is_err());
    }
}
