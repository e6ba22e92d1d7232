//! The U2FHID transport: channel allocation, framing and the
//! command/response state machine for a single token session.
//!
//! A [`U2FHidToken`] owns one open HID connection. It allocates a channel via
//! the INIT handshake on the broadcast channel, then carries PING, MSG, WINK
//! and LOCK exchanges over that channel, fragmenting and reassembling
//! messages per [`framing`].
//!
//! Sessions are exclusive: no two commands may be in flight at once, which
//! the `&mut self` receivers enforce.
pub mod framing;
pub mod responses;

use std::time::Duration;

use openssl::rand::rand_bytes;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::hid::{HidDevice, HidSendReportBytes};
use crate::usb::framing::{FrameAssembler, FrameIterator, U2FHidFrame, TYPE_INIT};
use crate::usb::responses::{DeviceError, InitResponse};

pub const U2FHID_PING: u8 = TYPE_INIT | 0x01;
pub const U2FHID_MSG: u8 = TYPE_INIT | 0x03;
pub const U2FHID_LOCK: u8 = TYPE_INIT | 0x04;
pub const U2FHID_INIT: u8 = TYPE_INIT | 0x06;
pub const U2FHID_WINK: u8 = TYPE_INIT | 0x08;
pub const U2FHID_ERROR: u8 = TYPE_INIT | 0x3f;

/// The reserved channel that carries the INIT handshake.
pub const CID_BROADCAST: u32 = 0xffff_ffff;

/// Token supports the WINK command.
pub const CAPABILITY_WINK: u8 = 0x01;
/// Token supports the LOCK command.
pub const CAPABILITY_LOCK: u8 = 0x02;

const INIT_NONCE_SIZE: usize = 8;
/// Pause before resending INIT after a reply meant for another host process.
const INIT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Longest channel reservation a token accepts.
const LOCK_MAX_SECONDS: u8 = 10;

/// An open U2FHID session with one token.
#[derive(Debug)]
pub struct U2FHidToken<D: HidDevice> {
    device: Option<D>,
    cid: u32,
    protocol_version: u8,
    device_version: String,
    capabilities: u8,
    product_name: Option<&'static str>,
}

impl<D: HidDevice> U2FHidToken<D> {
    /// Opens a session by running the INIT handshake.
    ///
    /// Returns `Ok(None)` when the token cannot allocate a channel right now
    /// (HID timeout, busy channel, interrupted IO); the discovery layer polls
    /// again on that outcome. Protocol violations are hard errors.
    pub async fn open(device: D, product_name: Option<&'static str>) -> Result<Option<Self>> {
        let mut token = U2FHidToken {
            device: Some(device),
            cid: CID_BROADCAST,
            protocol_version: 0,
            device_version: String::new(),
            capabilities: 0,
            product_name,
        };
        match token.init().await {
            Ok(()) => {
                debug!(
                    "opened {} on channel {:08x}",
                    token.product_name.unwrap_or("unknown token"),
                    token.cid
                );
                Ok(Some(token))
            }
            Err(e) if e.is_transient() => {
                trace!("INIT did not complete: {e}");
                token.close();
                Ok(None)
            }
            Err(e) => {
                token.close();
                Err(e)
            }
        }
    }

    /// Runs the INIT handshake on the broadcast channel, adopting the
    /// allocated channel id on success.
    ///
    /// Replies carrying a foreign nonce belong to concurrent host processes
    /// on the same token; they are discarded and INIT is resent after a
    /// short delay.
    async fn init(&mut self) -> Result<()> {
        let mut nonce = [0; INIT_NONCE_SIZE];
        rand_bytes(&mut nonce)
            .map_err(|e| Error::InterruptedIo(format!("could not draw INIT nonce: {e}")))?;

        loop {
            self.send(&U2FHidFrame::new(
                CID_BROADCAST,
                U2FHID_INIT,
                nonce.to_vec(),
            )?)
            .await?;
            let frame = self.recv(U2FHID_INIT).await?;
            let resp = InitResponse::try_from(frame.data.as_slice())?;
            if resp.nonce != nonce {
                trace!("INIT reply for another host process, resending");
                sleep(INIT_RETRY_DELAY).await;
                continue;
            }
            if resp.cid == CID_BROADCAST {
                return Err(Error::ProtocolViolation(
                    "token allocated the broadcast channel",
                ));
            }
            self.cid = resp.cid;
            self.protocol_version = resp.protocol_version;
            self.device_version = resp.device_version();
            self.capabilities = resp.capabilities;
            return Ok(());
        }
    }

    fn device(&mut self) -> Result<&mut D> {
        self.device
            .as_mut()
            .ok_or_else(|| Error::InterruptedIo("session is closed".to_string()))
    }

    /// Sends one logical message, fragmenting it across as many reports as
    /// needed.
    async fn send(&mut self, frame: &U2FHidFrame) -> Result<()> {
        let frames: Vec<HidSendReportBytes> = FrameIterator::new(frame)?
            .map(|f| HidSendReportBytes::from(&f))
            .collect();
        let device = self.device()?;
        for report in frames {
            trace!(">>> {}", hex::encode(&report[1..]));
            device.write(report).await?;
        }
        Ok(())
    }

    /// Receives one logical message for this session's channel.
    ///
    /// Frames on other channels are dropped. The reply's command byte must
    /// echo `expected`, or be an ERROR frame, which is decoded and raised.
    async fn recv(&mut self, expected: u8) -> Result<U2FHidFrame> {
        let mut assembler = FrameAssembler::new(self.cid);
        let device = self.device()?;
        let frame = loop {
            let report = device.read().await?;
            trace!("<<< {}", hex::encode(report));
            if let Some(frame) = assembler.push(&report)? {
                break frame;
            }
        };
        if frame.cmd == U2FHID_ERROR {
            let e = DeviceError::from(frame.data.as_slice());
            trace!(?e, "token reported an error");
            return Err(e.into());
        }
        if frame.cmd != expected {
            return Err(Error::ProtocolViolation(
                "reply command does not echo the request",
            ));
        }
        Ok(frame)
    }

    async fn transmit(&mut self, cmd: u8, data: &[u8]) -> Result<Vec<u8>> {
        let frame = U2FHidFrame::new(self.cid, cmd, data.to_vec())?;
        self.send(&frame).await?;
        Ok(self.recv(cmd).await?.data)
    }

    /// Echoes `data` through the token, for liveness checks.
    pub async fn ping(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.transmit(U2FHID_PING, data).await
    }

    /// Sends a raw U2F APDU. The reply includes the trailing status word,
    /// which [`crate::apdu::split_response`] separates.
    pub async fn msg(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        self.transmit(U2FHID_MSG, apdu).await
    }

    /// Asks the token to identify itself (LED flash or similar).
    pub async fn wink(&mut self) -> Result<()> {
        if !self.supports_wink() {
            return Err(Error::UnsupportedOperation(None));
        }
        self.transmit(U2FHID_WINK, &[]).await.map(|_| ())
    }

    /// Reserves the channel for `seconds` (1 through 10); `0` releases an
    /// existing reservation.
    pub async fn lock(&mut self, seconds: u8) -> Result<()> {
        if !self.supports_lock() {
            return Err(Error::UnsupportedOperation(None));
        }
        if seconds > LOCK_MAX_SECONDS {
            return Err(Error::UnsupportedOperation(None));
        }
        self.transmit(U2FHID_LOCK, &[seconds]).await.map(|_| ())
    }

    /// The channel id allocated by INIT.
    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// U2FHID protocol version reported by INIT.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Hardware version reported by INIT, as a dotted triple.
    pub fn device_version(&self) -> &str {
        &self.device_version
    }

    pub fn capabilities(&self) -> u8 {
        self.capabilities
    }

    pub fn supports_wink(&self) -> bool {
        self.capabilities & CAPABILITY_WINK != 0
    }

    pub fn supports_lock(&self) -> bool {
        self.capabilities & CAPABILITY_LOCK != 0
    }

    /// Display name from the known-device table, if any.
    pub fn product_name(&self) -> Option<&'static str> {
        self.product_name
    }

    /// Releases the HID handle. Idempotent; dropping the session has the
    /// same effect.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            trace!("closed session on channel {:08x}", self.cid);
        }
    }
}
