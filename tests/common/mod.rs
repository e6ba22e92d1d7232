//! Scripted in-memory HID devices for driving the transport without
//! hardware.
// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use u2f_authenticator_rs::error::{Error, Result};
use u2f_authenticator_rs::hid::{
    HidDevice, HidDeviceInfo, HidDeviceManager, HidReportBytes, HidSendReportBytes,
};
use u2f_authenticator_rs::usb::framing::{FrameIterator, U2FHidFrame};
use u2f_authenticator_rs::usb::{CID_BROADCAST, U2FHID_ERROR, U2FHID_INIT, U2FHID_MSG};

#[derive(Debug, Clone)]
enum Reply {
    /// One raw report handed back as-is.
    Report(HidReportBytes),
    /// INIT reply echoing the nonce of the last INIT written.
    InitOk {
        cid: u32,
        protocol_version: u8,
        version: [u8; 3],
        capabilities: u8,
    },
    /// INIT reply carrying another host's nonce.
    InitForeign { cid: u32 },
}

/// A [`HidDevice`] that replays a pre-built script of replies and logs every
/// report written to it. An exhausted script reads like an OS timeout.
#[derive(Debug)]
pub struct ScriptedDevice {
    replies: VecDeque<Reply>,
    writes: Arc<Mutex<Vec<HidSendReportBytes>>>,
    last_init_nonce: Option<[u8; 8]>,
}

impl Default for ScriptedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDevice {
    pub fn new() -> Self {
        ScriptedDevice {
            replies: VecDeque::new(),
            writes: Arc::new(Mutex::new(Vec::new())),
            last_init_nonce: None,
        }
    }

    /// Shared handle onto the write log, usable after the device is moved
    /// into a session.
    pub fn writes(&self) -> Arc<Mutex<Vec<HidSendReportBytes>>> {
        self.writes.clone()
    }

    /// Queues a whole message, fragmented exactly as a token would send it.
    pub fn push_message(&mut self, cid: u32, cmd: u8, payload: &[u8]) {
        let frame = U2FHidFrame::new(cid, cmd, payload.to_vec()).unwrap();
        for f in FrameIterator::new(&frame).unwrap() {
            let sent = HidSendReportBytes::from(&f);
            self.replies
                .push_back(Reply::Report(sent[1..].try_into().unwrap()));
        }
    }

    pub fn push_init_ok(&mut self, cid: u32, protocol_version: u8, version: [u8; 3], capabilities: u8) {
        self.replies.push_back(Reply::InitOk {
            cid,
            protocol_version,
            version,
            capabilities,
        });
    }

    pub fn push_init_foreign(&mut self, cid: u32) {
        self.replies.push_back(Reply::InitForeign { cid });
    }

    /// Queues an ERROR frame with the given device error code.
    pub fn push_error(&mut self, cid: u32, code: u8) {
        self.push_message(cid, U2FHID_ERROR, &[code]);
    }

    /// Queues an APDU response: payload followed by the status word.
    pub fn push_apdu(&mut self, cid: u32, payload: &[u8], status: u16) {
        let mut d = payload.to_vec();
        d.extend_from_slice(&status.to_be_bytes());
        self.push_message(cid, U2FHID_MSG, &d);
    }

    fn init_report(&self, nonce: [u8; 8], cid: u32, protocol_version: u8, version: [u8; 3], capabilities: u8) -> HidReportBytes {
        let mut payload = Vec::with_capacity(17);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&cid.to_be_bytes());
        payload.push(protocol_version);
        payload.extend_from_slice(&version);
        payload.push(capabilities);

        let frame = U2FHidFrame::new(CID_BROADCAST, U2FHID_INIT, payload).unwrap();
        let sent = HidSendReportBytes::from(&frame);
        sent[1..].try_into().unwrap()
    }
}

#[async_trait]
impl HidDevice for ScriptedDevice {
    async fn read(&mut self) -> Result<HidReportBytes> {
        match self.replies.pop_front() {
            None => Err(Error::InterruptedIo("HID read timed out".to_string())),
            Some(Reply::Report(r)) => Ok(r),
            Some(Reply::InitOk {
                cid,
                protocol_version,
                version,
                capabilities,
            }) => {
                let nonce = self.last_init_nonce.expect("INIT reply queued before any INIT");
                Ok(self.init_report(nonce, cid, protocol_version, version, capabilities))
            }
            Some(Reply::InitForeign { cid }) => {
                Ok(self.init_report([0xee; 8], cid, 2, [1, 0, 0], 0))
            }
        }
    }

    async fn write(&mut self, data: HidSendReportBytes) -> Result<()> {
        // data[0] is the report id, the initial-frame header spans 1..8 and
        // the payload starts at 8.
        if data[5] == U2FHID_INIT {
            self.last_init_nonce = Some(data[8..16].try_into().unwrap());
        }
        self.writes.lock().unwrap().push(data);
        Ok(())
    }
}

/// A manager over a shared queue of scripted devices. Every call to
/// [`HidDeviceManager::get_devices`] reports one info per queued device;
/// opening an info pops the front of the queue.
#[derive(Debug, Clone)]
pub struct ScriptedManager {
    devices: Arc<Mutex<VecDeque<ScriptedDevice>>>,
}

impl ScriptedManager {
    pub fn with_devices(devices: Vec<ScriptedDevice>) -> Self {
        ScriptedManager {
            devices: Arc::new(Mutex::new(devices.into_iter().collect())),
        }
    }

    /// Plugs another device in, visible from the next enumeration pass.
    pub fn add_device(&self, device: ScriptedDevice) {
        self.devices.lock().unwrap().push_back(device);
    }
}

#[async_trait]
impl HidDeviceManager for ScriptedManager {
    type Device = ScriptedDevice;
    type Info = ScriptedInfo;

    fn new() -> Result<Self> {
        Ok(ScriptedManager::with_devices(Vec::new()))
    }

    async fn get_devices(&self) -> Result<Vec<ScriptedInfo>> {
        let n = self.devices.lock().unwrap().len();
        Ok((0..n)
            .map(|_| ScriptedInfo {
                devices: self.devices.clone(),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedInfo {
    devices: Arc<Mutex<VecDeque<ScriptedDevice>>>,
}

#[async_trait]
impl HidDeviceInfo for ScriptedInfo {
    type Device = ScriptedDevice;

    fn vendor_id(&self) -> u16 {
        0x1050
    }

    fn product_id(&self) -> u16 {
        0x0120
    }

    async fn open(self) -> Result<ScriptedDevice> {
        self.devices
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::InterruptedIo("device unplugged".to_string()))
    }
}

/// Splits a logged output report into its header fields and payload.
pub fn parse_write(report: &HidSendReportBytes) -> (u32, u8, u16, &[u8]) {
    let cid = u32::from_be_bytes(report[1..5].try_into().unwrap());
    let cmd = report[5];
    if cmd & 0x80 != 0 {
        let len = u16::from_be_bytes(report[6..8].try_into().unwrap());
        (cid, cmd, len, &report[8..])
    } else {
        (cid, cmd, 0, &report[6..])
    }
}
