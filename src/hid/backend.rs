//! [hidapi]-backed implementation of the [crate::hid] traits.
//!
//! hidapi's calls are blocking, but every one of them is bounded by
//! [`HID_IO_TIMEOUT`], so they are issued inline rather than through a
//! blocking pool.
//!
//! [hidapi]: https://docs.rs/hidapi
use std::ffi::CString;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hidapi::HidApi;

use crate::error::{Error, Result};
use crate::hid::{
    HidDevice, HidDeviceInfo, HidDeviceManager, HidReportBytes, HidSendReportBytes,
    FIDO_USAGE_PAGE, FIDO_USAGE_U2FHID, HID_IO_TIMEOUT, HID_RPT_SIZE,
};

/// Frames shorter than a continuation header carry nothing usable.
const MIN_REPORT_SIZE: usize = 5;

pub struct HidApiDeviceManager {
    api: Arc<Mutex<HidApi>>,
}

impl fmt::Debug for HidApiDeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidApiDeviceManager").finish()
    }
}

#[async_trait]
impl HidDeviceManager for HidApiDeviceManager {
    type Device = HidApiDevice;
    type Info = HidApiDeviceInfo;

    fn new() -> Result<Self> {
        let api = HidApi::new()?;
        Ok(HidApiDeviceManager {
            api: Arc::new(Mutex::new(api)),
        })
    }

    async fn get_devices(&self) -> Result<Vec<HidApiDeviceInfo>> {
        let mut api = self
            .api
            .lock()
            .map_err(|_| Error::InterruptedIo("HID enumeration lock poisoned".to_string()))?;
        api.refresh_devices()?;
        Ok(api
            .device_list()
            .filter(|d| d.usage_page() == FIDO_USAGE_PAGE && d.usage() == FIDO_USAGE_U2FHID)
            .map(|d| {
                trace!(?d, "enumerated FIDO device");
                HidApiDeviceInfo {
                    api: self.api.clone(),
                    path: d.path().to_owned(),
                    vendor_id: d.vendor_id(),
                    product_id: d.product_id(),
                }
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct HidApiDeviceInfo {
    api: Arc<Mutex<HidApi>>,
    path: CString,
    vendor_id: u16,
    product_id: u16,
}

impl fmt::Debug for HidApiDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidApiDeviceInfo")
            .field("path", &self.path)
            .field("vendor_id", &self.vendor_id)
            .field("product_id", &self.product_id)
            .finish()
    }
}

#[async_trait]
impl HidDeviceInfo for HidApiDeviceInfo {
    type Device = HidApiDevice;

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    async fn open(self) -> Result<HidApiDevice> {
        let device = {
            let api = self
                .api
                .lock()
                .map_err(|_| Error::InterruptedIo("HID enumeration lock poisoned".to_string()))?;
            api.open_path(&self.path)?
        };
        Ok(HidApiDevice { device })
    }
}

pub struct HidApiDevice {
    device: hidapi::HidDevice,
}

impl fmt::Debug for HidApiDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidApiDevice").finish()
    }
}

#[async_trait]
impl HidDevice for HidApiDevice {
    async fn read(&mut self) -> Result<HidReportBytes> {
        let mut buf = [0; HID_RPT_SIZE];
        loop {
            let len = self
                .device
                .read_timeout(&mut buf, HID_IO_TIMEOUT.as_millis() as i32)?;
            if len == 0 {
                return Err(Error::InterruptedIo("HID read timed out".to_string()));
            }
            if len < MIN_REPORT_SIZE {
                trace!("discarding runt report ({len} bytes)");
                continue;
            }
            // Shorter-than-64-byte reports leave the zeroed tail as padding.
            return Ok(buf);
        }
    }

    async fn write(&mut self, data: HidSendReportBytes) -> Result<()> {
        let len = self.device.write(&data)?;
        // Some platforms count the report id byte, some don't.
        if len < HID_RPT_SIZE {
            return Err(Error::InterruptedIo(format!(
                "incomplete HID write: wrote {len} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }
}
