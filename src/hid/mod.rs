//! The OS USB HID seam the transport is built on.
//!
//! The traits here describe exactly what the U2FHID transport needs from the
//! operating system: enumerate FIDO-usage HID devices, open them, and move
//! 64-byte reports with a bounded wait. [`backend`] provides the [hidapi]
//! implementation used in production; tests substitute scripted devices.
//!
//! [hidapi]: https://docs.rs/hidapi
pub mod backend;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

// u2f_hid.h
pub const FIDO_USAGE_PAGE: u16 = 0xf1d0;
pub const FIDO_USAGE_U2FHID: u16 = 0x01;
pub const HID_RPT_SIZE: usize = 64;
pub const HID_RPT_SEND_SIZE: usize = HID_RPT_SIZE + 1;

/// Per-report read/write deadline at the OS layer.
pub const HID_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// One HID input report.
pub type HidReportBytes = [u8; HID_RPT_SIZE];
/// One HID output report, prefixed with the report id byte.
pub type HidSendReportBytes = [u8; HID_RPT_SEND_SIZE];

/// Enumerates the FIDO authenticators currently visible to the OS.
#[async_trait]
pub trait HidDeviceManager: Sized {
    type Device: HidDevice;
    type Info: HidDeviceInfo<Device = Self::Device>;

    fn new() -> Result<Self>;

    /// Lists currently-connected FIDO authenticators (usage page `0xF1D0`,
    /// usage `0x01`).
    async fn get_devices(&self) -> Result<Vec<Self::Info>>;
}

/// An enumerated-but-unopened FIDO authenticator.
#[async_trait]
pub trait HidDeviceInfo: Clone + Debug + Send {
    type Device: HidDevice;

    fn vendor_id(&self) -> u16;
    fn product_id(&self) -> u16;

    /// Opens a connection to this device.
    async fn open(self) -> Result<Self::Device>;
}

/// An open FIDO authenticator HID connection.
///
/// Dropping the device releases the OS handle.
#[async_trait]
pub trait HidDevice: Debug + Send {
    /// Reads one 64-byte report, waiting at most [`HID_IO_TIMEOUT`].
    ///
    /// Exceeding the deadline fails with
    /// [`Error::InterruptedIo`][crate::Error::InterruptedIo].
    async fn read(&mut self) -> Result<HidReportBytes>;

    /// Writes one report, waiting at most [`HID_IO_TIMEOUT`].
    async fn write(&mut self, data: HidSendReportBytes) -> Result<()>;
}
