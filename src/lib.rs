//! u2f-authenticator-rs is a library for interfacing with FIDO U2F (CTAP 1)
//! hardware authenticators over USB HID.
//!
//! This performs the actions a client application (such as a web browser)
//! takes to register and assert U2F credentials against a relying party:
//! discovering plugged tokens, allocating a U2FHID channel, exchanging
//! framed APDUs, and riding out touch prompts and device hot-plug.
//!
//! ## Layout
//!
//! * [`hid`] is the seam to the operating system: enumerate FIDO-usage HID
//!   devices and move 64-byte reports. [`hid::backend`] implements it with
//!   [hidapi]; tests substitute scripted devices.
//! * [`usb`] is the U2FHID transport: the INIT channel handshake, message
//!   fragmentation and reassembly, and the PING / MSG / WINK / LOCK
//!   commands.
//! * [`u2f`] builds the U2F operations on top of a session: `register`,
//!   `authenticate`, `check_key_handle` and `get_version`, including the
//!   user-presence polling loop.
//! * [`watch`] drives discovery: wait for a token across hot-plug, or fan an
//!   operation out across every plugged token and take the first winner.
//!
//! Sessions are exclusive: one command in flight per token, enforced by
//! `&mut` receivers. Everything that waits takes a
//! [`CancellationToken`][tokio_util::sync::CancellationToken] and resolves
//! to `Ok(None)` when it fires.
//!
//! U2F server-side verification (attestation chains, signature counters) is
//! deliberately out of scope; this crate produces the websafe-base64
//! response objects a relying party consumes.
//!
//! [hidapi]: https://docs.rs/hidapi
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

pub mod apdu;
pub mod devices;
pub mod error;
pub mod hid;
pub mod proto;
pub mod u2f;
pub mod usb;
pub mod watch;

mod util;

pub use crate::error::{Error, Result};

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::hid::backend::HidApiDeviceManager;
    pub use crate::hid::HidDeviceManager;
    pub use crate::proto::{
        AuthenticateResponse, RegisterResponse, StartedAuthentication, StartedRegistration,
        U2F_VERSION_STRING,
    };
    pub use crate::u2f::U2FAuthenticator;
    pub use crate::usb::U2FHidToken;
    pub use crate::watch::{run_parallel, wait_for_device, wait_for_devices, with_first_token};
    pub use tokio_util::sync::CancellationToken;
}
