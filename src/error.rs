//! Error taxonomy shared by every layer of the crate.
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error kind spanning the HID transport, the U2FHID protocol and the
/// U2F APDU layer.
///
/// APDU-derived variants carry the originating status word for diagnostics
/// where the status adds information beyond the kind itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The token is prompting for a touch.
    /// [`register`][crate::u2f::U2FAuthenticator::register] and
    /// [`authenticate`][crate::u2f::U2FAuthenticator::authenticate] consume
    /// this internally by polling; it only escapes from raw APDU exchanges.
    #[error("token is waiting for user presence")]
    UserPresenceRequired,

    /// The key handle does not belong to this token.
    #[error("key handle does not belong to this token")]
    InvalidKeyHandle,

    /// The token rejected the instruction or parameters, or the caller asked
    /// for a capability the token's INIT capability bits say it lacks.
    #[error("operation not supported by this token")]
    UnsupportedOperation(Option<u16>),

    /// The token signalled a message timeout.
    #[error("token signalled a message timeout")]
    Timeout,

    /// The token's channel is busy, typically held by another host process.
    #[error("token channel is busy")]
    TokenBusy,

    /// An OS-level HID read or write failed or timed out. The session should
    /// be considered unusable after this.
    #[error("HID I/O failed: {0}")]
    InterruptedIo(String),

    /// The token violated the U2FHID or U2F framing rules: runt frame, wrong
    /// command echo, out-of-order sequence, unexpected success on a
    /// check-only call, and similar invariant breaches.
    #[error("U2FHID protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

impl Error {
    /// Failures the discovery retry loops treat as transient: the token may
    /// recover on its own, or another token may be along shortly.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::TokenBusy | Error::InterruptedIo(_)
        )
    }
}

impl From<hidapi::HidError> for Error {
    fn from(e: hidapi::HidError) -> Self {
        Error::InterruptedIo(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::InterruptedIo(e.to_string())
    }
}
