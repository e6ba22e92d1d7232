//! U2FHID message framing.
//!
//! USB HID moves fixed 64-byte reports, so logical messages are fragmented:
//! an initial frame with a 7-byte header (channel, command, total length)
//! followed by continuation frames with a 5-byte header (channel, sequence
//! number). [`FrameIterator`] fragments outbound messages and
//! [`FrameAssembler`] rebuilds inbound ones, enforcing channel isolation and
//! strict sequence order.
use std::cmp::min;

use crate::error::{Error, Result};
use crate::hid::{HidReportBytes, HidSendReportBytes, HID_RPT_SIZE};
use crate::usb::U2FHID_ERROR;

/// Command flag: set on the type byte of initial frames, clear on the
/// sequence byte of continuation frames.
pub const TYPE_INIT: u8 = 0x80;

/// Payload capacity of an initial frame.
pub const INITIAL_FRAGMENT_SIZE: usize = HID_RPT_SIZE - 7;
/// Payload capacity of a continuation frame.
pub const FRAGMENT_SIZE: usize = HID_RPT_SIZE - 5;
/// Longest message expressible in one initial frame plus the 128 possible
/// continuation frames (sequence numbers 0x00 through 0x7f).
pub const MAX_SIZE: usize = INITIAL_FRAGMENT_SIZE + 0x80 * FRAGMENT_SIZE;

/// One logical U2FHID message, or one raw fragment of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct U2FHidFrame {
    /// Channel identifier.
    pub cid: u32,
    /// Command byte on initial frames, sequence number on continuations.
    pub cmd: u8,
    /// Total payload length across all fragments of the message.
    pub len: u16,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl U2FHidFrame {
    /// Builds a whole outbound message, ready for [`FrameIterator`].
    pub fn new(cid: u32, cmd: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_SIZE {
            return Err(Error::ProtocolViolation(
                "message exceeds the maximum U2FHID length",
            ));
        }
        Ok(U2FHidFrame {
            cid,
            cmd,
            len: data.len() as u16,
            data,
        })
    }

    fn is_initial(&self) -> bool {
        self.cmd & TYPE_INIT != 0
    }
}

/// Fragments a [`U2FHidFrame`] into reports that fit the HID MTU.
///
/// Always yields at least the initial frame, then one continuation frame per
/// remaining 59-byte chunk, sequence numbers counting up from zero.
pub struct FrameIterator<'a> {
    frame: &'a U2FHidFrame,
    offset: usize,
    seq: u8,
    started: bool,
}

impl<'a> FrameIterator<'a> {
    pub fn new(frame: &'a U2FHidFrame) -> Result<Self> {
        if frame.data.len() > MAX_SIZE {
            return Err(Error::ProtocolViolation(
                "message exceeds the maximum U2FHID length",
            ));
        }
        Ok(FrameIterator {
            frame,
            offset: 0,
            seq: 0,
            started: false,
        })
    }
}

impl Iterator for FrameIterator<'_> {
    type Item = U2FHidFrame;

    fn next(&mut self) -> Option<U2FHidFrame> {
        let data = &self.frame.data;
        if !self.started {
            self.started = true;
            let take = min(data.len(), INITIAL_FRAGMENT_SIZE);
            self.offset = take;
            return Some(U2FHidFrame {
                cid: self.frame.cid,
                cmd: self.frame.cmd,
                len: self.frame.len,
                data: data[..take].to_vec(),
            });
        }
        if self.offset >= data.len() {
            return None;
        }
        let take = min(data.len() - self.offset, FRAGMENT_SIZE);
        let chunk = data[self.offset..self.offset + take].to_vec();
        self.offset += take;
        let seq = self.seq;
        self.seq += 1;
        Some(U2FHidFrame {
            cid: self.frame.cid,
            cmd: seq,
            len: 0,
            data: chunk,
        })
    }
}

/// Serialises one fragment into an output report, zero-padded, with the
/// leading report id byte.
impl From<&U2FHidFrame> for HidSendReportBytes {
    fn from(f: &U2FHidFrame) -> HidSendReportBytes {
        let mut o: HidSendReportBytes = [0; HID_RPT_SIZE + 1];
        // o[0] is the report id.
        o[1..5].copy_from_slice(&f.cid.to_be_bytes());
        o[5] = f.cmd;
        if f.is_initial() {
            o[6..8].copy_from_slice(&f.len.to_be_bytes());
            o[8..8 + f.data.len()].copy_from_slice(&f.data);
        } else {
            o[6..6 + f.data.len()].copy_from_slice(&f.data);
        }
        o
    }
}

/// Parses one input report into a fragment.
///
/// For initial frames the payload is truncated to `min(len, 57)`; for
/// continuation frames the full 59 bytes are kept and the assembler trims
/// the padding.
impl TryFrom<&HidReportBytes> for U2FHidFrame {
    type Error = Error;

    fn try_from(b: &HidReportBytes) -> Result<Self> {
        let cid = u32::from_be_bytes(
            b[..4]
                .try_into()
                .map_err(|_| Error::ProtocolViolation("frame shorter than its header"))?,
        );
        let cmd = b[4];
        if cmd & TYPE_INIT != 0 {
            let len = u16::from_be_bytes(
                b[5..7]
                    .try_into()
                    .map_err(|_| Error::ProtocolViolation("frame shorter than its header"))?,
            );
            let take = min(usize::from(len), INITIAL_FRAGMENT_SIZE);
            Ok(U2FHidFrame {
                cid,
                cmd,
                len,
                data: b[7..7 + take].to_vec(),
            })
        } else {
            Ok(U2FHidFrame {
                cid,
                cmd,
                len: 0,
                data: b[5..].to_vec(),
            })
        }
    }
}

/// Rebuilds one logical message from a stream of input reports.
///
/// Reports on other channels are dropped without advancing any state, so
/// traffic belonging to concurrent host sessions cannot corrupt reassembly.
/// Continuation sequence numbers must arrive as exactly 0, 1, 2 and so on.
/// An ERROR-typed frame is surfaced whole wherever it appears, including mid
/// reassembly.
pub struct FrameAssembler {
    cid: u32,
    partial: Option<U2FHidFrame>,
    next_seq: u8,
}

impl FrameAssembler {
    pub fn new(cid: u32) -> Self {
        FrameAssembler {
            cid,
            partial: None,
            next_seq: 0,
        }
    }

    /// Feeds one raw report. Returns the completed message once the initial
    /// frame's length field is satisfied, `None` while more frames are
    /// needed or when the report belonged to another channel.
    pub fn push(&mut self, report: &HidReportBytes) -> Result<Option<U2FHidFrame>> {
        let frame = U2FHidFrame::try_from(report)?;
        if frame.cid != self.cid {
            trace!(
                "dropping frame for channel {:08x} (session channel {:08x})",
                frame.cid,
                self.cid
            );
            return Ok(None);
        }

        match self.partial.take() {
            None => {
                if !frame.is_initial() {
                    return Err(Error::ProtocolViolation(
                        "continuation frame without an initial frame",
                    ));
                }
                self.accept(frame)
            }
            Some(partial) => {
                if frame.is_initial() {
                    // A token reporting an error mid-message abandons the
                    // message in progress.
                    if frame.cmd == U2FHID_ERROR {
                        self.next_seq = 0;
                        return self.accept(frame);
                    }
                    return Err(Error::ProtocolViolation(
                        "initial frame arrived during reassembly",
                    ));
                }
                if frame.cmd != self.next_seq {
                    return Err(Error::ProtocolViolation(
                        "continuation frame out of sequence",
                    ));
                }
                self.next_seq += 1;
                let mut partial = partial;
                let remaining = usize::from(partial.len) - partial.data.len();
                partial
                    .data
                    .extend_from_slice(&frame.data[..min(remaining, frame.data.len())]);
                self.accept(partial)
            }
        }
    }

    fn accept(&mut self, frame: U2FHidFrame) -> Result<Option<U2FHidFrame>> {
        if frame.data.len() >= usize::from(frame.len) {
            Ok(Some(frame))
        } else {
            self.partial = Some(frame);
            Ok(None)
        }
    }
}
