// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framing of _Modbus_ RTU.
//!
//! RTU frames carry no length field. The length is derived from the
//! function code where possible. Frames of unknown length are delimited
//! by a silent line, see [`SilenceDelimited`].

use std::{
    io::{Error, ErrorKind, Result},
    time::Duration,
};

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};

use super::{
    crc::{append_crc, verify_crc, CRC_SIZE},
    SilenceDelimited, MAX_PDU_SIZE,
};
use crate::{error::CrcMismatch, frame::rtu::Frame};

// unit id + function code + crc
const MIN_ADU_LEN: usize = 1 + 1 + CRC_SIZE;

const MAX_ADU_LEN: usize = 1 + MAX_PDU_SIZE + CRC_SIZE;

/// Decoded item of an RTU stream.
///
/// A CRC mismatch only invalidates the affected frame, the stream
/// continues with the next one.
pub type RtuItem = std::result::Result<Frame, CrcMismatch>;

/// Which side of the link decodes the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Decodes responses.
    Client,
    /// Decodes requests.
    Server,
}

/// Length of the PDU at the start of a buffered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PduLength {
    Known(usize),
    Incomplete,
    Unknown,
}

fn request_pdu_len(adu: &[u8]) -> PduLength {
    if adu.len() < 2 {
        return PduLength::Incomplete;
    }
    match adu[1] {
        0x01..=0x06 => PduLength::Known(5),
        0x0F | 0x10 => {
            if adu.len() > 6 {
                PduLength::Known(6 + usize::from(adu[6]))
            } else {
                PduLength::Incomplete
            }
        }
        0x16 => PduLength::Known(7),
        _ => PduLength::Unknown,
    }
}

fn response_pdu_len(adu: &[u8]) -> PduLength {
    if adu.len() < 2 {
        return PduLength::Incomplete;
    }
    match adu[1] {
        fn_code if fn_code & 0x80 != 0 => PduLength::Known(2),
        0x01..=0x04 => {
            if adu.len() > 2 {
                PduLength::Known(2 + usize::from(adu[2]))
            } else {
                PduLength::Incomplete
            }
        }
        0x05 | 0x06 | 0x0F | 0x10 => PduLength::Known(5),
        0x16 => PduLength::Known(7),
        _ => PduLength::Unknown,
    }
}

/// Stateful codec of a single RTU link.
#[derive(Debug)]
pub struct RtuCodec {
    role: Role,
    silence: Option<Duration>,
    last_rx: Option<Instant>,
    buffered: usize,
}

impl RtuCodec {
    #[must_use]
    pub fn new(role: Role, silence: Option<Duration>) -> Self {
        Self {
            role,
            silence,
            last_rx: None,
            buffered: 0,
        }
    }

    #[must_use]
    pub fn client(silence: Option<Duration>) -> Self {
        Self::new(Role::Client, silence)
    }

    #[must_use]
    pub fn server(silence: Option<Duration>) -> Self {
        Self::new(Role::Server, silence)
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    fn pdu_len(&self, buf: &[u8]) -> PduLength {
        match self.role {
            Role::Client => response_pdu_len(buf),
            Role::Server => request_pdu_len(buf),
        }
    }

    fn remember(&mut self, buf: &BytesMut) {
        self.buffered = buf.len();
        if buf.is_empty() {
            self.last_rx = None;
        }
    }
}

fn verify(adu: Bytes) -> RtuItem {
    match verify_crc(&adu) {
        Ok(()) => Ok(Frame {
            unit_id: adu[0],
            pdu: adu.slice(1..adu.len() - CRC_SIZE),
        }),
        Err((expected, actual)) => {
            log::warn!(
                "Dropping RTU frame with invalid CRC: expected 0x{expected:04X}, received 0x{actual:04X}"
            );
            Err(CrcMismatch {
                frame: adu,
                expected,
                actual,
            })
        }
    }
}

impl Decoder for RtuCodec {
    type Item = RtuItem;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtuItem>> {
        if buf.len() > self.buffered {
            self.last_rx = Some(Instant::now());
        }
        loop {
            let pdu_len = match self.pdu_len(buf) {
                PduLength::Known(len) => len,
                PduLength::Incomplete | PduLength::Unknown => {
                    self.remember(buf);
                    return Ok(None);
                }
            };
            let adu_len = 1 + pdu_len + CRC_SIZE;
            if adu_len > MAX_ADU_LEN {
                // Noise on the line, skip a byte and try to resync.
                log::warn!(
                    "Dropping byte 0x{:02X}: RTU frame size exceeded: {adu_len} > {MAX_ADU_LEN}",
                    buf[0]
                );
                buf.advance(1);
                continue;
            }
            if buf.len() < adu_len {
                buf.reserve(adu_len - buf.len());
                self.remember(buf);
                return Ok(None);
            }
            let adu = buf.split_to(adu_len).freeze();
            self.remember(buf);
            return Ok(Some(verify(adu)));
        }
    }
}

impl SilenceDelimited for RtuCodec {
    fn window_deadline(&self) -> Option<Instant> {
        let silence = self.silence?;
        self.last_rx.map(|last_rx| last_rx + silence)
    }

    fn decode_window(&mut self, buf: &mut BytesMut) -> Option<RtuItem> {
        let window = buf.split().freeze();
        self.remember(buf);
        if window.len() < MIN_ADU_LEN || window.len() > MAX_ADU_LEN {
            log::warn!("Discarding {} bytes between silent periods", window.len());
            return None;
        }
        Some(verify(window))
    }
}

impl Encoder<Frame> for RtuCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<()> {
        let Frame { unit_id, pdu } = frame;
        if pdu.len() > MAX_PDU_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("PDU size exceeded: {} > {MAX_PDU_SIZE}", pdu.len()),
            ));
        }
        // The frame is checksummed on its own, independent of buffered data.
        let mut adu = BytesMut::with_capacity(1 + pdu.len() + CRC_SIZE);
        adu.put_u8(unit_id);
        adu.put_slice(&pdu);
        append_crc(&mut adu);
        buf.extend_from_slice(&adu);
        Ok(())
    }
}
