// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing of _Modbus_ TCP.

use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{SilenceDelimited, MAX_PDU_SIZE};
use crate::frame::tcp::{Frame, Header, PROTOCOL_ID};

pub(crate) const HEADER_LEN: usize = 7;

/// Offset between the length field and the total frame length.
const LENGTH_OFFSET: usize = 6;

/// Stateful codec of a single TCP connection.
///
/// The same framing is used in both directions, the PDU is not inspected.
#[derive(Debug, Default)]
pub struct TcpCodec;

impl Decoder for TcpCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            if buf.len() < HEADER_LEN {
                return Ok(None);
            }

            // len = bytes of PDU + one byte (unit ID)
            let len = usize::from(BigEndian::read_u16(&buf[4..6]));
            if len < 1 {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "invalid MBAP length field: 0",
                ));
            }
            if len > MAX_PDU_SIZE + 1 {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("invalid MBAP length field: {len}"),
                ));
            }
            let frame_len = len + LENGTH_OFFSET;
            if buf.len() < frame_len {
                buf.reserve(frame_len - buf.len());
                return Ok(None);
            }

            let mut frame = buf.split_to(frame_len);
            let header = frame.split_to(HEADER_LEN);
            let transaction_id = BigEndian::read_u16(&header[0..2]);
            let protocol_id = BigEndian::read_u16(&header[2..4]);
            let unit_id = header[6];

            if protocol_id != PROTOCOL_ID {
                log::warn!(
                    "Skipping frame {transaction_id} with unexpected protocol id 0x{protocol_id:04X}"
                );
                continue;
            }

            return Ok(Some(Frame {
                header: Header {
                    transaction_id,
                    protocol_id,
                    unit_id,
                },
                pdu: frame.freeze(),
            }));
        }
    }
}

impl SilenceDelimited for TcpCodec {}

impl Encoder<Frame> for TcpCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<()> {
        let Frame { header, pdu } = frame;
        let len = u16::try_from(pdu.len() + 1)
            .ok()
            .filter(|_| pdu.len() <= MAX_PDU_SIZE)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("PDU size exceeded: {} > {MAX_PDU_SIZE}", pdu.len()),
                )
            })?;
        buf.reserve(HEADER_LEN + pdu.len());
        buf.put_u16(header.transaction_id);
        buf.put_u16(header.protocol_id);
        buf.put_u16(len);
        buf.put_u8(header.unit_id);
        buf.put_slice(&pdu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn decode_hex(hex: &str) -> BytesMut {
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect::<Vec<_>>();
        BytesMut::from(&bytes[..])
    }

    #[test]
    fn decode_header_fragment() {
        let mut codec = TcpCodec;
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = TcpCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, // transaction id HI
                0x11, // transaction id LO
                0x00, // protocol id HI
                0x00, // protocol id LO
                0x00, // length HI
                0x03, // length LO
                0x66, // unit id
                0x02, // function code
            ][..],
        );
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn decode_frame_without_pdu() {
        let mut codec = TcpCodec;
        let mut buf = decode_hex("5FFD0000000101");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header, Header::new(0x5FFD, 0x01));
        assert!(frame.pdu.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_exception_message() {
        let mut codec = TcpCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x66, 0x82, // exception = 0x80 + 0x02
                0x03, 0x00,
            ][..],
        );
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(frame.header, Header::new(0, 0x66));
        assert_eq!(&frame.pdu[..], &[0x82, 0x03]);
    }

    #[test]
    fn does_not_read_past_declared_length() {
        let mut codec = TcpCodec;
        let mut buf = decode_hex("0001000000060103000000010002");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.transaction_id, 1);
        assert_eq!(&frame.pdu[..], &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&buf[..], &[0x00, 0x02]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn skip_frame_with_invalid_protocol_id() {
        let mut codec = TcpCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x01, 0x00, 0x01, // invalid protocol id
                0x00, 0x03, 0x66, 0x82, 0x03, // next frame
                0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x66, 0x82, 0x03,
            ][..],
        );
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.transaction_id, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn reject_invalid_length_field() {
        let mut codec = TcpCodec;
        let mut buf = decode_hex("00010000000001");
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = decode_hex("00010000010001");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_read_request() {
        let mut codec = TcpCodec;
        let mut buf = BytesMut::new();
        let frame = Frame {
            header: Header::new(0x1501, 0xFE),
            pdu: Bytes::from_static(&[0x03, 0x08, 0x2B, 0x00, 0x02]),
        };
        codec.encode(frame, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x15, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFE, 0x03, 0x08, 0x2B, 0x00, 0x02]
        );
    }

    #[test]
    fn encoded_frames_decode() {
        let mut codec = TcpCodec;
        let mut buf = BytesMut::new();
        let frames = [
            Frame {
                header: Header::new(0xFFFF, 0x00),
                pdu: Bytes::new(),
            },
            Frame {
                header: Header::new(7, 0xFF),
                pdu: Bytes::from_static(&[0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0xAB, 0xCD]),
            },
        ];
        for frame in frames.clone() {
            codec.encode(frame, &mut buf).unwrap();
        }
        for frame in frames {
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        }
        assert!(buf.is_empty());
    }
}
