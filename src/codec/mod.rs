// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stateless encoding and decoding of _Modbus_ PDUs.

use std::{
    borrow::Cow,
    future::{self, Future as _},
    io::{self, Cursor},
    pin::Pin,
    task::Poll,
};

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use futures_util::StreamExt as _;
use tokio::{
    io::AsyncRead,
    time::{Instant, Sleep},
};
use tokio_util::codec::{Decoder, Framed};

use crate::{
    error::{Error, MalformedPdu, ProtocolError},
    frame::{
        Coil, ExceptionCode, ExceptionResponse, FunctionCode, Request, Response, ResponsePdu,
    },
};

pub mod crc;
pub mod rtu;
pub mod tcp;

/// Maximum request/response PDU size.
///
/// As defined by the _Modbus_ application protocol for both RTU and TCP.
pub const MAX_PDU_SIZE: usize = 253;

/// Decoders of framings that delimit some frames by a silent line
/// instead of an explicit length.
pub trait SilenceDelimited: Decoder {
    /// Deadline after which the buffered bytes form a complete window.
    ///
    /// `None` if nothing is buffered or windows are not used.
    fn window_deadline(&self) -> Option<Instant> {
        None
    }

    /// Decode all buffered bytes as a single frame.
    ///
    /// Invoked once the line stayed silent until [`Self::window_deadline`].
    fn decode_window(&mut self, buf: &mut BytesMut) -> Option<Self::Item> {
        let _ = buf;
        None
    }
}

/// Receive the next frame, either delimited by the codec or by silence.
///
/// The silence deadline is re-armed whenever the codec has seen new
/// bytes. Cancel safe: buffered bytes are retained.
pub(crate) async fn next_frame<T, C>(
    framed: &mut Framed<T, C>,
) -> Option<std::result::Result<C::Item, C::Error>>
where
    T: AsyncRead + Unpin,
    C: SilenceDelimited + Unpin,
{
    let mut silence: Option<Pin<Box<Sleep>>> = None;
    future::poll_fn(|cx| loop {
        if let Poll::Ready(item) = framed.poll_next_unpin(cx) {
            return Poll::Ready(item);
        }
        // Pending implies that all bytes read so far went through the decoder.
        let Some(deadline) = framed.codec().window_deadline() else {
            return Poll::Pending;
        };
        let sleep = silence.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        if sleep.deadline() != deadline {
            sleep.as_mut().reset(deadline);
        }
        if sleep.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }
        let mut window = std::mem::take(framed.read_buffer_mut());
        if let Some(item) = framed.codec_mut().decode_window(&mut window) {
            return Poll::Ready(Some(Ok(item)));
        }
    })
    .await
}

type DecodeResult<T> = std::result::Result<T, MalformedPdu>;

fn u16_len(len: usize) -> DecodeResult<u16> {
    u16::try_from(len).map_err(|_| MalformedPdu::new("quantity exceeds 16 bit"))
}

fn u8_len(len: usize) -> DecodeResult<u8> {
    u8::try_from(len).map_err(|_| MalformedPdu::new("byte count exceeds 8 bit"))
}

fn check_pdu_size(len: usize) -> DecodeResult<()> {
    if len > MAX_PDU_SIZE {
        return Err(MalformedPdu::new(format!(
            "PDU size exceeded: {len} > {MAX_PDU_SIZE}"
        )));
    }
    Ok(())
}

/// Encode a request PDU: function code followed by the big-endian fields.
pub fn encode_request(request: &Request<'_>) -> DecodeResult<Bytes> {
    let mut buf = BytesMut::with_capacity(request_pdu_size(request));
    encode_request_pdu(&mut buf, request)?;
    check_pdu_size(buf.len())?;
    Ok(buf.freeze())
}

fn encode_request_pdu(buf: &mut BytesMut, request: &Request<'_>) -> DecodeResult<()> {
    use crate::frame::Request::*;
    buf.put_u8(request.function_code().value());
    match request {
        ReadCoils(address, quantity)
        | ReadDiscreteInputs(address, quantity)
        | ReadInputRegisters(address, quantity)
        | ReadHoldingRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteMultipleCoils(address, coils) => {
            buf.put_u16(*address);
            buf.put_u16(u16_len(coils.len())?);
            buf.put_u8(u8_len(packed_coils_size(coils))?);
            encode_packed_coils(buf, coils);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        WriteMultipleRegisters(address, words) => {
            buf.put_u16(*address);
            let len = words.len();
            buf.put_u16(u16_len(len)?);
            buf.put_u8(u8_len(len * 2)?);
            for w in words.as_ref() {
                buf.put_u16(*w);
            }
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            buf.put_u16(*address);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        Unsupported(_) => {}
    }
    Ok(())
}

/// Encode a response PDU, either a regular or an exception response.
pub fn encode_response(response: &ResponsePdu) -> DecodeResult<Bytes> {
    let mut buf = BytesMut::with_capacity(MAX_PDU_SIZE);
    match &response.0 {
        Ok(rsp) => encode_response_pdu(&mut buf, rsp)?,
        Err(rsp) => encode_exception_response_pdu(&mut buf, *rsp),
    }
    check_pdu_size(buf.len())?;
    Ok(buf.freeze())
}

fn encode_response_pdu(buf: &mut BytesMut, response: &Response) -> DecodeResult<()> {
    use crate::frame::Response::*;
    buf.put_u8(response.function_code().value());
    match response {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => {
            buf.put_u8(u8_len(packed_coils_size(coils))?);
            encode_packed_coils(buf, coils);
        }
        ReadInputRegisters(registers) | ReadHoldingRegisters(registers) => {
            buf.put_u8(u8_len(registers.len() * 2)?);
            for r in registers {
                buf.put_u16(*r);
            }
        }
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            buf.put_u16(*address);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        Unsupported(_) => {}
    }
    Ok(())
}

fn encode_exception_response_pdu(buf: &mut BytesMut, rsp: ExceptionResponse) {
    buf.put_u8(rsp.function.exception_value());
    buf.put_u8(rsp.exception.into());
}

fn too_short(_: io::Error) -> MalformedPdu {
    MalformedPdu::new("too short")
}

fn read_u8(rdr: &mut Cursor<&Bytes>) -> DecodeResult<u8> {
    rdr.read_u8().map_err(too_short)
}

fn read_u16_be(rdr: &mut Cursor<&Bytes>) -> DecodeResult<u16> {
    rdr.read_u16::<BigEndian>().map_err(too_short)
}

/// Take `len` bytes from the current position of the cursor.
fn read_slice<'b>(rdr: &mut Cursor<&'b Bytes>, len: usize) -> DecodeResult<&'b [u8]> {
    let bytes: &'b Bytes = *rdr.get_ref();
    let start = usize::try_from(rdr.position()).map_err(|_| MalformedPdu::new("too short"))?;
    let end = start + len;
    if bytes.len() < end {
        return Err(MalformedPdu::new("too short"));
    }
    rdr.advance(len);
    Ok(&bytes[start..end])
}

fn read_words(rdr: &mut Cursor<&Bytes>, quantity: usize) -> DecodeResult<Vec<u16>> {
    let mut data = Vec::with_capacity(quantity);
    for _ in 0..quantity {
        data.push(read_u16_be(rdr)?);
    }
    Ok(data)
}

fn ensure_consumed(rdr: &Cursor<&Bytes>, what: &str) -> DecodeResult<()> {
    // Verify that all data has been consumed and decoded.
    if rdr.has_remaining() {
        return Err(MalformedPdu::new(format!("undecoded {what} data")));
    }
    Ok(())
}

/// Decode a request PDU.
///
/// Unknown function codes are decoded into [`Request::Unsupported`].
pub fn decode_request(bytes: Bytes) -> DecodeResult<Request<'static>> {
    use crate::frame::Request::*;
    if bytes.is_empty() {
        return Err(MalformedPdu::new("empty request PDU"));
    }
    check_pdu_size(bytes.len())?;
    let rdr = &mut Cursor::new(&bytes);
    let fn_code = read_u8(rdr)?;
    let req = match FunctionCode::new(fn_code) {
        FunctionCode::ReadCoils => ReadCoils(read_u16_be(rdr)?, read_u16_be(rdr)?),
        FunctionCode::ReadDiscreteInputs => {
            ReadDiscreteInputs(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::ReadHoldingRegisters => {
            ReadHoldingRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::ReadInputRegisters => {
            ReadInputRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteSingleCoil => {
            WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?)
        }
        FunctionCode::WriteSingleRegister => {
            WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteMultipleCoils => {
            let address = read_u16_be(rdr)?;
            let quantity = read_u16_be(rdr)?;
            let byte_count = usize::from(read_u8(rdr)?);
            if byte_count != (usize::from(quantity) + 7) / 8 {
                return Err(MalformedPdu::new(format!(
                    "byte count {byte_count} does not match quantity {quantity}"
                )));
            }
            let packed_coils = read_slice(rdr, byte_count)?;
            WriteMultipleCoils(
                address,
                Cow::Owned(decode_packed_coils(packed_coils, quantity)),
            )
        }
        FunctionCode::WriteMultipleRegisters => {
            let address = read_u16_be(rdr)?;
            let quantity = read_u16_be(rdr)?;
            let byte_count = read_u8(rdr)?;
            if usize::from(byte_count) != usize::from(quantity) * 2 {
                return Err(MalformedPdu::new(format!(
                    "byte count {byte_count} does not match quantity {quantity}"
                )));
            }
            let data = read_words(rdr, quantity.into())?;
            WriteMultipleRegisters(address, Cow::Owned(data))
        }
        FunctionCode::MaskWriteRegister => {
            let address = read_u16_be(rdr)?;
            let and_mask = read_u16_be(rdr)?;
            let or_mask = read_u16_be(rdr)?;
            MaskWriteRegister(address, and_mask, or_mask)
        }
        FunctionCode::Unsupported(code) => return Ok(Unsupported(code)),
    };
    ensure_consumed(rdr, "request")?;
    Ok(req)
}

/// Decode a response PDU to a request with the given function code.
///
/// A leading `function | 0x80` marker yields an exception response.
pub fn decode_response(function: FunctionCode, bytes: Bytes) -> Result<ResponsePdu, Error> {
    use crate::frame::Response::*;
    if bytes.is_empty() {
        return Err(ProtocolError::EmptyResponse.into());
    }
    if bytes.len() > MAX_PDU_SIZE {
        return Err(MalformedPdu::new("response PDU size exceeded").into());
    }
    let rdr = &mut Cursor::new(&bytes);
    let fn_code = read_u8(rdr)?;
    if fn_code == function.exception_value() {
        let exception = ExceptionCode::new(read_u8(rdr)?);
        ensure_consumed(rdr, "exception response")?;
        return Ok(ExceptionResponse {
            function,
            exception,
        }
        .into());
    }
    if fn_code != function.value() {
        return Err(ProtocolError::FunctionCodeMismatch {
            expected: function,
            actual: fn_code,
        }
        .into());
    }
    let rsp = match function {
        FunctionCode::ReadCoils => ReadCoils(read_packed_coils(rdr)?),
        FunctionCode::ReadDiscreteInputs => ReadDiscreteInputs(read_packed_coils(rdr)?),
        FunctionCode::ReadHoldingRegisters => ReadHoldingRegisters(read_registers(rdr)?),
        FunctionCode::ReadInputRegisters => ReadInputRegisters(read_registers(rdr)?),
        FunctionCode::WriteSingleCoil => {
            WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?)
        }
        FunctionCode::WriteSingleRegister => {
            WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteMultipleCoils => {
            WriteMultipleCoils(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteMultipleRegisters => {
            WriteMultipleRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::MaskWriteRegister => {
            let address = read_u16_be(rdr)?;
            let and_mask = read_u16_be(rdr)?;
            let or_mask = read_u16_be(rdr)?;
            MaskWriteRegister(address, and_mask, or_mask)
        }
        FunctionCode::Unsupported(code) => return Ok(Unsupported(code).into()),
    };
    ensure_consumed(rdr, "response")?;
    Ok(rsp.into())
}

fn read_packed_coils(rdr: &mut Cursor<&Bytes>) -> DecodeResult<Vec<Coil>> {
    let byte_count = read_u8(rdr)?;
    let packed_coils = read_slice(rdr, byte_count.into())?;
    // Here we have no information about the exact requested quantity so we just
    // unpack the whole byte.
    let quantity = u16::from(byte_count) * 8;
    Ok(decode_packed_coils(packed_coils, quantity))
}

fn read_registers(rdr: &mut Cursor<&Bytes>) -> DecodeResult<Vec<u16>> {
    let byte_count = read_u8(rdr)?;
    if byte_count % 2 != 0 {
        return Err(MalformedPdu::new(format!(
            "odd register byte count {byte_count}"
        )));
    }
    read_words(rdr, usize::from(byte_count / 2))
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> DecodeResult<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(MalformedPdu::new(format!("invalid coil value: 0x{coil:04X}"))),
    }
}

fn packed_coils_size(coils: &[Coil]) -> usize {
    (coils.len() + 7) / 8
}

fn encode_packed_coils(buf: &mut BytesMut, coils: &[Coil]) -> usize {
    let packed_coils_size = packed_coils_size(coils);
    let offset = buf.len();
    buf.resize(offset + packed_coils_size, 0);
    let buf = &mut buf[offset..];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b); // 0 or 1
        buf[i / 8] |= v << (i % 8);
    }
    packed_coils_size
}

fn decode_packed_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0usize..count.into() {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn request_pdu_size(req: &Request<'_>) -> usize {
    use crate::frame::Request::*;
    match req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, coils) => 6 + packed_coils_size(coils),
        WriteMultipleRegisters(_, data) => 6 + data.len() * 2,
        MaskWriteRegister(_, _, _) => 7,
        Unsupported(_) => 1,
    }
}
