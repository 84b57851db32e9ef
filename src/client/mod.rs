// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus clients

use std::{borrow::Cow, fmt::Debug};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    codec,
    error::MalformedPdu,
    frame::*,
    unit::UnitContext,
    ExceptionCode, Result,
};

pub(crate) mod connection;
pub(crate) mod state;
pub mod transaction;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

/// Transport independent asynchronous client trait
#[async_trait]
pub trait Client: UnitContext + Send + Sync + Debug {
    /// Invokes a _Modbus_ function.
    async fn call(&self, request: Request<'_>) -> Result<Response>;

    /// Disconnects the client.
    ///
    /// Pending requests fail with [`crate::Error::ConnectionClosed`].
    /// A subsequent call reconnects if auto-connect is enabled.
    async fn disconnect(&self);
}

/// Asynchronous _Modbus_ reader
#[async_trait]
pub trait Reader: Client {
    /// Read multiple coils (0x01)
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple discrete inputs (0x02)
    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple holding registers (0x03)
    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read multiple input registers (0x04)
    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
}

/// Asynchronous Modbus writer
#[async_trait]
pub trait Writer: Client {
    /// Write a single coil (0x05)
    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<()>;

    /// Write a single holding register (0x06)
    async fn write_single_register(&self, addr: Address, word: Word) -> Result<()>;

    /// Write multiple coils (0x0F)
    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<()>;

    /// Write multiple holding registers (0x10)
    async fn write_multiple_registers(&self, addr: Address, words: &[Word]) -> Result<()>;

    /// Set or clear individual bits of a holding register (0x16)
    async fn masked_write_register(&self, addr: Address, and_mask: Word, or_mask: Word)
        -> Result<()>;
}

// Responses are decoded with the function code of the request,
// so only a misbehaving `Client` implementation ends up here.
fn mismatch(response: &Response) -> crate::Error {
    MalformedPdu::new(format!(
        "unexpected response {}",
        response.function_code()
    ))
    .into()
}

#[async_trait]
impl<T> Reader for T
where
    T: Client + ?Sized,
{
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        match self.call(Request::ReadCoils(addr, cnt)).await? {
            Ok(Response::ReadCoils(mut coils)) => {
                // The protocol always transfers entire bytes.
                coils.truncate(cnt.into());
                Ok(Ok(coils))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        match self.call(Request::ReadDiscreteInputs(addr, cnt)).await? {
            Ok(Response::ReadDiscreteInputs(mut coils)) => {
                coils.truncate(cnt.into());
                Ok(Ok(coils))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        match self.call(Request::ReadHoldingRegisters(addr, cnt)).await? {
            Ok(Response::ReadHoldingRegisters(words)) => Ok(Ok(words)),
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        match self.call(Request::ReadInputRegisters(addr, cnt)).await? {
            Ok(Response::ReadInputRegisters(words)) => Ok(Ok(words)),
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }
}

#[async_trait]
impl<T> Writer for T
where
    T: Client + ?Sized,
{
    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<()> {
        match self.call(Request::WriteSingleCoil(addr, coil)).await? {
            Ok(Response::WriteSingleCoil(rsp_addr, rsp_coil)) => {
                debug_assert_eq!(addr, rsp_addr);
                debug_assert_eq!(coil, rsp_coil);
                Ok(Ok(()))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_single_register(&self, addr: Address, word: Word) -> Result<()> {
        match self.call(Request::WriteSingleRegister(addr, word)).await? {
            Ok(Response::WriteSingleRegister(rsp_addr, rsp_word)) => {
                debug_assert_eq!(addr, rsp_addr);
                debug_assert_eq!(word, rsp_word);
                Ok(Ok(()))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<()> {
        let cnt = coils.len();
        match self
            .call(Request::WriteMultipleCoils(addr, Cow::Borrowed(coils)))
            .await?
        {
            Ok(Response::WriteMultipleCoils(rsp_addr, rsp_cnt)) => {
                debug_assert_eq!(addr, rsp_addr);
                debug_assert_eq!(cnt, usize::from(rsp_cnt));
                Ok(Ok(()))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_multiple_registers(&self, addr: Address, words: &[Word]) -> Result<()> {
        let cnt = words.len();
        match self
            .call(Request::WriteMultipleRegisters(addr, Cow::Borrowed(words)))
            .await?
        {
            Ok(Response::WriteMultipleRegisters(rsp_addr, rsp_cnt)) => {
                debug_assert_eq!(addr, rsp_addr);
                debug_assert_eq!(cnt, usize::from(rsp_cnt));
                Ok(Ok(()))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn masked_write_register(
        &self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        match self
            .call(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?
        {
            Ok(Response::MaskWriteRegister(rsp_addr, rsp_and_mask, rsp_or_mask)) => {
                debug_assert_eq!(addr, rsp_addr);
                debug_assert_eq!(and_mask, rsp_and_mask);
                debug_assert_eq!(or_mask, rsp_or_mask);
                Ok(Ok(()))
            }
            Ok(rsp) => Err(mismatch(&rsp)),
            Err(exception) => Ok(Err(exception)),
        }
    }
}

/// Validate and encode the PDU of a request.
pub(crate) fn encode_request(request: &Request<'_>) -> std::result::Result<Bytes, MalformedPdu> {
    request.validate()?;
    codec::encode_request(request)
}

pub(crate) fn into_result(pdu: ResponsePdu) -> std::result::Result<Response, ExceptionCode> {
    pdu.0.map_err(|rsp| rsp.exception)
}
