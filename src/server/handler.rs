// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future;

use super::Service;
use crate::{
    frame::{Address, Coil, Quantity, Request, Response, UnitRequest, Word},
    unit::UnitId,
    ExceptionCode,
};

/// Synchronous request handling, one method per function code.
///
/// Every method that is not overridden answers with
/// [`ExceptionCode::IllegalFunction`].
pub trait RequestHandler: Send + Sync + 'static {
    /// Requests for unknown units are dropped without a response.
    fn is_known_unit(&self, unit_id: UnitId) -> bool {
        let _ = unit_id;
        true
    }

    fn read_coils(
        &self,
        unit_id: UnitId,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Coil>, ExceptionCode> {
        let _ = (unit_id, address, quantity);
        Err(ExceptionCode::IllegalFunction)
    }

    fn read_discrete_inputs(
        &self,
        unit_id: UnitId,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Coil>, ExceptionCode> {
        let _ = (unit_id, address, quantity);
        Err(ExceptionCode::IllegalFunction)
    }

    fn read_holding_registers(
        &self,
        unit_id: UnitId,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, ExceptionCode> {
        let _ = (unit_id, address, quantity);
        Err(ExceptionCode::IllegalFunction)
    }

    fn read_input_registers(
        &self,
        unit_id: UnitId,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, ExceptionCode> {
        let _ = (unit_id, address, quantity);
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_single_coil(
        &self,
        unit_id: UnitId,
        address: Address,
        coil: Coil,
    ) -> Result<(), ExceptionCode> {
        let _ = (unit_id, address, coil);
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_single_register(
        &self,
        unit_id: UnitId,
        address: Address,
        word: Word,
    ) -> Result<(), ExceptionCode> {
        let _ = (unit_id, address, word);
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_multiple_coils(
        &self,
        unit_id: UnitId,
        address: Address,
        coils: &[Coil],
    ) -> Result<(), ExceptionCode> {
        let _ = (unit_id, address, coils);
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_multiple_registers(
        &self,
        unit_id: UnitId,
        address: Address,
        words: &[Word],
    ) -> Result<(), ExceptionCode> {
        let _ = (unit_id, address, words);
        Err(ExceptionCode::IllegalFunction)
    }

    fn mask_write_register(
        &self,
        unit_id: UnitId,
        address: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<(), ExceptionCode> {
        let _ = (unit_id, address, and_mask, or_mask);
        Err(ExceptionCode::IllegalFunction)
    }
}

/// Adapts a [`RequestHandler`] to the [`Service`] trait.
///
/// Quantities outside of the protocol limits are answered with
/// [`ExceptionCode::IllegalDataValue`] before the handler is invoked.
#[derive(Debug, Clone, Default)]
pub struct HandlerService<H> {
    handler: H,
}

impl<H> HandlerService<H> {
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }

    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

fn quantity(len: usize) -> Result<Quantity, ExceptionCode> {
    Quantity::try_from(len).map_err(|_| ExceptionCode::IllegalDataValue)
}

impl<H: RequestHandler> HandlerService<H> {
    fn handle(&self, req: UnitRequest<'static>) -> Result<Response, ExceptionCode> {
        let UnitRequest { unit_id, request } = req;
        if let Err(err) = request.validate() {
            log::debug!("Rejecting request for unit {unit_id}: {err}");
            return Err(ExceptionCode::IllegalDataValue);
        }
        let handler = &self.handler;
        match request {
            Request::ReadCoils(address, cnt) => handler
                .read_coils(unit_id, address, cnt)
                .map(Response::ReadCoils),
            Request::ReadDiscreteInputs(address, cnt) => handler
                .read_discrete_inputs(unit_id, address, cnt)
                .map(Response::ReadDiscreteInputs),
            Request::ReadHoldingRegisters(address, cnt) => handler
                .read_holding_registers(unit_id, address, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(address, cnt) => handler
                .read_input_registers(unit_id, address, cnt)
                .map(Response::ReadInputRegisters),
            Request::WriteSingleCoil(address, coil) => handler
                .write_single_coil(unit_id, address, coil)
                .map(|()| Response::WriteSingleCoil(address, coil)),
            Request::WriteSingleRegister(address, word) => handler
                .write_single_register(unit_id, address, word)
                .map(|()| Response::WriteSingleRegister(address, word)),
            Request::WriteMultipleCoils(address, coils) => {
                let cnt = quantity(coils.len())?;
                handler
                    .write_multiple_coils(unit_id, address, &coils)
                    .map(|()| Response::WriteMultipleCoils(address, cnt))
            }
            Request::WriteMultipleRegisters(address, words) => {
                let cnt = quantity(words.len())?;
                handler
                    .write_multiple_registers(unit_id, address, &words)
                    .map(|()| Response::WriteMultipleRegisters(address, cnt))
            }
            Request::MaskWriteRegister(address, and_mask, or_mask) => handler
                .mask_write_register(unit_id, address, and_mask, or_mask)
                .map(|()| Response::MaskWriteRegister(address, and_mask, or_mask)),
            Request::Unsupported(_) => Err(ExceptionCode::IllegalFunction),
        }
    }
}

impl<H: RequestHandler> Service for HandlerService<H> {
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Response, ExceptionCode>>;

    fn call(&self, req: UnitRequest<'static>) -> Self::Future {
        future::ready(self.handle(req))
    }

    fn is_known_unit(&self, unit_id: UnitId) -> bool {
        self.handler.is_known_unit(unit_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, sync::Mutex};

    use super::*;

    #[derive(Default)]
    struct Registers {
        holding: Mutex<Vec<Word>>,
    }

    impl Registers {
        fn with_len(len: usize) -> Self {
            Self {
                holding: Mutex::new(vec![0; len]),
            }
        }

        fn range(&self, address: Address, len: usize) -> Result<std::ops::Range<usize>, ExceptionCode> {
            let start = usize::from(address);
            let end = start + len;
            if end > self.holding.lock().unwrap().len() {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            Ok(start..end)
        }
    }

    impl RequestHandler for Registers {
        fn is_known_unit(&self, unit_id: UnitId) -> bool {
            unit_id == 1
        }

        fn read_holding_registers(
            &self,
            _: UnitId,
            address: Address,
            quantity: Quantity,
        ) -> Result<Vec<Word>, ExceptionCode> {
            let range = self.range(address, quantity.into())?;
            Ok(self.holding.lock().unwrap()[range].to_vec())
        }

        fn write_multiple_registers(
            &self,
            _: UnitId,
            address: Address,
            words: &[Word],
        ) -> Result<(), ExceptionCode> {
            let range = self.range(address, words.len())?;
            self.holding.lock().unwrap()[range].copy_from_slice(words);
            Ok(())
        }
    }

    fn call(
        service: &HandlerService<Registers>,
        request: Request<'static>,
    ) -> Result<Response, ExceptionCode> {
        futures::executor::block_on(service.call(UnitRequest {
            unit_id: 1,
            request,
        }))
    }

    #[test]
    fn write_then_read() {
        let service = HandlerService::new(Registers::with_len(8));
        let rsp = call(
            &service,
            Request::WriteMultipleRegisters(2, Cow::Owned(vec![0xAA, 0xBB])),
        );
        assert_eq!(rsp, Ok(Response::WriteMultipleRegisters(2, 2)));
        let rsp = call(&service, Request::ReadHoldingRegisters(1, 3));
        assert_eq!(rsp, Ok(Response::ReadHoldingRegisters(vec![0, 0xAA, 0xBB])));
    }

    #[test]
    fn illegal_data_address() {
        let service = HandlerService::new(Registers::with_len(8));
        let rsp = call(&service, Request::ReadHoldingRegisters(7, 2));
        assert_eq!(rsp, Err(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn illegal_data_value() {
        let service = HandlerService::new(Registers::with_len(8));
        let rsp = call(&service, Request::ReadHoldingRegisters(0, 0));
        assert_eq!(rsp, Err(ExceptionCode::IllegalDataValue));
        let rsp = call(&service, Request::ReadHoldingRegisters(0, 126));
        assert_eq!(rsp, Err(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn not_implemented_is_illegal_function() {
        let service = HandlerService::new(Registers::default());
        let rsp = call(&service, Request::WriteSingleCoil(0, true));
        assert_eq!(rsp, Err(ExceptionCode::IllegalFunction));
        let rsp = call(&service, Request::MaskWriteRegister(0, 0xF2, 0x25));
        assert_eq!(rsp, Err(ExceptionCode::IllegalFunction));
    }

    #[test]
    fn known_units() {
        let service = HandlerService::new(Registers::default());
        assert!(service.is_known_unit(1));
        assert!(!service.is_known_unit(2));
    }
}
