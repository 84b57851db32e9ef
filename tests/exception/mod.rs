// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future;

use modbus_engine::{
    client::{Client, Reader as _, Writer as _},
    server::Service,
    ExceptionCode, Request, Response, UnitRequest,
};

pub struct TestService {}

impl TestService {
    fn handle(&self, req: Request<'static>) -> Result<Response, ExceptionCode> {
        use Request::*;

        match req {
            ReadCoils(_, _) => Err(ExceptionCode::Acknowledge),
            ReadDiscreteInputs(_, _) => Err(ExceptionCode::GatewayPathUnavailable),
            WriteSingleCoil(_, _) => Err(ExceptionCode::GatewayTargetDevice),
            WriteMultipleCoils(_, _) => Err(ExceptionCode::IllegalDataAddress),
            ReadInputRegisters(_, _) => Err(ExceptionCode::IllegalDataValue),
            ReadHoldingRegisters(_, _) => Err(ExceptionCode::IllegalFunction),
            WriteSingleRegister(_, _) => Err(ExceptionCode::MemoryParityError),
            WriteMultipleRegisters(_, _) => Err(ExceptionCode::ServerDeviceBusy),
            MaskWriteRegister(_, _, _) => Err(ExceptionCode::ServerDeviceFailure),
            Unsupported(_) => unreachable!("answered by the dispatcher"),
        }
    }
}

impl Service for TestService {
    type Exception = ExceptionCode;

    type Future = future::Ready<Result<Response, ExceptionCode>>;

    fn call(&self, req: UnitRequest<'static>) -> Self::Future {
        future::ready(self.handle(req.request))
    }
}

pub async fn check_client(client: &impl Client) {
    let response = client.read_coils(0x00, 2).await.unwrap();
    assert!(matches!(response, Err(ExceptionCode::Acknowledge)));

    let response = client
        .read_discrete_inputs(0x00, 2)
        .await
        .expect("communication failed");
    assert!(matches!(
        response,
        Err(ExceptionCode::GatewayPathUnavailable)
    ));

    let response = client
        .write_single_coil(0x00, true)
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::GatewayTargetDevice)));

    let response = client
        .write_multiple_coils(0x00, &[true])
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::IllegalDataAddress)));

    let response = client
        .read_input_registers(0x00, 2)
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::IllegalDataValue)));

    let response = client
        .read_holding_registers(0x00, 2)
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::IllegalFunction)));

    let response = client
        .write_single_register(0x00, 42)
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::MemoryParityError)));

    let response = client
        .write_multiple_registers(0x00, &[42])
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::ServerDeviceBusy)));

    let response = client
        .masked_write_register(0x00, 0, 0)
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::ServerDeviceFailure)));

    // Read Device Identification, not handled by the service.
    let response = client
        .call(Request::Unsupported(0x2B))
        .await
        .expect("communication failed");
    assert!(matches!(response, Err(ExceptionCode::IllegalFunction)));
}
