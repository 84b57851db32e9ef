// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus servers

use std::{future::Future, ops::Deref};

use crate::{
    error::ExecutionError,
    frame::{Response, UnitRequest},
    unit::UnitId,
};

pub(crate) mod dispatch;

mod handler;
pub use self::handler::{HandlerService, RequestHandler};

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

/// A Modbus server service.
///
/// Requests with unsupported function codes never reach the service,
/// they are answered with [`crate::ExceptionCode::IllegalFunction`].
pub trait Service: Send + Sync + 'static {
    /// Exceptional responses sent by the service.
    type Exception: Into<ExecutionError> + Send;

    /// The future response value.
    type Future: Future<Output = Result<Response, Self::Exception>> + Send;

    /// Process the request and return the response asynchronously.
    fn call(&self, req: UnitRequest<'static>) -> Self::Future;

    /// Requests for unknown units are dropped without a response.
    fn is_known_unit(&self, unit_id: UnitId) -> bool {
        let _ = unit_id;
        true
    }
}

impl<D> Service for D
where
    D: Deref + Send + Sync + 'static,
    D::Target: Service,
{
    type Exception = <D::Target as Service>::Exception;
    type Future = <D::Target as Service>::Future;

    /// A forwarding blanket impl to support smart pointers around [`Service`].
    fn call(&self, req: UnitRequest<'static>) -> Self::Future {
        self.deref().call(req)
    }

    fn is_known_unit(&self, unit_id: UnitId) -> bool {
        self.deref().is_known_unit(unit_id)
    }
}
