// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{io, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{frame::FunctionCode, unit::UnitId, ExceptionCode};

/// A structural violation found while decoding a PDU.
///
/// Fatal only for the single decode, the connection is not affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed PDU: {message}")]
pub struct MalformedPdu {
    pub message: String,
}

impl MalformedPdu {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The CRC of an RTU frame does not match its content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("CRC mismatch: expected 0x{expected:04X}, received 0x{actual:04X}")]
pub struct CrcMismatch {
    /// The complete offending frame, including the trailing CRC bytes.
    pub frame: Bytes,
    pub expected: u16,
    pub actual: u16,
}

/// Violations of the request/response protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty response PDU")]
    EmptyResponse,

    /// The function code of the response does not match the request.
    #[error("function code mismatch: expected {expected}, received 0x{actual:02X}")]
    FunctionCodeMismatch { expected: FunctionCode, actual: u8 },

    /// The response was sent by another unit than the one addressed.
    #[error("header mismatch: expected unit {expected}, received unit {actual}")]
    HeaderMismatch { expected: UnitId, actual: UnitId },

    #[error("invalid protocol id: 0x{0:04X}")]
    InvalidProtocolId(u16),
}

/// Failure of the service layer while handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Answered with an exception response.
    #[error("exception: {0}")]
    Exception(ExceptionCode),

    /// Not answerable, the connection is closed.
    #[error("service failure: {0}")]
    Failure(String),
}

impl From<ExceptionCode> for ExecutionError {
    fn from(from: ExceptionCode) -> Self {
        Self::Exception(from)
    }
}

/// _Modbus_ protocol error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Malformed(#[from] MalformedPdu),

    #[error(transparent)]
    Crc(#[from] CrcMismatch),

    /// No response within the deadline.
    #[error("no response within {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Requests for unknown units are dropped silently by servers.
    #[error("unknown unit id: {0}")]
    UnknownUnitId(UnitId),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// I/O error of the underlying transport.
    #[error(transparent)]
    Transport(#[from] io::Error),

    #[error("not connected")]
    NotConnected,

    /// The channel closed while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Duplicate an error for multiple waiters.
    ///
    /// I/O errors are not `Clone`, only their kind and message survive.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Malformed(err) => Self::Malformed(err.clone()),
            Self::Crc(err) => Self::Crc(err.clone()),
            Self::Timeout { elapsed } => Self::Timeout { elapsed: *elapsed },
            Self::Protocol(err) => Self::Protocol(err.clone()),
            Self::UnknownUnitId(unit_id) => Self::UnknownUnitId(*unit_id),
            Self::Execution(err) => Self::Execution(err.clone()),
            Self::Transport(err) => Self::Transport(io::Error::new(err.kind(), err.to_string())),
            Self::NotConnected => Self::NotConnected,
            Self::ConnectionClosed => Self::ConnectionClosed,
        }
    }
}

/// Specialized [`std::result::Result`] type for client calls.
///
/// The outer error is a transport/protocol failure, the inner error
/// an exception that the remote device responded with.
pub type Result<T> = std::result::Result<std::result::Result<T, ExceptionCode>, Error>;
