// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use crate::unit::UnitId;

pub type TransactionId = u16;

/// The only protocol identifier defined for _Modbus_.
pub const PROTOCOL_ID: u16 = 0x0000;

/// MBAP header without the length field.
///
/// The length is derived from the PDU when a [`Frame`] is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub protocol_id: u16,
    pub unit_id: UnitId,
}

impl Header {
    #[must_use]
    pub const fn new(transaction_id: TransactionId, unit_id: UnitId) -> Self {
        Self {
            transaction_id,
            protocol_id: PROTOCOL_ID,
            unit_id,
        }
    }
}

/// A _Modbus_ TCP frame: MBAP header followed by the raw PDU bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub pdu: Bytes,
}

impl Frame {
    /// Reply on the same transaction with another PDU.
    #[must_use]
    pub fn reply(&self, pdu: Bytes) -> Self {
        Self {
            header: self.header,
            pdu,
        }
    }
}
