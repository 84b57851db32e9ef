// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use crate::unit::UnitId;

/// A _Modbus_ RTU frame with the CRC already verified and stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub unit_id: UnitId,
    pub pdu: Bytes,
}

impl Frame {
    #[must_use]
    pub fn reply(&self, pdu: Bytes) -> Self {
        Self {
            unit_id: self.unit_id,
            pdu,
        }
    }
}
