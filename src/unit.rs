// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unit identifiers

/// A single byte for addressing a (sub-)device behind a connection.
pub type UnitId = u8;

/// The special address for sending a broadcast message to all
/// connected devices at once. Broadcast messages are one-way,
/// i.e. a request without a response.
pub const BROADCAST: UnitId = 0;

/// The minimum address of a single device.
pub const MIN_DEVICE: UnitId = 1;

/// The maximum address of a single device.
pub const MAX_DEVICE: UnitId = 247;

/// The reserved address for sending a message to a directly
/// connected Modbus TCP device, i.e. if not forwarded through
/// a TCP/RTU gateway according to the unit identifier.
///
/// [MODBUS Messaging on TCP/IP Implementation Guide](http://www.modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 23
/// "On TCP/IP, the MODBUS server is addressed using its IP address; therefore,
/// the MODBUS Unit Identifier is useless. The value 0xFF has to be used."
pub const TCP_DEVICE: UnitId = 255;

#[must_use]
pub const fn is_broadcast(unit_id: UnitId) -> bool {
    unit_id == BROADCAST
}

#[must_use]
pub const fn is_single_device(unit_id: UnitId) -> bool {
    unit_id >= MIN_DEVICE && unit_id <= MAX_DEVICE
}

/// Select a unit for all subsequent outgoing requests.
pub trait UnitContext {
    fn set_unit_id(&mut self, unit_id: UnitId);
}
