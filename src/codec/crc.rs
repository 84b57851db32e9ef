// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus CRC16 (reflected polynomial 0xA001, initial value 0xFFFF).

use bytes::{BufMut as _, BytesMut};

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Size of the checksum trailing an RTU frame.
pub const CRC_SIZE: usize = 2;

/// Calculate the checksum of `data`.
#[must_use]
pub fn calc_crc(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Append the checksum of the buffer content in little-endian order.
pub fn append_crc(buf: &mut BytesMut) {
    let crc = calc_crc(buf);
    buf.put_u16_le(crc);
}

/// Split off and verify the trailing checksum of `frame`.
///
/// Returns `Err((expected, actual))` if it doesn't match, or if the
/// frame is too short to carry a checksum at all.
pub fn verify_crc(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < CRC_SIZE {
        return Err((calc_crc(frame), 0));
    }
    let (data, crc) = frame.split_at(frame.len() - CRC_SIZE);
    let expected = calc_crc(data);
    let actual = u16::from_le_bytes([crc[0], crc[1]]);
    if expected == actual {
        Ok(())
    } else {
        Err((expected, actual))
    }
}
