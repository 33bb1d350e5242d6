// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Framing constants shared by both transport families.
//!
//! Datagram family (AWG board), little-endian:
//!
//! ```text
//!  0        8                                             1032
//!  +--------+---------------------------------------------+
//!  | header |  payload: 128 x 8 byte records or 1 KiB data |
//!  +--------+---------------------------------------------+
//! ```
//!
//! Status-reply family (trigger board), big-endian: a 16 byte command
//! `(command, bank, address, data)` answered by a 20 byte reply
//! `(command, bank, aux, data, status)`.

use crate::Error;

/// Bytes preceding the payload in every datagram.
pub const FRAME_HEADER_LEN: usize = 8;
/// Payload bytes of one bulk frame.
pub const FRAME_PAYLOAD_LEN: usize = 1024;
/// Total size of one datagram on the wire.
pub const FRAME_LEN: usize = FRAME_HEADER_LEN + FRAME_PAYLOAD_LEN;

/// Size of one register record.
pub const REGISTER_RECORD_LEN: usize = 8;
/// Number of record slots in a register datagram. A batch must stay strictly
/// below this count.
pub const REGISTER_RECORD_SLOTS: usize = FRAME_PAYLOAD_LEN / REGISTER_RECORD_LEN;
/// Filler for unused register record slots.
pub const FILL_RECORD: [u8; REGISTER_RECORD_LEN] = [0xFF; REGISTER_RECORD_LEN];

/// Marks a RAM frame as a read request.
pub const RAM_READ_FLAG: u8 = 0x80;

pub const STATUS_COMMAND_LEN: usize = 16;
pub const STATUS_REPLY_LEN: usize = 20;

/// Command words of the status-reply family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum WireCommand {
    ReadReg = 0x5555_5555,
    WriteReg = 0xAAAA_AAAA,
    ReadMem = 0xAA55_55AA,
    WriteMem = 0x55AA_AA55,
}

impl WireCommand {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for WireCommand {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x5555_5555 => Ok(WireCommand::ReadReg),
            0xAAAA_AAAA => Ok(WireCommand::WriteReg),
            0xAA55_55AA => Ok(WireCommand::ReadMem),
            0x55AA_AA55 => Ok(WireCommand::WriteMem),
            other => Err(Error::UnknownCommand(other)),
        }
    }
}

/// Direction byte of a register record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Read = 0,
    Write = 1,
}

impl TryFrom<u8> for Direction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::Read),
            1 => Ok(Direction::Write),
            other => Err(Error::UnknownDirection(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        assert_eq!(FRAME_LEN, 1032);
        assert_eq!(REGISTER_RECORD_SLOTS, 128);
    }

    #[test]
    fn test_command_codes() {
        for command in [
            WireCommand::ReadReg,
            WireCommand::WriteReg,
            WireCommand::ReadMem,
            WireCommand::WriteMem,
        ] {
            assert_eq!(WireCommand::try_from(command.code()), Ok(command));
        }
        assert_eq!(
            WireCommand::try_from(0x1234),
            Err(Error::UnknownCommand(0x1234))
        );
    }
}
