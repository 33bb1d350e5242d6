// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::Error;

const OPCODE_SHIFT: u16 = 11;
const OPCODE_MASK: u16 = 0xF << OPCODE_SHIFT;

/// Sequencer operation, stored in bits 11..15 of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Play without waiting; used for free-running output.
    Continue,
    /// Idle until the next trigger.
    NullTrig,
    /// Play after a counted delay.
    Count,
    /// Idle for a number of cycles.
    NullCnt,
    NullLoopStart,
    NullLoopEnd,
    /// Play after the next trigger.
    Trig,
    WaitDdr,
    /// Copy a DDR region into the channel's wave RAM.
    Read2Ram,
    Read2Fifo,
}

impl Opcode {
    pub const fn code(self) -> u16 {
        match self {
            Opcode::Continue => 0x0,
            Opcode::NullTrig => 0x3,
            Opcode::Count => 0x4,
            Opcode::NullCnt => 0x5,
            Opcode::NullLoopStart => 0x6,
            Opcode::NullLoopEnd => 0x7,
            Opcode::Trig => 0x8,
            Opcode::WaitDdr => 0x9,
            Opcode::Read2Ram => 0xA,
            Opcode::Read2Fifo => 0xB,
        }
    }

    /// Opcode positioned in the control word.
    pub const fn bits(self) -> u16 {
        self.code() << OPCODE_SHIFT
    }

    pub fn from_code(code: u16) -> Result<Self, Error> {
        let opcode = match code {
            0x0 => Opcode::Continue,
            0x3 => Opcode::NullTrig,
            0x4 => Opcode::Count,
            0x5 => Opcode::NullCnt,
            0x6 => Opcode::NullLoopStart,
            0x7 => Opcode::NullLoopEnd,
            0x8 => Opcode::Trig,
            0x9 => Opcode::WaitDdr,
            0xA => Opcode::Read2Ram,
            0xB => Opcode::Read2Fifo,
            other => return Err(Error::UnknownOpcode(other)),
        };
        Ok(opcode)
    }

    /// Split a control word into opcode and the remaining flag bits.
    pub fn split_control(word: u16) -> Result<(Self, InstructionFlags), Error> {
        let opcode = Opcode::from_code((word & OPCODE_MASK) >> OPCODE_SHIFT)?;
        Ok((opcode, InstructionFlags(word & !OPCODE_MASK)))
    }

    /// True for the opcodes that output samples.
    pub fn is_playback(self) -> bool {
        matches!(self, Opcode::Continue | Opcode::Count | Opcode::Trig)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Continue => "CONTINUE",
            Opcode::NullTrig => "NULL_TRIG",
            Opcode::Count => "COUNT",
            Opcode::NullCnt => "NULL_CNT",
            Opcode::NullLoopStart => "LOOP_S",
            Opcode::NullLoopEnd => "LOOP_E",
            Opcode::Trig => "TRIG",
            Opcode::WaitDdr => "WAIT_DDR",
            Opcode::Read2Ram => "READ2RAM",
            Opcode::Read2Fifo => "READ2FIFO",
        };
        f.write_str(name)
    }
}

/// Flag bits sharing the control word with the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstructionFlags(u16);

impl InstructionFlags {
    pub const NONE: InstructionFlags = InstructionFlags(0);
    /// Last instruction of the program.
    pub const STOP: InstructionFlags = InstructionFlags(0x8000);
    /// Loop start/end belongs to the inner loop level.
    pub const INNER_LOOP: InstructionFlags = InstructionFlags(0x0100);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: InstructionFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InstructionFlags {
    type Output = InstructionFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        InstructionFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for InstructionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_word_values() {
        assert_eq!(Opcode::Trig.bits(), 0x4000);
        assert_eq!(Opcode::Count.bits(), 0x2000);
        assert_eq!(Opcode::Continue.bits(), 0x0000);
        assert_eq!(Opcode::Read2Ram.bits(), 0x5000);
        assert_eq!(Opcode::NullCnt.bits() | InstructionFlags::STOP.bits(), 0xA800);
    }

    #[test]
    fn test_split_control() {
        let word = Opcode::NullLoopStart.bits() | InstructionFlags::INNER_LOOP.bits();
        let (opcode, flags) = Opcode::split_control(word).expect("valid control word");
        assert_eq!(opcode, Opcode::NullLoopStart);
        assert!(flags.contains(InstructionFlags::INNER_LOOP));
        assert!(!flags.contains(InstructionFlags::STOP));

        assert_eq!(
            Opcode::split_control(0x1 << 11),
            Err(Error::UnknownOpcode(0x1))
        );
    }
}
