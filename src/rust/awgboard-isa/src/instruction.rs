// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Fixed-width sequencer instruction.
//!
//! Every instruction is four 16 bit words, little-endian on the wire:
//!
//! ```text
//!  word0        word1        word2           word3
//!  start addr   length       delay / count   opcode << 11 | flags
//! ```
//!
//! Addresses and lengths of playback instructions are in clock units.
//! `READ2RAM` packs the DDR address into word0 (bits 10..26 of the byte
//! address) and word1 (bits 26.. plus burst code and auto-increment flag).

use std::fmt;

use crate::opcode::{InstructionFlags, Opcode};
use crate::{Error, Result};

pub const INSTRUCTION_WORDS: usize = 4;
pub const INSTRUCTION_BYTES: usize = 2 * INSTRUCTION_WORDS;

/// Word1 flag of `READ2RAM`: advance the DDR address on every execution.
pub const READ_AUTO_INCREMENT: u16 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub operands: [u16; 3],
    pub opcode: Opcode,
    pub flags: InstructionFlags,
}

impl Instruction {
    pub fn new(operands: [u16; 3], opcode: Opcode) -> Self {
        Instruction {
            operands,
            opcode,
            flags: InstructionFlags::NONE,
        }
    }

    /// Output `length` clocks starting at `start_addr`.
    pub fn play(opcode: Opcode, start_addr: u16, length: u16, delay: u16) -> Self {
        Instruction::new([start_addr, length, delay], opcode)
    }

    /// Copy `length_kb` KiB from DDR byte address `ddr_addr` into wave RAM.
    pub fn read_to_ram(ddr_addr: u64, length_kb: u16, burst: u8, auto_increment: bool) -> Self {
        let mut high = ((ddr_addr >> 26) as u16) | ((burst as u16) << 8);
        if auto_increment {
            high |= READ_AUTO_INCREMENT;
        }
        Instruction::new(
            [((ddr_addr >> 10) & 0xFFFF) as u16, high, length_kb],
            Opcode::Read2Ram,
        )
    }

    /// Idle for `cycles` sequencer clocks.
    pub fn wait_cycles(cycles: u32) -> Self {
        Instruction::new(
            [(cycles & 0xFFFF) as u16, (cycles >> 16) as u16, 0],
            Opcode::NullCnt,
        )
    }

    pub fn loop_start(count: u16, inner: bool) -> Self {
        Instruction::new([0, 0, count], Opcode::NullLoopStart).with_inner_loop(inner)
    }

    /// Close a loop; `target` is the index of the matching loop start.
    pub fn loop_end(target: u16, inner: bool) -> Self {
        Instruction::new([0, 0, target], Opcode::NullLoopEnd).with_inner_loop(inner)
    }

    fn with_inner_loop(mut self, inner: bool) -> Self {
        if inner {
            self.flags |= InstructionFlags::INNER_LOOP;
        }
        self
    }

    pub fn with_stop(mut self) -> Self {
        self.flags |= InstructionFlags::STOP;
        self
    }

    pub fn is_stop(&self) -> bool {
        self.flags.contains(InstructionFlags::STOP)
    }

    pub fn start_addr(&self) -> u16 {
        self.operands[0]
    }

    pub fn length(&self) -> u16 {
        self.operands[1]
    }

    pub fn delay(&self) -> u16 {
        self.operands[2]
    }

    pub fn encode(&self) -> [u16; INSTRUCTION_WORDS] {
        let [a, b, c] = self.operands;
        [a, b, c, self.opcode.bits() | self.flags.bits()]
    }

    pub fn decode(words: [u16; INSTRUCTION_WORDS]) -> Result<Self> {
        let (opcode, flags) = Opcode::split_control(words[3])?;
        Ok(Instruction {
            operands: [words[0], words[1], words[2]],
            opcode,
            flags,
        })
    }

    pub fn to_le_bytes(&self) -> [u8; INSTRUCTION_BYTES] {
        let mut out = [0u8; INSTRUCTION_BYTES];
        for (chunk, word) in out.chunks_exact_mut(2).zip(self.encode()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INSTRUCTION_BYTES {
            return Err(Error::InstructionLength {
                expected: INSTRUCTION_BYTES,
                actual: bytes.len(),
            });
        }
        let mut words = [0u16; INSTRUCTION_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Instruction::decode(words)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.operands;
        write!(f, "{} [{a:#06x}, {b:#06x}, {c:#06x}]", self.opcode)?;
        if self.flags.contains(InstructionFlags::INNER_LOOP) {
            f.write_str(" inner")?;
        }
        if self.is_stop() {
            f.write_str(" stop")?;
        }
        Ok(())
    }
}

/// Serialize a program the way the command RAM expects it.
pub fn program_to_bytes(instructions: &[Instruction]) -> Vec<u8> {
    instructions
        .iter()
        .flat_map(|instruction| instruction.to_le_bytes())
        .collect()
}

/// Parse a command RAM image. Trailing bytes that do not form a whole
/// instruction are rejected.
pub fn program_from_bytes(bytes: &[u8]) -> Result<Vec<Instruction>> {
    if !bytes.len().is_multiple_of(INSTRUCTION_BYTES) {
        return Err(Error::InstructionLength {
            expected: INSTRUCTION_BYTES,
            actual: bytes.len() % INSTRUCTION_BYTES,
        });
    }
    bytes
        .chunks_exact(INSTRUCTION_BYTES)
        .map(Instruction::from_le_bytes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_playback_encoding() {
        let instruction = Instruction::play(Opcode::Trig, 0, 4, 0);
        assert_eq!(instruction.encode(), [0, 4, 0, 0x4000]);
        assert_eq!(
            instruction.to_le_bytes(),
            [0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x40]
        );
    }

    #[test]
    fn test_read_to_ram_packing() {
        // 65 MiB: word0 keeps bits 10..26, word1 gets the bits above.
        let addr = 65 << 20;
        let instruction = Instruction::read_to_ram(addr, 4, 0x3F, true);
        assert_eq!(
            instruction.encode(),
            [(((65 << 20) >> 10) & 0xFFFF) as u16, 0x3F81, 4, 0x5000]
        );
    }

    #[test]
    fn test_wait_and_stop() {
        let instruction = Instruction::wait_cycles(0x0001_2345).with_stop();
        assert_eq!(instruction.encode(), [0x2345, 0x0001, 0, 0xA800]);
        assert!(instruction.is_stop());
    }

    #[test]
    fn test_loop_flags() {
        assert_eq!(Instruction::loop_start(100, true).encode(), [0, 0, 100, 0x3100]);
        assert_eq!(Instruction::loop_end(2, false).encode(), [0, 0, 2, 0x3800]);
    }

    #[test]
    fn test_program_bytes() {
        let program = vec![
            Instruction::read_to_ram(0, 1, 0x0F, false),
            Instruction::play(Opcode::Count, 0, 16, 10).with_stop(),
        ];
        let bytes = program_to_bytes(&program);
        assert_eq!(bytes.len(), 16);
        assert_eq!(program_from_bytes(&bytes), Ok(program));
        assert!(program_from_bytes(&bytes[..10]).is_err());
    }
}
