// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use awgboard_isa::Instruction;
use awgboard_isa::instruction::program_to_bytes;

use crate::{Error, Result};

/// Instructions of one channel's command RAM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandProgram {
    instructions: Vec<Instruction>,
}

impl CommandProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// `instruction` repeated `count` times; fills the command RAM so that a
    /// single trigger plays on every trigger.
    pub fn replicated(instruction: Instruction, count: usize) -> Self {
        CommandProgram {
            instructions: vec![instruction; count],
        }
    }

    /// Append and return the index of the new instruction.
    pub fn push(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn set_stop_on_last(&mut self) {
        if let Some(last) = self.instructions.last_mut() {
            *last = last.with_stop();
        }
    }

    pub fn check_limit(&self, limit: usize) -> Result<()> {
        if self.instructions.len() > limit {
            return Err(Error::TooManyInstructions {
                count: self.instructions.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Command RAM image.
    pub fn to_bytes(&self) -> Vec<u8> {
        program_to_bytes(&self.instructions)
    }
}

impl From<Vec<Instruction>> for CommandProgram {
    fn from(instructions: Vec<Instruction>) -> Self {
        CommandProgram { instructions }
    }
}

impl fmt::Display for CommandProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{index:4}: {instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awgboard_isa::Opcode;

    #[test]
    fn test_stop_on_last() {
        let mut program = CommandProgram::new();
        assert_eq!(program.push(Instruction::play(Opcode::Trig, 0, 4, 0)), 0);
        assert_eq!(program.push(Instruction::play(Opcode::Count, 4, 4, 10)), 1);
        program.set_stop_on_last();
        assert!(!program.instructions()[0].is_stop());
        assert!(program.instructions()[1].is_stop());
        assert_eq!(program.to_bytes().len(), 16);
    }

    #[test]
    fn test_limit() {
        let program = CommandProgram::replicated(Instruction::play(Opcode::Trig, 0, 4, 0), 9);
        assert!(program.check_limit(9).is_ok());
        assert!(matches!(
            program.check_limit(8),
            Err(Error::TooManyInstructions { count: 9, limit: 8 })
        ));
    }
}
