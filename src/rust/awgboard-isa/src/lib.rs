// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register and memory map of the AWG and trigger boards, together with the
//! microcode executed by the on-board sequencer.

pub mod bank;
pub mod device_traits;
pub mod instruction;
pub mod opcode;
pub mod registers;
pub mod status;
pub mod wire;

pub use device_traits::{DeviceKind, DeviceTraits};
pub use instruction::Instruction;
pub use opcode::{InstructionFlags, Opcode};
pub use status::{SequencerStatus, Status};
pub use wire::{Direction, WireCommand};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown sequencer opcode: {0:#06x}")]
    UnknownOpcode(u16),
    #[error("Unknown wire command: {0:#010x}")]
    UnknownCommand(u32),
    #[error("Unknown status code: {0}")]
    UnknownStatus(u32),
    #[error("Unknown register direction: {0}")]
    UnknownDirection(u8),
    #[error("Instruction must be {expected} bytes, got {actual}")]
    InstructionLength { expected: usize, actual: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
