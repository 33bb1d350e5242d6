// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::Error;

/// Status word returned by the status-reply family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Error,
    CommandError,
    ReadError,
    WriteError,
    MemoryRangeError,
    MemoryAlignError,
    SizeError,
    SizeAlignError,
    AddressAlignError,
}

impl Status {
    pub const fn code(self) -> u32 {
        match self {
            Status::Success => 0,
            Status::Error => 1,
            Status::CommandError => 2,
            Status::ReadError => 3,
            Status::WriteError => 4,
            Status::MemoryRangeError => 5,
            Status::MemoryAlignError => 6,
            Status::SizeError => 7,
            Status::SizeAlignError => 8,
            Status::AddressAlignError => 9,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl TryFrom<u32> for Status {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        let status = match value {
            0 => Status::Success,
            1 => Status::Error,
            2 => Status::CommandError,
            3 => Status::ReadError,
            4 => Status::WriteError,
            5 => Status::MemoryRangeError,
            6 => Status::MemoryAlignError,
            7 => Status::SizeError,
            8 => Status::SizeAlignError,
            9 => Status::AddressAlignError,
            other => return Err(Error::UnknownStatus(other)),
        };
        Ok(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::CommandError => "command error",
            Status::ReadError => "read error",
            Status::WriteError => "write error",
            Status::MemoryRangeError => "memory range error",
            Status::MemoryAlignError => "memory alignment error",
            Status::SizeError => "size error",
            Status::SizeAlignError => "size alignment error",
            Status::AddressAlignError => "address alignment error",
        };
        f.write_str(text)
    }
}

/// Execution state of one channel's sequencer, as reported by the AWG core
/// status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequencerStatus {
    Idle,
    WaitTrigger,
    WaitCounter,
    OutputWave,
    WaitDdr,
    ReadDdrToRam,
    ReadDdrToFifo,
    Other(u8),
}

impl SequencerStatus {
    /// Decode from the raw status register; the state lives in bits 1..5.
    pub fn from_register(raw: u32) -> Self {
        match ((raw >> 1) & 0xF) as u8 {
            0 => SequencerStatus::Idle,
            2 | 15 => SequencerStatus::WaitTrigger,
            7 => SequencerStatus::OutputWave,
            8 => SequencerStatus::WaitCounter,
            9 => SequencerStatus::WaitDdr,
            10 => SequencerStatus::ReadDdrToRam,
            11 => SequencerStatus::ReadDdrToFifo,
            other => SequencerStatus::Other(other),
        }
    }

    pub fn is_busy(self) -> bool {
        self != SequencerStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for code in 0..10 {
            let status = Status::try_from(code).expect("known status");
            assert_eq!(status.code(), code);
        }
        assert_eq!(Status::try_from(10), Err(Error::UnknownStatus(10)));
        assert!(Status::Success.is_success());
    }

    #[test]
    fn test_sequencer_status() {
        assert_eq!(SequencerStatus::from_register(0), SequencerStatus::Idle);
        assert_eq!(
            SequencerStatus::from_register(2 << 1),
            SequencerStatus::WaitTrigger
        );
        assert_eq!(
            SequencerStatus::from_register((15 << 1) | 1),
            SequencerStatus::WaitTrigger
        );
        assert_eq!(
            SequencerStatus::from_register(10 << 1),
            SequencerStatus::ReadDdrToRam
        );
        assert_eq!(
            SequencerStatus::from_register(5 << 1),
            SequencerStatus::Other(5)
        );
        assert!(!SequencerStatus::Idle.is_busy());
    }
}
