// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Waveform compiler for the AWG sequencer.
//!
//! Turns wave units into a quantized sample buffer plus the command program
//! that plays it, and generates the replay and sequence programs that stream
//! waves from DDR.

pub mod compile;
pub mod control;
pub mod program;
pub mod quantize;
pub mod sequence;
pub mod wave_unit;

pub use compile::{CompiledWave, Compiler};
pub use control::{ReplayRequest, ReplayVariant};
pub use program::CommandProgram;
pub use quantize::{CodeFormat, Quantizer, SampleBuffer};
pub use sequence::{Goto, Sequence, SequenceStep, StepWave, WaitMode};
pub use wave_unit::{WaveKind, WaveUnit};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Wave unit {unit} starts {overlap} samples before the previous unit ends")]
    TimeOverlap { unit: usize, overlap: u64 },
    #[error("Delay of {cycles} clock cycles does not fit 16 bits")]
    DelayTooLarge { cycles: u64 },
    #[error("Wave unit {unit} has {samples} samples, at least {minimum} are required")]
    UnitTooShort {
        unit: usize,
        samples: usize,
        minimum: usize,
    },
    #[error("{what} needs {needed}, capacity is {capacity}")]
    CapacityExceeded {
        what: &'static str,
        needed: u64,
        capacity: u64,
    },
    #[error("Program of {count} instructions exceeds the limit of {limit}")]
    TooManyInstructions { count: usize, limit: usize },
    #[error("Sample {value} maps outside the 16 bit code range")]
    CodeOutOfRange { value: f64 },
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    Isa(#[from] awgboard_isa::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new(msg: impl std::fmt::Display) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
