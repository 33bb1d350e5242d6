// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Wave unit compiler.
//!
//! Units are laid out back to back in wave RAM. Every unit becomes one
//! playback instruction whose delay covers the gap to the previous unit in
//! whole clocks; the sub-clock remainder is padded with zero codes in front
//! of the unit and the unit is padded at the end to a whole clock.

use awgboard_isa::{DeviceTraits, Instruction, Opcode};
use awgboard_log::debug;

use crate::program::CommandProgram;
use crate::quantize::{Quantizer, SampleBuffer};
use crate::wave_unit::{WaveKind, WaveUnit};
use crate::{Error, Result};

/// Output of [`Compiler::compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledWave {
    pub samples: SampleBuffer,
    pub program: CommandProgram,
}

pub struct Compiler {
    traits: &'static DeviceTraits,
    quantizer: Quantizer,
}

impl Compiler {
    pub fn new(traits: &'static DeviceTraits, quantizer: Quantizer) -> Self {
        Compiler { traits, quantizer }
    }

    pub fn traits(&self) -> &'static DeviceTraits {
        self.traits
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// Compile `units` for one channel. With `continuous` the whole buffer
    /// plays free running, without waiting for a trigger.
    pub fn compile(&self, units: &[WaveUnit], continuous: bool) -> Result<CompiledWave> {
        if units.is_empty() {
            return Err(Error::precondition("Nothing to compile: no wave units"));
        }
        let shift = self.traits.clock_shift();
        let clock_mask = i64::from(self.traits.samples_per_clock) - 1;
        let capacity_clocks = (self.traits.max_sample_count >> shift) as u64;

        let mut samples = SampleBuffer::new(self.quantizer.format);
        let mut program = CommandProgram::new();
        let mut cursor: i64 = 0;
        for (index, unit) in units.iter().enumerate() {
            let codes = self.quantizer.quantize(&unit.samples, unit.mark.as_deref())?;
            if codes.len() < self.traits.min_wave_unit_samples {
                return Err(Error::UnitTooShort {
                    unit: index,
                    samples: codes.len(),
                    minimum: self.traits.min_wave_unit_samples,
                });
            }
            let opcode = match unit.kind {
                WaveKind::Trigger => {
                    cursor = 0;
                    Opcode::Trig
                }
                WaveKind::Continuous => Opcode::Continue,
                WaveKind::Delayed => Opcode::Count,
            };

            let start_sample = (unit.start_time * self.traits.sampling_rate).round() as i64;
            let gap = start_sample - cursor;
            if gap < 0 {
                return Err(Error::TimeOverlap {
                    unit: index,
                    overlap: gap.unsigned_abs(),
                });
            }
            let delay = gap >> shift;
            let lead = (gap & clock_mask) as usize;

            let start_addr = (samples.len() >> shift) as u64;
            let unit_start = samples.len();
            samples.push_zeros(lead);
            samples.extend_from_slice(&codes);
            samples.pad_to_multiple(usize::from(self.traits.samples_per_clock));
            let unit_len = samples.len() - unit_start;
            let length = (unit_len >> shift) as u64;

            if start_addr + length > capacity_clocks {
                return Err(Error::CapacityExceeded {
                    what: "Wave RAM samples",
                    needed: (start_addr + length) << shift,
                    capacity: self.traits.max_sample_count as u64,
                });
            }
            let delay = u16::try_from(delay).map_err(|_| Error::DelayTooLarge {
                cycles: delay as u64,
            })?;
            // Both fit 16 bits, the capacity is below 2^16 clocks.
            program.push(Instruction::play(
                opcode,
                start_addr as u16,
                length as u16,
                delay,
            ));
            cursor += (i64::from(delay) << shift) + unit_len as i64;
        }

        let max_instructions = self.traits.max_instruction_count;
        let program = if continuous {
            let length = (samples.len() >> shift) as u16;
            CommandProgram::replicated(
                Instruction::play(Opcode::Continue, 0, length, 0),
                max_instructions,
            )
        } else if let [single] = program.instructions() {
            CommandProgram::replicated(*single, max_instructions)
        } else {
            program.check_limit(max_instructions)?;
            program.set_stop_on_last();
            program
        };
        debug!(
            "Compiled {} wave units into {} samples and {} instructions",
            units.len(),
            samples.len(),
            program.len()
        );
        Ok(CompiledWave { samples, program })
    }
}
