// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Command programs that stream waves from DDR into wave RAM.

use awgboard_isa::{DeviceTraits, Instruction, Opcode};
use awgboard_log::{debug, warn};
use indexmap::IndexMap;

use crate::program::CommandProgram;
use crate::sequence::{Sequence, WaitMode};
use crate::{Error, Result};

const KIB: u64 = 1 << 10;

/// Sequencer clocks to wait per KiB read from DDR by the long template.
const WAIT_CYCLES_PER_KIB: u32 = 2500;

/// Index of the outer loop start in the replay template.
const OUTER_LOOP_START: u16 = 2;
/// Index of the inner loop start in the replay template.
const INNER_LOOP_START: u16 = 5;

/// Flavour of the replay template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayVariant {
    /// Short waves; generous DDR settle time.
    Auto,
    /// Long waves; tight DDR settle time.
    Long,
}

impl ReplayVariant {
    /// Largest delay, in seconds, accepted by the auto template.
    pub const AUTO_MAX_DELAY: f64 = 250e-5;
    /// Largest delay, in seconds, accepted by the long template.
    pub const LONG_MAX_DELAY: f64 = 250e-6;

    pub fn max_delay(self) -> f64 {
        match self {
            ReplayVariant::Auto => Self::AUTO_MAX_DELAY,
            ReplayVariant::Long => Self::LONG_MAX_DELAY,
        }
    }

    fn wait_factor(self) -> u32 {
        match self {
            ReplayVariant::Auto => WAIT_CYCLES_PER_KIB * 16,
            ReplayVariant::Long => WAIT_CYCLES_PER_KIB,
        }
    }
}

/// Parameters of a replay program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayRequest {
    /// Bytes per wave; multiple of 1 KiB.
    pub wave_size: u64,
    pub wait: WaitMode,
    /// Number of consecutive waves stored in DDR.
    pub wave_count: u16,
    /// Playbacks of every wave.
    pub repeat_count: u16,
    /// Byte offset of the first wave; multiple of 1 KiB.
    pub wave_addr: u64,
    /// Seconds before a timed playback.
    pub delay: f64,
}

/// DDR read burst code for a transfer of `length` bytes, chosen from the
/// largest power-of-two alignment of the length.
pub fn ddr_burst_code(length: u64) -> u8 {
    if length.is_multiple_of(16 * KIB) {
        0xFF
    } else if length.is_multiple_of(8 * KIB) {
        0x7F
    } else if length.is_multiple_of(4 * KIB) {
        0x3F
    } else if length.is_multiple_of(2 * KIB) {
        0x1F
    } else {
        0x0F
    }
}

fn kib_count(bytes: u64) -> Result<u16> {
    u16::try_from(bytes / KIB).map_err(|_| Error::CapacityExceeded {
        what: "DDR read length in KiB",
        needed: bytes / KIB,
        capacity: u64::from(u16::MAX),
    })
}

fn delay_cycles(delay: f64, traits: &DeviceTraits, round_up: bool) -> Result<u16> {
    let cycles = delay / traits.clock_period();
    let cycles = if round_up { cycles.ceil() } else { cycles.trunc() } as u64;
    u16::try_from(cycles).map_err(|_| Error::DelayTooLarge { cycles })
}

/// Clock units of a wave of `bytes` bytes.
fn wave_clocks(bytes: u64, traits: &DeviceTraits) -> Result<u16> {
    let bytes_per_clock = u64::from(traits.samples_per_clock) * 2;
    let clocks = bytes.div_ceil(bytes_per_clock);
    u16::try_from(clocks).map_err(|_| Error::CapacityExceeded {
        what: "Wave length in clocks",
        needed: clocks,
        capacity: u64::from(u16::MAX),
    })
}

fn playback(wait: WaitMode, length: u16, delay: u16) -> Instruction {
    match wait {
        WaitMode::Trigger => Instruction::play(Opcode::Trig, 0, length, 0),
        WaitMode::Timed => Instruction::play(Opcode::Count, 0, length, delay),
    }
}

/// Ten instruction replay program: prime wave RAM with the first wave, then
/// for each of `wave_count` waves read it (auto-incrementing the DDR
/// address) and play it `repeat_count` times.
pub fn gen_wave_control(
    variant: ReplayVariant,
    traits: &DeviceTraits,
    request: &ReplayRequest,
) -> Result<CommandProgram> {
    let ReplayRequest {
        wave_size,
        wait,
        wave_count,
        repeat_count,
        wave_addr,
        delay,
    } = *request;
    if !wave_addr.is_multiple_of(KIB) || !wave_size.is_multiple_of(KIB) {
        return Err(Error::precondition(format!(
            "Wave address {wave_addr:#x} and size {wave_size:#x} must be multiples of 1 KiB"
        )));
    }
    if wave_size == 0 {
        return Err(Error::precondition("Wave size must not be zero"));
    }
    if wave_size > traits.max_replay_wave_bytes {
        return Err(Error::CapacityExceeded {
            what: "Replay wave size",
            needed: wave_size,
            capacity: traits.max_replay_wave_bytes,
        });
    }
    let span = u64::from(wave_count) * wave_size + wave_addr;
    if span >= traits.ddr_budget {
        return Err(Error::CapacityExceeded {
            what: "Replay DDR span",
            needed: span,
            capacity: traits.ddr_budget,
        });
    }
    if u32::from(repeat_count) > traits.max_repeat_count {
        return Err(Error::CapacityExceeded {
            what: "Replay repeat count",
            needed: u64::from(repeat_count),
            capacity: u64::from(traits.max_repeat_count),
        });
    }
    if !(0.0..=variant.max_delay()).contains(&delay) {
        return Err(Error::precondition(format!(
            "Delay {delay} s outside [0, {}] for the {variant:?} template",
            variant.max_delay()
        )));
    }
    if delay > ReplayVariant::LONG_MAX_DELAY {
        warn!(
            "Delay of {} s exceeds the {} s allowed for long waves",
            delay,
            ReplayVariant::LONG_MAX_DELAY
        );
    }

    let delay = delay_cycles(delay, traits, false)?;
    let address = wave_addr + traits.ddr_base_addr;
    let burst = ddr_burst_code(wave_size);
    let length_kb = kib_count(wave_size)?;
    let wait_cycles = u32::from(length_kb) * variant.wait_factor();
    let clocks = wave_clocks(wave_size, traits)?;

    let program = CommandProgram::from(vec![
        Instruction::read_to_ram(address, length_kb, burst, false),
        Instruction::wait_cycles(wait_cycles),
        Instruction::loop_start(wave_count, false),
        Instruction::read_to_ram(address, length_kb, burst, true),
        Instruction::wait_cycles(wait_cycles),
        Instruction::loop_start(repeat_count, true),
        playback(wait, clocks, delay),
        Instruction::loop_end(INNER_LOOP_START, true),
        Instruction::loop_end(OUTER_LOOP_START, false),
        Instruction::wait_cycles(2).with_stop(),
    ]);
    debug!("Generated {:?} replay program:\n{}", variant, program);
    Ok(program)
}

/// One-shot program that copies `samples` samples staged at DDR byte address
/// `ddr_addr` into wave RAM.
pub fn load_to_ram_program(ddr_addr: u64, samples: usize) -> Result<CommandProgram> {
    let length_kb = u16::try_from(samples.div_ceil(512)).map_err(|_| Error::CapacityExceeded {
        what: "Wave RAM load in KiB",
        needed: samples.div_ceil(512) as u64,
        capacity: u64::from(u16::MAX),
    })?;
    Ok(CommandProgram::from(vec![
        Instruction::read_to_ram(ddr_addr, length_kb, 0x0F, false),
        Instruction::wait_cycles(1 << 16).with_stop(),
    ]))
}

/// Per-channel programs playing every step of `sequence`.
///
/// `wait_time` is the pause after each DDR read, in seconds.
pub fn gen_wave_control_from_sequence(
    sequence: &Sequence,
    traits: &DeviceTraits,
    wait_time: f64,
) -> Result<IndexMap<u8, CommandProgram>> {
    if sequence.is_empty() {
        return Err(Error::precondition("There is no sequence data"));
    }
    if wait_time < 0.0 {
        return Err(Error::precondition("Wait time must not be negative"));
    }
    let wait_cycles = (wait_time / traits.clock_period()).trunc();
    if wait_cycles > f64::from(u32::MAX) {
        return Err(Error::CapacityExceeded {
            what: "Wait cycles",
            needed: wait_cycles as u64,
            capacity: u64::from(u32::MAX),
        });
    }
    let wait_cycles = wait_cycles as u32;

    let mut programs: IndexMap<u8, CommandProgram> = sequence
        .channels()
        .into_iter()
        .map(|channel| (channel, CommandProgram::new()))
        .collect();
    for (step_index, step) in sequence.steps().iter().enumerate() {
        step.validate(traits.max_repeat_count)?;
        let delay = delay_cycles(step.delay, traits, true)?;
        if step.goto != Default::default() {
            warn!(
                "Step {} jumps to {:?}; sequences play in order",
                step_index + 1,
                step.goto
            );
        }
        for (&channel, wave) in &step.waves {
            let program = programs
                .get_mut(&channel)
                .ok_or_else(|| Error::precondition(format!("Channel {channel} not in sequence")))?;
            if program.len() >= traits.max_instruction_count {
                return Err(Error::TooManyInstructions {
                    count: program.len(),
                    limit: traits.max_instruction_count,
                });
            }
            let address = traits.channel_ddr_base(channel) + wave.start_offset;
            let read_size = wave.size.div_ceil(KIB) * KIB;
            program.push(Instruction::read_to_ram(
                address,
                kib_count(read_size)?,
                ddr_burst_code(read_size),
                false,
            ));
            program.push(Instruction::wait_cycles(wait_cycles));
            let clocks = wave_clocks(wave.size, traits)?;
            if step.repeat > 1 {
                let jump = program.len() as u16;
                program.push(Instruction::loop_start(step.repeat as u16, true));
                program.push(playback(step.wait, clocks, delay));
                program.push(Instruction::loop_end(jump, true));
            } else {
                program.push(playback(step.wait, clocks, delay));
            }
        }
    }
    for program in programs.values_mut() {
        program.push(Instruction::wait_cycles(2).with_stop());
        program.check_limit(traits.max_instruction_count)?;
    }
    Ok(programs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Goto, SequenceStep, StepWave};
    use awgboard_isa::device_traits::AWG_TRAITS;

    fn request() -> ReplayRequest {
        ReplayRequest {
            wave_size: 16 << 10,
            wait: WaitMode::Trigger,
            wave_count: 4,
            repeat_count: 100,
            wave_addr: 0,
            delay: 0.0,
        }
    }

    #[test]
    fn test_burst_codes() {
        assert_eq!(ddr_burst_code(32 << 10), 0xFF);
        assert_eq!(ddr_burst_code(8 << 10), 0x7F);
        assert_eq!(ddr_burst_code(12 << 10), 0x3F);
        assert_eq!(ddr_burst_code(2 << 10), 0x1F);
        assert_eq!(ddr_burst_code(3 << 10), 0x0F);
    }

    #[test]
    fn test_replay_template() {
        let program = gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &request()).unwrap();
        let words: Vec<_> = program.instructions().iter().map(|i| i.encode()).collect();
        assert_eq!(words.len(), 10);
        assert_eq!(words[0], [0, 0xFF00, 16, 0x5000]);
        assert_eq!(words[1], [(640_000 & 0xFFFF) as u16, (640_000 >> 16) as u16, 0, 0x2800]);
        assert_eq!(words[2], [0, 0, 4, 0x3000]);
        assert_eq!(words[3], [0, 0xFF80, 16, 0x5000]);
        assert_eq!(words[5], [0, 0, 100, 0x3100]);
        assert_eq!(words[6], [0, 1024, 0, 0x4000]);
        assert_eq!(words[7], [0, 0, 5, 0x3900]);
        assert_eq!(words[8], [0, 0, 2, 0x3800]);
        assert_eq!(words[9], [2, 0, 0, 0xA800]);

        let long = gen_wave_control(ReplayVariant::Long, &AWG_TRAITS, &request()).unwrap();
        assert_eq!(long.instructions()[1].encode(), [40_000, 0, 0, 0x2800]);
    }

    #[test]
    fn test_repeat_limit() {
        let mut req = request();
        req.repeat_count = 50_000;
        assert!(gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req).is_ok());
        req.repeat_count = 50_001;
        assert!(matches!(
            gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_auto_delay_bound() {
        let mut req = request();
        req.wait = WaitMode::Timed;
        req.delay = 1e-4;
        let program = gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req).unwrap();
        assert_eq!(program.instructions()[6].delay(), 25_000);
        req.delay = 1e-3;
        // 250000 cycles do not fit the delay field.
        assert!(matches!(
            gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req),
            Err(Error::DelayTooLarge { cycles: 250_000 })
        ));
        req.delay = 2.6e-3;
        assert!(matches!(
            gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn test_long_delay_bound() {
        let mut req = request();
        req.wait = WaitMode::Timed;
        req.delay = 250e-6;
        assert!(gen_wave_control(ReplayVariant::Long, &AWG_TRAITS, &req).is_ok());
        req.delay = 251e-6;
        assert!(matches!(
            gen_wave_control(ReplayVariant::Long, &AWG_TRAITS, &req),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn test_replay_preconditions() {
        let mut req = request();
        req.wave_addr = 100;
        assert!(gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req).is_err());
        let mut req = request();
        req.wave_size = 201 << 10;
        assert!(gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req).is_err());
        let mut req = request();
        req.wave_count = 3000;
        req.wave_size = 200 << 10;
        assert!(gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &req).is_err());
    }

    #[test]
    fn test_load_to_ram() {
        let program = load_to_ram_program(0, 1024).unwrap();
        let words: Vec<_> = program.instructions().iter().map(|i| i.encode()).collect();
        assert_eq!(words, vec![[0, 0x0F00, 2, 0x5000], [0, 1, 0, 0xA800]]);
    }

    fn sequence(repeat: u32, wait: WaitMode) -> Sequence {
        let mut sequence = Sequence::new();
        for (offset, size) in [(0u64, 1000u64), (1024, 3072)] {
            let mut step = SequenceStep::new(wait, Goto::Next, repeat, 1e-6);
            for channel in [1u8, 2] {
                step.waves.insert(
                    channel,
                    StepWave {
                        start_offset: offset,
                        next_offset: offset + size.div_ceil(1024) * 1024,
                        size,
                    },
                );
            }
            sequence.push(step).unwrap();
        }
        sequence
    }

    #[test]
    fn test_sequence_without_repeat() {
        let programs =
            gen_wave_control_from_sequence(&sequence(1, WaitMode::Trigger), &AWG_TRAITS, 1e-3).unwrap();
        assert_eq!(programs.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        let ch2: Vec<_> = programs[&2].instructions().iter().map(|i| i.encode()).collect();
        assert_eq!(ch2.len(), 7);
        // Channel 2 lives at 128 MiB; the first read rounds 1000 bytes up.
        assert_eq!(ch2[0], [((128u64 << 20) >> 10) as u16, 0x0F02, 1, 0x5000]);
        assert_eq!(ch2[1], [(250_000 & 0xFFFF) as u16, (250_000 >> 16) as u16, 0, 0x2800]);
        assert_eq!(ch2[2], [0, 63, 0, 0x4000]);
        assert_eq!(ch2[3][2], 3);
        assert_eq!(ch2[5], [0, 192, 0, 0x4000]);
        assert_eq!(ch2[6], [2, 0, 0, 0xA800]);
    }

    #[test]
    fn test_sequence_with_repeat() {
        let programs =
            gen_wave_control_from_sequence(&sequence(3, WaitMode::Timed), &AWG_TRAITS, 1e-3).unwrap();
        let ch1 = programs[&1].instructions();
        assert_eq!(ch1.len(), 11);
        assert_eq!(ch1[2].encode(), [0, 0, 3, 0x3100]);
        assert_eq!(ch1[3].encode(), [0, 63, 250, 0x2000]);
        assert_eq!(ch1[4].encode(), [0, 0, 2, 0x3900]);
        assert_eq!(ch1[9].encode(), [0, 0, 7, 0x3900]);
    }

    #[test]
    fn test_empty_sequence() {
        assert!(gen_wave_control_from_sequence(&Sequence::new(), &AWG_TRAITS, 1e-3).is_err());
    }
}
