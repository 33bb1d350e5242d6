// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Multi-step sequences streamed from DDR.

use awgboard_compiler::control::gen_wave_control_from_sequence;
use awgboard_compiler::{Goto, SequenceStep, StepWave, WaitMode};
use awgboard_log::debug;
use awgboard_transport::Link;
use numeric_array::NumericArray;

use crate::awg::AwgBoard;
use crate::{Error, Result};

impl<L: Link> AwgBoard<L> {
    /// Store the waves of sequence step `index` (numbered from 1) in DDR.
    ///
    /// Step 1 starts a new sequence. Setting an existing step again drops it
    /// and every later step. Each step's wave for a channel is placed right
    /// after that channel's wave of the previous step.
    pub fn set_sequence_step(
        &mut self,
        index: usize,
        waves: &[(u8, NumericArray)],
        wait: WaitMode,
        goto: Goto,
        repeat: u32,
        delay: f64,
    ) -> Result<()> {
        if waves.is_empty() {
            return Err(Error::precondition("A sequence step needs at least one wave"));
        }
        for (position, (channel, _)) in waves.iter().enumerate() {
            self.channel(*channel)?;
            if waves[..position].iter().any(|(other, _)| other == channel) {
                return Err(Error::precondition(format!(
                    "Channel {channel} appears twice in step {index}"
                )));
            }
        }
        let mut step = SequenceStep::new(wait, goto, repeat, delay);
        step.validate(self.traits().max_repeat_count)?;
        self.sequence.prepare_step(index)?;

        for (channel, samples) in waves {
            let start_offset = self.sequence.start_offset(*channel);
            let (next_offset, size) = self.write_wave_to_ddr(*channel, start_offset, samples, None)?;
            step.waves.insert(
                *channel,
                StepWave {
                    start_offset,
                    next_offset,
                    size,
                },
            );
        }
        self.sequence.push(step)?;
        debug!("Sequence step {} stored for {} channels", index, waves.len());
        Ok(())
    }

    /// Install the sequence programs of `channels`, pausing `wait_time`
    /// seconds after each DDR read. The channels are armed afterwards.
    pub fn play_sequence_on(&mut self, channels: &[u8], wait_time: f64) -> Result<()> {
        let mut programs = gen_wave_control_from_sequence(&self.sequence, self.traits(), wait_time)?;
        let mut selected = Vec::with_capacity(channels.len());
        for &channel in channels {
            self.channel(channel)?;
            let program = programs.swap_remove(&channel).ok_or_else(|| {
                Error::precondition(format!("Channel {channel} is not part of the sequence"))
            })?;
            selected.push((channel, program));
        }
        for (channel, program) in selected {
            self.install_program(channel, program)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelPhase;
    use crate::awg::tests::board;
    use awgboard_isa::Opcode;
    use awgboard_isa::device_traits::AWG_TRAITS;
    use awgboard_isa::instruction::program_from_bytes;

    fn wave(len: usize) -> NumericArray {
        NumericArray::from(vec![0.1; len])
    }

    #[test]
    fn test_steps_chain_offsets() {
        let (mut board, sim) = board();
        let waves = [(1, wave(1000)), (2, wave(600))];
        board
            .set_sequence_step(1, &waves, WaitMode::Trigger, Goto::Next, 1, 0.0)
            .unwrap();
        board
            .set_sequence_step(2, &waves, WaitMode::Timed, Goto::Next, 3, 1e-6)
            .unwrap();
        let steps = board.sequence().steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps[1].waves[&1],
            StepWave {
                start_offset: 2048,
                next_offset: 4096,
                size: 2000
            }
        );
        assert_eq!(steps[1].waves[&2].start_offset, 2048);
        let second = sim.ddr(AWG_TRAITS.channel_ddr_base(2) as u32 + 2048, 2);
        assert_ne!(second, vec![0, 0]);

        // Re-setting step 1 starts over.
        board
            .set_sequence_step(1, &waves, WaitMode::Trigger, Goto::Next, 1, 0.0)
            .unwrap();
        assert_eq!(board.sequence().len(), 1);
    }

    #[test]
    fn test_step_preconditions() {
        let (mut board, _sim) = board();
        let waves = [(1, wave(512))];
        let step = |board: &mut AwgBoard<_>, index, delay| {
            board.set_sequence_step(index, &waves, WaitMode::Trigger, Goto::Next, 1, delay)
        };
        assert!(step(&mut board, 0, 0.0).is_err());
        assert!(step(&mut board, 2, 0.0).is_err());
        assert!(step(&mut board, 1, 256e-6).is_err());
        assert!(board.sequence().is_empty());
        step(&mut board, 1, 0.0).unwrap();
        assert!(
            board
                .set_sequence_step(2, &[(2, wave(512))], WaitMode::Trigger, Goto::Next, 1, 0.0)
                .is_err()
        );
        assert!(
            board
                .set_sequence_step(2, &[(1, wave(512)), (1, wave(512))], WaitMode::Trigger, Goto::Next, 1, 0.0)
                .is_err()
        );
        assert!(
            board
                .set_sequence_step(2, &[(1, wave(512))], WaitMode::Trigger, Goto::Next, 50_001, 0.0)
                .is_err()
        );
        assert_eq!(board.sequence().len(), 1);
    }

    #[test]
    fn test_play_sequence() {
        let (mut board, sim) = board();
        assert!(board.play_sequence_on(&[1], 0.0).is_err());
        let waves = [(1, wave(1024)), (3, wave(1024))];
        board
            .set_sequence_step(1, &waves, WaitMode::Trigger, Goto::Next, 1, 0.0)
            .unwrap();
        board
            .set_sequence_step(2, &waves, WaitMode::Trigger, Goto::Next, 4, 0.0)
            .unwrap();
        assert!(board.play_sequence_on(&[1, 2], 1e-6).is_err());
        assert_eq!(board.channel(1).unwrap().phase(), ChannelPhase::Idle);

        board.play_sequence_on(&[1, 3], 1e-6).unwrap();
        let program = board.channel(3).unwrap().program.clone().unwrap();
        let written = program_from_bytes(&sim.ram(0x11, 4, 0, program.len() * 8)).unwrap();
        assert_eq!(written, program.instructions());
        assert_eq!(written[0].opcode, Opcode::Read2Ram);
        assert!(written.last().unwrap().is_stop());
        assert_eq!(board.channel(1).unwrap().phase(), ChannelPhase::Armed);
        board.start(3).unwrap();
    }
}
