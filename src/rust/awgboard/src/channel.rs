// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Host-side state of one AWG channel.

use awgboard_compiler::{CodeFormat, CommandProgram, Quantizer, SampleBuffer};
use awgboard_isa::DeviceTraits;
use awgboard_isa::registers::awg_core::{
    CNFG0_AMP_GAIN_SHIFT, CNFG0_HOLD_OUTPUT, CNFG0_MARK_IN_WAVE,
};

use crate::{Error, Result};

/// Full scale of the signed Q15 amplitude gain.
const AMP_GAIN_SCALE: f64 = 32767.0;

/// Playback phase of a channel.
///
/// ```text
/// Idle -> Configuring -> Armed -> Running -> Stopped
///              ^                                |
///              +--------------------------------+
/// ```
///
/// `Stopped` is reachable from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelPhase {
    #[default]
    Idle,
    /// Samples or program are being uploaded.
    Configuring,
    /// A program is in place; waiting for start.
    Armed,
    Running,
    Stopped,
}

impl ChannelPhase {
    fn can_enter(self, next: ChannelPhase) -> bool {
        use ChannelPhase::*;
        matches!(
            (self, next),
            (_, Stopped)
                | (Idle | Stopped, Configuring)
                | (Configuring, Armed)
                | (Armed | Stopped, Running)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub(crate) channel: u8,
    /// Digital gain applied before quantization, at most 1.
    pub gain: f64,
    /// Raw Q15 amplitude gain code, as written to the core.
    pub amp_gain: u16,
    /// Factory offset trim in DAC offset codes.
    pub calibrated_offset: i32,
    /// Amplifier gain correction from the factory calibration.
    pub diff_amp_gain: f64,
    pub offset_volt: f64,
    pub hold_output: bool,
    pub loop_count: u16,
    /// Output voltage at full scale.
    pub volt_range: f64,
    pub samples: Option<SampleBuffer>,
    pub program: Option<CommandProgram>,
    phase: ChannelPhase,
}

impl ChannelState {
    pub fn new(channel: u8, loop_count: u16, volt_range: f64) -> Self {
        ChannelState {
            channel,
            gain: 1.0,
            amp_gain: AMP_GAIN_SCALE as u16,
            calibrated_offset: 0,
            diff_amp_gain: 1.0,
            offset_volt: 0.0,
            hold_output: false,
            loop_count,
            volt_range,
            samples: None,
            program: None,
            phase: ChannelPhase::Idle,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub(crate) fn enter(&mut self, next: ChannelPhase) -> Result<()> {
        if !self.phase.can_enter(next) {
            return Err(Error::InvalidTransition {
                channel: self.channel,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Encode an amplitude gain in `-1..=1` as the Q15 register code.
    pub fn amp_gain_code(gain: f64) -> Result<u16> {
        if !(-1.0..=1.0).contains(&gain) {
            return Err(Error::precondition(format!(
                "Amplitude gain {gain} outside [-1, 1]"
            )));
        }
        Ok((gain * AMP_GAIN_SCALE) as i16 as u16)
    }

    /// Configuration word 0: zero code, amplitude gain and mode bits.
    pub fn cnfg0(&self, format: CodeFormat, mark_in_wave: bool) -> u32 {
        let mut word = u32::from(format.zero_code()) | (u32::from(self.amp_gain) << CNFG0_AMP_GAIN_SHIFT);
        if mark_in_wave {
            word |= CNFG0_MARK_IN_WAVE;
        }
        if self.hold_output {
            word |= CNFG0_HOLD_OUTPUT;
        }
        word
    }

    pub fn quantizer(&self, traits: &DeviceTraits, format: CodeFormat, mark_in_wave: bool) -> Quantizer {
        Quantizer::new(traits, format, self.gain, mark_in_wave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_machine() {
        let mut state = ChannelState::new(1, 60_000, 1.0);
        assert!(state.enter(ChannelPhase::Running).is_err());
        state.enter(ChannelPhase::Configuring).unwrap();
        assert!(state.enter(ChannelPhase::Running).is_err());
        state.enter(ChannelPhase::Armed).unwrap();
        state.enter(ChannelPhase::Running).unwrap();
        assert!(matches!(
            state.enter(ChannelPhase::Configuring),
            Err(Error::InvalidTransition {
                from: ChannelPhase::Running,
                to: ChannelPhase::Configuring,
                ..
            })
        ));
        state.enter(ChannelPhase::Stopped).unwrap();
        state.enter(ChannelPhase::Running).unwrap();
        state.enter(ChannelPhase::Stopped).unwrap();
        state.enter(ChannelPhase::Configuring).unwrap();
        state.enter(ChannelPhase::Stopped).unwrap();
    }

    #[test]
    fn test_amp_gain_code() {
        assert_eq!(ChannelState::amp_gain_code(1.0).unwrap(), 32767);
        assert_eq!(ChannelState::amp_gain_code(-1.0).unwrap(), 0x8001);
        assert_eq!(ChannelState::amp_gain_code(0.5).unwrap(), 16383);
        assert!(ChannelState::amp_gain_code(1.01).is_err());
    }

    #[test]
    fn test_cnfg0() {
        let mut state = ChannelState::new(2, 1, 1.0);
        assert_eq!(state.cnfg0(CodeFormat::Unsigned, false), 32768 | (32767 << 16));
        state.hold_output = true;
        state.amp_gain = 0;
        assert_eq!(state.cnfg0(CodeFormat::Signed, true), 0b11);
    }
}
