// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::net::IpAddr;
use std::thread;

use awgboard_compiler::control::{self, load_to_ram_program};
use awgboard_compiler::{
    CodeFormat, CommandProgram, Compiler, ReplayRequest, ReplayVariant, SampleBuffer, Sequence,
    WaveUnit,
};
use awgboard_isa::DeviceTraits;
use awgboard_isa::SequencerStatus;
use awgboard_isa::bank::reg_bank::SPI_PROXY;
use awgboard_isa::bank::{Chip, channel_ram, module};
use awgboard_isa::device_traits::AWG_TRAITS;
use awgboard_isa::registers::{awg_core, dac};
use awgboard_log::{debug, info, warn};
use awgboard_transport::{Endpoint, Link, UdpLink};
use numeric_array::NumericArray;

use crate::channel::{ChannelPhase, ChannelState};
use crate::eeprom::{Calibration, Eeprom};
use crate::network::NetworkConfig;
use crate::settings::BoardSettings;
use crate::{Error, Result, compiler};

/// Offset voltages are limited to the DAC offset trim range.
const MAX_OFFSET_VOLT: f64 = 0.1;
/// Full-scale voltage range reachable with the 10 bit DAC current setting.
const MIN_DAC_VOLT: f64 = 0.696;
const MAX_DAC_VOLT: f64 = 1.351;

/// Channels sharing one AWG core, started together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPair {
    Ch12,
    Ch34,
}

impl ChannelPair {
    fn channels(self) -> [u8; 2] {
        match self {
            ChannelPair::Ch12 => [1, 2],
            ChannelPair::Ch34 => [3, 4],
        }
    }
}

/// Channel configuration as read back from the AWG core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReport {
    pub channel: u8,
    pub loop_count: u32,
    pub amp_gain: f64,
    pub mark_in_wave: bool,
    pub hold_output: bool,
    pub status: SequencerStatus,
}

/// One AWG board: four channels on two AWG cores behind a datagram link.
pub struct AwgBoard<L: Link = UdpLink> {
    endpoint: Endpoint<L>,
    settings: BoardSettings,
    traits: &'static DeviceTraits,
    channels: [ChannelState; 4],
    pub(crate) sequence: Sequence,
}

impl AwgBoard<UdpLink> {
    /// Connect to the board at `ip`. The board is not initialized; see
    /// [`AwgBoard::init_board`].
    pub fn connect(ip: IpAddr, mut settings: BoardSettings) -> Result<Self> {
        for change in settings.sanitize() {
            info!(
                "Board setting {} changed from {} to {}: {}",
                change.field, change.original, change.sanitized, change.reason
            );
        }
        let endpoint = Endpoint::connect(ip, settings.transport.clone())?;
        Ok(AwgBoard::new(endpoint, settings))
    }
}

fn lane(channel: u8) -> u16 {
    u16::from((channel - 1) & 1)
}

fn core_bank(channel: u8) -> Result<u8> {
    Chip::awg_for_channel(channel)
        .register_bank()
        .ok_or_else(|| Error::new(format!("No AWG core register bank for channel {channel}")))
}

fn dac_device(channel: u8) -> Result<u16> {
    Chip::dac_for_channel(channel)
        .spi_device()
        .ok_or_else(|| Error::new(format!("No DAC on the SPI proxy for channel {channel}")))
}

/// 10 bit full-scale code of the DAC for an output of `volt` at full scale.
fn full_scale_code(volt: f64) -> u32 {
    (((volt / 0.05 - 20.48) * 1024.0 / 13.1) as i32 & 0x3FF) as u32
}

fn full_scale_volt(code: u32) -> f64 {
    let sign = ((code >> 9) & 1) as i32;
    let magnitude = (code & 0x1FF) as i32 - (sign << 9);
    (20.48 + f64::from(magnitude) * 13.1 / 1024.0) * 0.05
}

impl<L: Link> AwgBoard<L> {
    /// Wrap a connected endpoint. No traffic is generated.
    pub fn new(endpoint: Endpoint<L>, settings: BoardSettings) -> Self {
        let channels = std::array::from_fn(|index| {
            ChannelState::new(index as u8 + 1, settings.loop_count, settings.volt_range)
        });
        AwgBoard {
            endpoint,
            settings,
            traits: &AWG_TRAITS,
            channels,
            sequence: Sequence::new(),
        }
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint<L> {
        &mut self.endpoint
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.settings
    }

    pub fn traits(&self) -> &'static DeviceTraits {
        self.traits
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn channel(&self, channel: u8) -> Result<&ChannelState> {
        let slot = self.slot(channel)?;
        Ok(&self.channels[slot])
    }

    fn slot(&self, channel: u8) -> Result<usize> {
        if channel == 0 || channel > self.traits.channel_count {
            return Err(Error::InvalidChannel(channel));
        }
        Ok(usize::from(channel - 1))
    }

    fn code_format(&self) -> CodeFormat {
        self.settings.code_format()
    }

    /// Write configuration words 0 and 1 of `channel`.
    fn commit(&mut self, channel: u8) -> Result<()> {
        let slot = self.slot(channel)?;
        let bank = core_bank(channel)?;
        let stride = lane(channel) * awg_core::LANE_STRIDE;
        let state = &self.channels[slot];
        let cnfg0 = state.cnfg0(self.settings.code_format(), self.settings.mark_in_wave);
        self.endpoint.write_regs(&[
            (bank, awg_core::CNFG0 + stride, cnfg0),
            (bank, awg_core::CNFG1 + stride, u32::from(state.loop_count)),
        ])?;
        Ok(())
    }

    /// Program executions per start; at least one.
    pub fn set_loop(&mut self, channel: u8, count: u16) -> Result<()> {
        let slot = self.slot(channel)?;
        if count == 0 {
            return Err(Error::precondition("Loop count must be at least 1"));
        }
        self.channels[slot].loop_count = count;
        self.commit(channel)
    }

    /// Digital gain applied when waves are quantized. Takes effect with the
    /// next upload.
    pub fn set_channel_gain(&mut self, channel: u8, gain: f64) -> Result<()> {
        let slot = self.slot(channel)?;
        if !gain.is_finite() || gain.abs() > 1.0 {
            return Err(Error::precondition(format!(
                "Channel gain {gain} outside [-1, 1]"
            )));
        }
        self.channels[slot].gain = gain;
        Ok(())
    }

    pub fn set_amp_gain(&mut self, channel: u8, gain: f64) -> Result<()> {
        let slot = self.slot(channel)?;
        self.channels[slot].amp_gain = ChannelState::amp_gain_code(gain)?;
        self.commit(channel)
    }

    /// Carry the marker in the sample LSB, on every channel.
    pub fn set_mark_mode(&mut self, mark_in_wave: bool) -> Result<()> {
        self.settings.mark_in_wave = mark_in_wave;
        for channel in 1..=self.traits.channel_count {
            self.commit(channel)?;
        }
        Ok(())
    }

    /// Keep the last sample on the output after the program stops.
    pub fn set_output_hold(&mut self, channel: u8, hold: bool) -> Result<()> {
        let slot = self.slot(channel)?;
        self.channels[slot].hold_output = hold;
        self.commit(channel)
    }

    /// DC offset of the output, on top of the factory trim.
    pub fn set_offset_volt(&mut self, channel: u8, volt: f64) -> Result<()> {
        let slot = self.slot(channel)?;
        if volt.is_nan() || volt.abs() >= MAX_OFFSET_VOLT {
            return Err(Error::precondition(format!(
                "Offset {volt} V outside (-{MAX_OFFSET_VOLT}, {MAX_OFFSET_VOLT})"
            )));
        }
        let state = &mut self.channels[slot];
        if volt.abs() > state.volt_range {
            warn!(
                "Offset {} V exceeds the {} V range of channel {}, using 0 V",
                volt, state.volt_range, channel
            );
            state.offset_volt = 0.0;
        } else {
            state.offset_volt = volt;
        }
        self.write_dac_offset(channel)
    }

    pub fn set_calibrated_offset(&mut self, channel: u8, code: i32) -> Result<()> {
        let slot = self.slot(channel)?;
        self.channels[slot].calibrated_offset = code;
        self.write_dac_offset(channel)
    }

    fn write_dac_offset(&mut self, channel: u8) -> Result<()> {
        let slot = self.slot(channel)?;
        let device = dac_device(channel)?;
        let state = &self.channels[slot];
        let code = (state.offset_volt * 65535.0 / self.traits.headroom / (2.0 * state.volt_range))
            as i32
            + state.calibrated_offset;
        let reg = |offset: u16| dac::spi_address(device, offset);
        self.endpoint.write_regs(&[
            (SPI_PROXY, reg(dac::PAGE), u32::from(lane(channel)) + 1),
            (SPI_PROXY, reg(dac::OFFSET_ENABLE), 1),
            (SPI_PROXY, reg(dac::OFFSET_LSB), (code & 0xFF) as u32),
            (SPI_PROXY, reg(dac::OFFSET_MSB), ((code >> 8) & 0xFF) as u32),
            (SPI_PROXY, reg(dac::OFFSET_SIXTEEN), 0),
        ])?;
        debug!("Channel {} DAC offset code {}", channel, code);
        Ok(())
    }

    /// Set the DAC full-scale output voltage.
    pub fn set_dac_max_volt(&mut self, channel: u8, volt: f64) -> Result<()> {
        self.slot(channel)?;
        if !(MIN_DAC_VOLT..=MAX_DAC_VOLT).contains(&volt) {
            return Err(Error::precondition(format!(
                "DAC full scale {volt} V outside [{MIN_DAC_VOLT}, {MAX_DAC_VOLT}]"
            )));
        }
        let code = full_scale_code(volt);
        let device = dac_device(channel)?;
        let base = dac::FULL_SCALE + 4 * lane(channel);
        // Low byte first; the high byte latches the new setting.
        self.endpoint.write_regs(&[
            (SPI_PROXY, dac::spi_address(device, base + 1), code & 0xFF),
            (SPI_PROXY, dac::spi_address(device, base), (code >> 8) & 0x3),
        ])?;
        Ok(())
    }

    /// Full-scale output voltage currently set in the DAC.
    pub fn read_dac_max_volt(&mut self, channel: u8) -> Result<f64> {
        self.slot(channel)?;
        let device = dac_device(channel)?;
        let base = dac::FULL_SCALE + 4 * lane(channel);
        let values = self.endpoint.read_regs(&[
            (SPI_PROXY, dac::spi_address(device, base)),
            (SPI_PROXY, dac::spi_address(device, base + 1)),
        ])?;
        let code = ((values[0] & 0x3) << 8) | (values[1] & 0xFF);
        Ok(full_scale_volt(code))
    }

    fn write_ctrl(&mut self, bank: u8, data: u32) -> Result<()> {
        self.endpoint.write_reg(bank, awg_core::CTRL, data)?;
        Ok(())
    }

    /// Start the program of `channel`.
    pub fn start(&mut self, channel: u8) -> Result<()> {
        let slot = self.slot(channel)?;
        if self.channels[slot].program.is_none() {
            return Err(Error::precondition(format!(
                "Channel {channel} has no program"
            )));
        }
        self.channels[slot].enter(ChannelPhase::Running)?;
        let run = 1 << (awg_core::CTRL_RUN_SHIFT + u32::from(lane(channel)));
        self.write_ctrl(core_bank(channel)?, run)
    }

    /// Start both channels of an AWG core with one register write.
    pub fn start_pair(&mut self, pair: ChannelPair) -> Result<()> {
        let channels = pair.channels();
        for channel in channels {
            let slot = self.slot(channel)?;
            let state = &self.channels[slot];
            if state.program.is_none() {
                return Err(Error::precondition(format!(
                    "Channel {channel} has no program"
                )));
            }
            if !matches!(state.phase(), ChannelPhase::Armed | ChannelPhase::Stopped) {
                return Err(Error::InvalidTransition {
                    channel,
                    from: state.phase(),
                    to: ChannelPhase::Running,
                });
            }
        }
        for channel in channels {
            let slot = self.slot(channel)?;
            self.channels[slot].enter(ChannelPhase::Running)?;
        }
        self.write_ctrl(core_bank(channels[0])?, 0b11 << awg_core::CTRL_RUN_SHIFT)
    }

    pub fn stop(&mut self, channel: u8) -> Result<()> {
        let slot = self.slot(channel)?;
        let stop = 1 << (awg_core::CTRL_STOP_SHIFT + u32::from(lane(channel)));
        self.write_ctrl(core_bank(channel)?, stop)?;
        self.channels[slot].enter(ChannelPhase::Stopped)
    }

    pub fn channel_status(&mut self, channel: u8) -> Result<SequencerStatus> {
        self.slot(channel)?;
        let raw = self
            .endpoint
            .read_reg(core_bank(channel)?, awg_core::STATUS1 + 4 * lane(channel))?;
        Ok(SequencerStatus::from_register(raw))
    }

    /// Read back the configuration and status of `channel`.
    pub fn channel_report(&mut self, channel: u8) -> Result<ChannelReport> {
        self.slot(channel)?;
        let bank = core_bank(channel)?;
        let stride = lane(channel) * awg_core::LANE_STRIDE;
        let values = self.endpoint.read_regs(&[
            (bank, awg_core::CNFG0 + stride),
            (bank, awg_core::CNFG1 + stride),
            (bank, awg_core::STATUS1 + 4 * lane(channel)),
        ])?;
        let &[cnfg0, cnfg1, status] = values.as_slice() else {
            return Err(Error::new("Short register readback"));
        };
        Ok(ChannelReport {
            channel,
            loop_count: cnfg1,
            amp_gain: f64::from((cnfg0 >> awg_core::CNFG0_AMP_GAIN_SHIFT) as u16 as i16) / 32767.0,
            mark_in_wave: cnfg0 & awg_core::CNFG0_MARK_IN_WAVE != 0,
            hold_output: cnfg0 & awg_core::CNFG0_HOLD_OUTPUT != 0,
            status: SequencerStatus::from_register(status),
        })
    }

    /// Route the next bulk writes of `channel` to its command or wave RAM.
    fn select_ram(&mut self, channel: u8, wave: bool) -> Result<()> {
        let shift = if wave {
            awg_core::CNFG4_WAVE_SELECT_SHIFT
        } else {
            awg_core::CNFG4_COMMAND_SELECT_SHIFT
        };
        let select = 1 << (shift + u32::from(lane(channel)));
        self.endpoint
            .write_reg(core_bank(channel)?, awg_core::CNFG4, select)?;
        Ok(())
    }

    fn ddr_address(&self, channel: u8, offset: u64) -> Result<u32> {
        let address = self.traits.channel_ddr_base(channel) + offset;
        u32::try_from(address)
            .map_err(|_| Error::new(format!("DDR address {address:#x} exceeds 32 bits")))
    }

    /// Write `program` into the command RAM of `channel`.
    fn write_commands(&mut self, channel: u8, program: &CommandProgram) -> Result<()> {
        program.check_limit(self.traits.max_instruction_count)?;
        self.select_ram(channel, false)?;
        let (module_id, command_region, _) = channel_ram(channel);
        self.endpoint
            .write_ram(module_id, command_region, 0, &program.to_bytes())?;
        Ok(())
    }

    /// Stage `samples` in the channel's wave memory. On boards with DDR the
    /// samples go to the channel's DDR region and are copied into wave RAM
    /// by [`Self::load_data_to_ram`].
    fn write_wave_data(&mut self, channel: u8, samples: &SampleBuffer) -> Result<()> {
        let padded = samples.padded_to_multiple(self.traits.wave_burst_samples);
        self.select_ram(channel, true)?;
        if self.traits.has_ddr {
            let address = self.ddr_address(channel, 0)?;
            self.endpoint
                .write_ddr(module::DDR_CONTROLLER, address, &padded.to_le_bytes())?;
        } else {
            let (module_id, _, wave_region) = channel_ram(channel);
            self.endpoint
                .write_ram(module_id, wave_region, 0, &padded.to_le_bytes())?;
        }
        Ok(())
    }

    /// Run a one-shot program that copies `samples` staged samples from DDR
    /// into wave RAM. The loop count is restored afterwards.
    fn load_data_to_ram(&mut self, channel: u8, samples: usize) -> Result<()> {
        let slot = self.slot(channel)?;
        let program = load_to_ram_program(self.traits.channel_ddr_base(channel), samples)?;
        self.write_commands(channel, &program)?;
        let loop_count = self.channels[slot].loop_count;
        self.channels[slot].loop_count = 1;
        let run = 1 << (awg_core::CTRL_RUN_SHIFT + u32::from(lane(channel)));
        let result = self
            .commit(channel)
            .and_then(|_| self.write_ctrl(core_bank(channel)?, run));
        thread::sleep(self.settings.load_settle());
        self.channels[slot].loop_count = loop_count;
        result?;
        self.commit(channel)
    }

    /// Stop `channel` and move it into [`ChannelPhase::Configuring`].
    fn begin_upload(&mut self, channel: u8) -> Result<usize> {
        let slot = self.slot(channel)?;
        self.stop(channel)?;
        self.channels[slot].enter(ChannelPhase::Configuring)?;
        Ok(slot)
    }

    /// Write `program` as the channel's playback program and arm it.
    pub(crate) fn install_program(&mut self, channel: u8, program: CommandProgram) -> Result<()> {
        let slot = self.begin_upload(channel)?;
        self.write_commands(channel, &program)?;
        self.channels[slot].program = Some(program);
        self.channels[slot].enter(ChannelPhase::Armed)
    }

    /// Compile `units` for `channel` and upload samples and program. The
    /// channel is stopped first and armed afterwards.
    pub fn compile(&mut self, channel: u8, units: &[WaveUnit], continuous: bool) -> Result<()> {
        let slot = self.slot(channel)?;
        let quantizer = self.channels[slot].quantizer(
            self.traits,
            self.code_format(),
            self.settings.mark_in_wave,
        );
        let compiled = Compiler::new(self.traits, quantizer).compile(units, continuous)?;
        debug!(
            "Channel {}: {} samples, {} instructions",
            channel,
            compiled.samples.len(),
            compiled.program.len()
        );

        self.begin_upload(channel)?;
        self.write_wave_data(channel, &compiled.samples)?;
        if self.traits.has_ddr {
            self.load_data_to_ram(channel, compiled.samples.len())?;
        }
        self.write_commands(channel, &compiled.program)?;
        let state = &mut self.channels[slot];
        state.samples = Some(compiled.samples);
        state.program = Some(compiled.program);
        state.enter(ChannelPhase::Armed)
    }

    fn gen_wave_control(
        &mut self,
        channel: u8,
        variant: ReplayVariant,
        request: &ReplayRequest,
    ) -> Result<CommandProgram> {
        self.slot(channel)?;
        let mut request = *request;
        request.wave_addr += self.traits.channel_ddr_base(channel);
        let program = control::gen_wave_control(variant, self.traits, &request)?;
        self.install_program(channel, program.clone())?;
        Ok(program)
    }

    /// Install a replay program for waves already stored in the channel's
    /// DDR region. Delays up to [`ReplayVariant::AUTO_MAX_DELAY`].
    pub fn gen_wave_control_auto(
        &mut self,
        channel: u8,
        request: &ReplayRequest,
    ) -> Result<CommandProgram> {
        self.gen_wave_control(channel, ReplayVariant::Auto, request)
    }

    /// Like [`Self::gen_wave_control_auto`] with finer delay steps.
    pub fn gen_wave_control_long(
        &mut self,
        channel: u8,
        request: &ReplayRequest,
    ) -> Result<CommandProgram> {
        self.gen_wave_control(channel, ReplayVariant::Long, request)
    }

    /// Quantize `samples` and store them at `start_offset` of the channel's
    /// DDR region.
    ///
    /// Returns the offset following the padded wave and the wave size in
    /// bytes before padding.
    pub fn write_wave_to_ddr(
        &mut self,
        channel: u8,
        start_offset: u64,
        samples: &NumericArray,
        mark: Option<&[u8]>,
    ) -> Result<(u64, u64)> {
        let slot = self.slot(channel)?;
        if samples.is_empty() {
            return Err(Error::precondition("Wave has no samples"));
        }
        let burst = self.traits.wave_burst_samples;
        let burst_bytes = (burst * 2) as u64;
        if !start_offset.is_multiple_of(burst_bytes) {
            return Err(Error::precondition(format!(
                "DDR offset {start_offset:#x} is not a multiple of {burst_bytes}"
            )));
        }
        let padded = samples.padded_to_multiple(burst, 0.0);
        let mark_in_wave = self.settings.mark_in_wave && mark.is_some();
        let padded_mark = mark.map(|mark| {
            let mut mark = mark.to_vec();
            mark.resize(padded.len(), 0);
            mark
        });
        let quantizer =
            self.channels[slot].quantizer(self.traits, self.code_format(), mark_in_wave);
        let codes = quantizer.quantize(&padded, padded_mark.as_deref())?;
        let bytes = SampleBuffer::from_codes(self.code_format(), codes).to_le_bytes();

        let next_offset = start_offset + bytes.len() as u64;
        if next_offset > self.traits.channel_ddr_space {
            return Err(compiler::Error::CapacityExceeded {
                what: "Channel DDR bytes",
                needed: next_offset,
                capacity: self.traits.channel_ddr_space,
            }
            .into());
        }
        let address = self.ddr_address(channel, start_offset)?;
        self.endpoint
            .write_ddr(module::DDR_CONTROLLER, address, &bytes)?;
        Ok((next_offset, samples.len() as u64 * 2))
    }

    /// Check that both DACs report ready.
    pub fn check_awg_status(&mut self) -> Result<()> {
        let status_of = |channel| {
            dac_device(channel).map(|device| (SPI_PROXY, dac::spi_address(device, dac::STATUS)))
        };
        let values = self.endpoint.read_regs(&[status_of(1)?, status_of(3)?])?;
        let &[dac1, dac2] = values.as_slice() else {
            return Err(Error::new("Short register readback"));
        };
        if dac1 & 0xFF != dac::STATUS_READY || dac2 & 0xFF != dac::STATUS_READY {
            return Err(Error::DacNotReady { dac1, dac2 });
        }
        Ok(())
    }

    /// Bring the board into a known state: check the DACs, apply the
    /// factory calibration, stop every channel and write the configuration.
    pub fn init_board(&mut self) -> Result<()> {
        self.check_awg_status()?;
        let settle = self.settings.eeprom_settle();
        let calibration =
            Calibration::load(&mut Eeprom::new(&mut self.endpoint, settle))?.unwrap_or_default();
        for (state, (offset, gain)) in self.channels.iter_mut().zip(
            calibration
                .offsets
                .iter()
                .zip(calibration.diff_amp_gain.iter()),
        ) {
            state.calibrated_offset = *offset;
            state.diff_amp_gain = *gain;
        }
        for channel in 1..=self.traits.channel_count {
            self.stop(channel)?;
        }
        for channel in 1..=self.traits.channel_count {
            let slot = self.slot(channel)?;
            self.commit(channel)?;
            let full_scale = self.channels[slot].volt_range * self.channels[slot].diff_amp_gain;
            self.set_dac_max_volt(channel, full_scale)?;
            self.set_offset_volt(channel, 0.0)?;
        }
        info!("AWG board {} initialized", self.endpoint.device_id());
        Ok(())
    }

    pub fn eeprom(&mut self) -> Eeprom<'_, L> {
        let settle = self.settings.eeprom_settle();
        Eeprom::new(&mut self.endpoint, settle)
    }

    /// Store the channels' offset trims and gain corrections as factory
    /// calibration.
    pub fn store_calibration(&mut self) -> Result<()> {
        let mut calibration = Calibration::default();
        for (index, state) in self.channels.iter().enumerate() {
            calibration.offsets[index] = state.calibrated_offset;
            calibration.diff_amp_gain[index] = state.diff_amp_gain;
        }
        calibration.store(&mut self.eeprom())
    }

    /// Move the board to a new network identity. The board must be
    /// reconnected afterwards.
    pub fn set_network(&mut self, config: &NetworkConfig) -> Result<()> {
        let settle = self.settings.eeprom_settle();
        config.apply(&mut self.endpoint, settle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use awgboard_compiler::{WaitMode, WaveKind};
    use awgboard_isa::bank::reg_bank::{AWG_CORE_1, AWG_CORE_2};
    use awgboard_isa::instruction::program_from_bytes;
    use awgboard_isa::{Instruction, Opcode};
    use awgboard_transport::sim::{SimEvent, SimLink, SimulatedBoard, fast_settings};
    use proptest::prelude::*;

    pub(crate) fn board() -> (AwgBoard<SimLink>, SimulatedBoard) {
        let sim = SimulatedBoard::new();
        let settings = BoardSettings {
            transport: fast_settings(),
            load_settle_ms: 0,
            eeprom_settle_ms: 0,
            ..Default::default()
        };
        let mut endpoint = Endpoint::new(sim.link(), settings.transport.clone());
        endpoint.arm_frame_counter().unwrap();
        (AwgBoard::new(endpoint, settings), sim)
    }

    fn units() -> Vec<WaveUnit> {
        vec![WaveUnit::new(WaveKind::Trigger, 0.0, vec![0.5; 64])]
    }

    fn ctrl_writes(sim: &SimulatedBoard, bank: u8) -> Vec<u32> {
        sim.events()
            .into_iter()
            .filter_map(|event| match event {
                SimEvent::RegisterWrite {
                    bank: b,
                    address: awg_core::CTRL,
                    data,
                } if b == bank => Some(data),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_invalid_channel() {
        let (mut board, _sim) = board();
        assert!(matches!(board.set_loop(0, 1), Err(Error::InvalidChannel(0))));
        assert!(matches!(board.stop(5), Err(Error::InvalidChannel(5))));
        assert!(board.channel(4).is_ok());
    }

    #[test]
    fn test_init_board_defaults() {
        let (mut board, sim) = board();
        board.init_board().unwrap();
        for channel in 1..=4 {
            assert_eq!(board.channel(channel).unwrap().phase(), ChannelPhase::Stopped);
        }
        assert_eq!(ctrl_writes(&sim, AWG_CORE_1), vec![16, 32]);
        assert_eq!(ctrl_writes(&sim, AWG_CORE_2), vec![16, 32]);
        assert_eq!(
            sim.register(AWG_CORE_1, awg_core::CNFG0),
            32768 | (32767 << 16)
        );
        assert_eq!(sim.register(AWG_CORE_2, awg_core::CNFG1 + 8), 60_000);
        // 1 V full scale.
        assert_eq!(sim.register(SPI_PROXY, dac::spi_address(1, 0x41)), 0xDB);
        assert_eq!(sim.register(SPI_PROXY, dac::spi_address(1, 0x40)), 0x3);
        let volt = board.read_dac_max_volt(1).unwrap();
        assert!((volt - 1.0).abs() < 1e-3);
        assert_eq!(sim.register(SPI_PROXY, dac::spi_address(2, dac::OFFSET_LSB)), 0);
    }

    #[test]
    fn test_init_board_applies_calibration() {
        let (mut board, sim) = board();
        sim.set_eeprom(0x80, &[0xDA, 0x5A]);
        for index in 0..4u8 {
            let offset: i32 = if index == 1 { 100 } else { 0 };
            sim.set_eeprom(130 + 4 * index, &offset.to_le_bytes());
            sim.set_eeprom(146 + 4 * index, &65536i32.to_le_bytes());
        }
        board.init_board().unwrap();
        assert_eq!(board.channel(2).unwrap().calibrated_offset, 100);
        assert_eq!(board.channel(3).unwrap().diff_amp_gain, 1.0);
        // Channel 2 is the last to write the shared DAC 1 offset registers.
        assert_eq!(sim.register(SPI_PROXY, dac::spi_address(1, dac::OFFSET_LSB)), 100);
    }

    #[test]
    fn test_dac_not_ready() {
        let (mut board, sim) = board();
        sim.set_register(SPI_PROXY, dac::spi_address(2, dac::STATUS), 0x40);
        assert!(matches!(
            board.init_board(),
            Err(Error::DacNotReady { dac1: 0xC0, dac2: 0x40 })
        ));
    }

    #[test]
    fn test_compile_stops_before_upload() {
        let (mut board, sim) = board();
        sim.clear_events();
        board.compile(1, &units(), false).unwrap();
        let events = sim.events();
        assert_eq!(
            events[0],
            SimEvent::RegisterWrite {
                bank: AWG_CORE_1,
                address: awg_core::CTRL,
                data: 16
            }
        );
        let ddr = events
            .iter()
            .position(|e| matches!(e, SimEvent::DdrWrite { address: 0, len: 1024 }))
            .unwrap();
        let last_ram = events
            .iter()
            .rposition(|e| matches!(e, SimEvent::RamWrite { module: 0x10, region: 4, .. }))
            .unwrap();
        assert!(ddr < last_ram);
        assert_eq!(board.channel(1).unwrap().phase(), ChannelPhase::Armed);

        let codes = sim.ddr(0, 4);
        // trunc((0.5 / 1.1 + 1) * 32767.5)
        assert_eq!(u16::from_le_bytes([codes[0], codes[1]]), 47661);
        let program = program_from_bytes(&sim.ram(0x10, 4, 0, 16)).unwrap();
        assert_eq!(program[0], Instruction::play(Opcode::Trig, 0, 8, 0));
        // Loop count restored after the DDR to RAM copy.
        assert_eq!(sim.register(AWG_CORE_1, awg_core::CNFG1), 60_000);
    }

    #[test]
    fn test_start_and_stop() {
        let (mut board, sim) = board();
        assert!(board.start(1).is_err());
        board.compile(1, &units(), false).unwrap();
        board.compile(2, &units(), false).unwrap();
        board.start(2).unwrap();
        assert_eq!(sim.register(AWG_CORE_1, awg_core::CTRL), 2);
        assert!(matches!(
            board.start_pair(ChannelPair::Ch12),
            Err(Error::InvalidTransition { channel: 2, .. })
        ));
        board.stop(2).unwrap();
        board.start_pair(ChannelPair::Ch12).unwrap();
        assert_eq!(sim.register(AWG_CORE_1, awg_core::CTRL), 3);
        assert_eq!(board.channel(1).unwrap().phase(), ChannelPhase::Running);
        assert!(board.start_pair(ChannelPair::Ch34).is_err());
    }

    #[test]
    fn test_configuration_words() {
        let (mut board, sim) = board();
        board.set_amp_gain(2, 0.5).unwrap();
        board.set_output_hold(2, true).unwrap();
        board.set_loop(2, 7).unwrap();
        assert_eq!(
            sim.register(AWG_CORE_1, awg_core::CNFG0 + 8),
            32768 | (16383 << 16) | awg_core::CNFG0_HOLD_OUTPUT
        );
        assert_eq!(sim.register(AWG_CORE_1, awg_core::CNFG1 + 8), 7);
        board.set_mark_mode(true).unwrap();
        assert_eq!(sim.register(AWG_CORE_2, awg_core::CNFG0) & 1, 1);
        assert!(board.set_loop(2, 0).is_err());
        assert!(board.set_channel_gain(1, 1.5).is_err());

        sim.set_register(AWG_CORE_1, awg_core::STATUS1 + 4, 7 << 1);
        let report = board.channel_report(2).unwrap();
        assert_eq!(report.loop_count, 7);
        assert!(report.hold_output && report.mark_in_wave);
        assert!((report.amp_gain - 0.5).abs() < 1e-4);
        assert_eq!(report.status, SequencerStatus::OutputWave);
    }

    #[test]
    fn test_offset_volt() {
        let (mut board, sim) = board();
        assert!(board.set_offset_volt(2, 0.1).is_err());
        board.set_offset_volt(2, 0.05).unwrap();
        let reg = |offset| sim.register(SPI_PROXY, dac::spi_address(1, offset));
        assert_eq!(reg(dac::PAGE), 2);
        assert_eq!(reg(dac::OFFSET_ENABLE), 1);
        assert_eq!(reg(dac::OFFSET_LSB), 0xD1);
        assert_eq!(reg(dac::OFFSET_MSB), 0x05);
        board.set_calibrated_offset(2, -1489).unwrap();
        assert_eq!(reg(dac::OFFSET_LSB), 0);
        assert_eq!(reg(dac::OFFSET_MSB), 0);
    }

    #[test]
    fn test_dac_max_volt_range() {
        let (mut board, sim) = board();
        assert!(board.set_dac_max_volt(3, 0.5).is_err());
        board.set_dac_max_volt(4, 1.351).unwrap();
        assert_eq!(sim.register(SPI_PROXY, dac::spi_address(2, 0x45)), 0xFF);
        assert_eq!(sim.register(SPI_PROXY, dac::spi_address(2, 0x44)), 0x1);
        let volt = board.read_dac_max_volt(4).unwrap();
        assert!((volt - 1.351).abs() < 1e-3);
    }

    #[test]
    fn test_channel_status() {
        let (mut board, sim) = board();
        sim.set_register(AWG_CORE_2, awg_core::STATUS1 + 4, 9 << 1);
        assert_eq!(board.channel_status(4).unwrap(), SequencerStatus::WaitDdr);
        assert_eq!(board.channel_status(3).unwrap(), SequencerStatus::Idle);
    }

    #[test]
    fn test_replay_program_upload() {
        let (mut board, sim) = board();
        let request = ReplayRequest {
            wave_size: 16 << 10,
            wait: WaitMode::Trigger,
            wave_count: 2,
            repeat_count: 3,
            wave_addr: 0,
            delay: 0.0,
        };
        let program = board.gen_wave_control_auto(3, &request).unwrap();
        assert_eq!(program.len(), 10);
        let written = program_from_bytes(&sim.ram(0x11, 4, 0, 80)).unwrap();
        assert_eq!(written, program.instructions());
        let placed = ReplayRequest {
            wave_addr: AWG_TRAITS.channel_ddr_base(3),
            ..request
        };
        let expected = control::gen_wave_control(ReplayVariant::Auto, &AWG_TRAITS, &placed).unwrap();
        assert_eq!(program, expected);
        assert_eq!(board.channel(3).unwrap().phase(), ChannelPhase::Armed);
    }

    #[test]
    fn test_write_wave_to_ddr() {
        let (mut board, sim) = board();
        let wave = NumericArray::from(vec![0.25; 600]);
        let (next, size) = board.write_wave_to_ddr(2, 0, &wave, None).unwrap();
        assert_eq!((next, size), (2048, 1200));
        let base = AWG_TRAITS.channel_ddr_base(2) as u32;
        let stored = sim.ddr(base + 1198, 4);
        // Padding quantizes 0.0 like any other sample.
        assert_eq!(u16::from_le_bytes([stored[2], stored[3]]), 32767);
        assert!(board.write_wave_to_ddr(2, 100, &wave, None).is_err());
        assert!(
            board
                .write_wave_to_ddr(2, AWG_TRAITS.channel_ddr_space - 1024, &wave, None)
                .is_err()
        );
    }

    proptest! {
        #[test]
        fn test_full_scale_code_resolution(volt in MIN_DAC_VOLT..=MAX_DAC_VOLT) {
            let code = full_scale_code(volt);
            prop_assert!(code <= 0x3FF);
            // One code step is 13.1 / 1024 * 0.05 V.
            prop_assert!((full_scale_volt(code) - volt).abs() < 1e-3);
        }
    }
}
