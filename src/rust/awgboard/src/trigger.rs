// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Trigger generator board, driven over the status-reply link.
//!
//! Every channel emits a pulse train derived from a 250 MHz counter. The
//! output of a channel is delayed by a coarse counter in 4 ns steps plus two
//! fine delay tap stages of 5 ps each.

use std::fmt;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};

use awgboard_isa::DeviceTraits;
use awgboard_isa::device_traits::TRIGGER_BOARD_TRAITS;
use awgboard_isa::registers::trigger::{self, BANK_CONTROL, BANK_DELAY, channel_register};
use awgboard_log::{debug, info};
use awgboard_transport::status_link::STATUS_LINK_PORT;
use awgboard_transport::{StatusLink, TransportSettings};

use crate::{Error, Result};

const COARSE_STEP_PS: u64 = 4000;
const FINE_STEP_PS: u64 = 5;
/// Taps per fine delay stage.
const TAPS_PER_STAGE: u32 = 400;
/// The pulse must end at least this many counts before the period does.
const WIDTH_MARGIN: i64 = 4;
/// Width settings below this produce a 50 % duty cycle.
const MIN_WIDTH_COUNTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockSource {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    External = 0,
    Internal = 1,
}

/// Channels addressed by a trigger board operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSelect {
    All,
    /// Numbered from 1.
    Channel(u8),
}

/// Settings of one trigger channel as read back from the board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerChannelInfo {
    /// The board forwards the external trigger input.
    External { channel: u8 },
    Internal {
        channel: u8,
        /// Hz.
        frequency: f64,
        /// Seconds; `None` for a 50 % duty cycle.
        width: Option<f64>,
        /// `None` for an endless pulse train.
        count: Option<u32>,
        offset_ps: u64,
    },
}

impl fmt::Display for TriggerChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerChannelInfo::External { channel } => {
                write!(f, "channel {channel}: external trigger")
            }
            TriggerChannelInfo::Internal {
                channel,
                frequency,
                width,
                count,
                offset_ps,
            } => {
                write!(f, "channel {channel}: {frequency} Hz, width ")?;
                match width {
                    Some(width) => write!(f, "{width} s")?,
                    None => write!(f, "50 %")?,
                }
                match count {
                    Some(count) => write!(f, ", {count} pulses")?,
                    None => write!(f, ", endless")?,
                }
                write!(f, ", offset {offset_ps} ps")
            }
        }
    }
}

pub struct TriggerBoard<S = TcpStream> {
    link: StatusLink<S>,
    traits: &'static DeviceTraits,
}

impl TriggerBoard<TcpStream> {
    pub fn connect(ip: IpAddr, settings: &TransportSettings) -> Result<Self> {
        let link = StatusLink::connect(SocketAddr::new(ip, STATUS_LINK_PORT), settings)?;
        let mut board = TriggerBoard::new(link);
        let identity = board.identity()?;
        info!("Connected to trigger board {} ({})", ip, identity);
        Ok(board)
    }
}

impl<S: Read + Write> TriggerBoard<S> {
    pub fn new(link: StatusLink<S>) -> Self {
        TriggerBoard {
            link,
            traits: &TRIGGER_BOARD_TRAITS,
        }
    }

    pub fn identity(&mut self) -> Result<String> {
        Ok(self.link.identity()?)
    }

    fn channels(&self, select: ChannelSelect) -> Result<Vec<u8>> {
        match select {
            ChannelSelect::All => Ok((1..=self.traits.channel_count).collect()),
            ChannelSelect::Channel(channel) if (1..=self.traits.channel_count).contains(&channel) => {
                Ok(vec![channel])
            }
            ChannelSelect::Channel(channel) => Err(Error::InvalidChannel(channel)),
        }
    }

    /// Channel bit mask of `select`.
    fn mask(&self, select: ChannelSelect) -> Result<u32> {
        Ok(self
            .channels(select)?
            .into_iter()
            .fold(0, |mask, channel| mask | 1 << (channel - 1)))
    }

    fn read(&mut self, address: u32) -> Result<u32> {
        Ok(self.link.read_reg(BANK_CONTROL, address)?)
    }

    fn write(&mut self, bank: u32, address: u32, data: u32) -> Result<()> {
        Ok(self.link.write_reg(bank, address, data)?)
    }

    pub fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        let bit = 1 << trigger::CLOCK_EXTERNAL_BIT;
        let current = self.read(trigger::CLOCK_CONTROL)?;
        let value = match source {
            ClockSource::External => current | bit,
            ClockSource::Internal => current & !bit,
        };
        self.write(BANK_CONTROL, trigger::CLOCK_CONTROL, value)
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) -> Result<()> {
        self.write(BANK_CONTROL, trigger::TRIGGER_SOURCE, source as u32)
    }

    pub fn trigger_source(&mut self) -> Result<TriggerSource> {
        match self.read(trigger::TRIGGER_SOURCE)? {
            0 => Ok(TriggerSource::External),
            _ => Ok(TriggerSource::Internal),
        }
    }

    pub fn start_internal_trigger(&mut self, select: ChannelSelect) -> Result<()> {
        let mask = self.mask(select)?;
        self.write(BANK_CONTROL, trigger::INTERNAL_START, mask)
    }

    pub fn enable_output(&mut self, select: ChannelSelect) -> Result<()> {
        let mask = self.mask(select)?;
        let current = self.read(trigger::OUTPUT_ENABLE)?;
        self.write(BANK_CONTROL, trigger::OUTPUT_ENABLE, current | mask)
    }

    pub fn disable_output(&mut self, select: ChannelSelect) -> Result<()> {
        let mask = self.mask(select)?;
        let current = self.read(trigger::OUTPUT_ENABLE)?;
        self.write(BANK_CONTROL, trigger::OUTPUT_ENABLE, current & !mask)
    }

    /// Pulses per start; 0 runs endlessly.
    pub fn set_trigger_count(&mut self, select: ChannelSelect, count: u32) -> Result<()> {
        for channel in self.channels(select)? {
            self.write(
                BANK_CONTROL,
                channel_register(trigger::COUNT_BASE, channel),
                count,
            )?;
        }
        Ok(())
    }

    /// Set the pulse frequency in Hz and the pulse width in seconds. A width
    /// below 20 ns gives a 50 % duty cycle. Returns the frequency actually
    /// set.
    pub fn set_frequency(&mut self, select: ChannelSelect, frequency: f64, width: f64) -> Result<f64> {
        let channels = self.channels(select)?;
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(Error::precondition(format!("Invalid trigger frequency {frequency} Hz")));
        }
        if !(width.is_finite() && width >= 0.0) {
            return Err(Error::precondition(format!("Invalid pulse width {width} s")));
        }
        let counts = (self.traits.sampling_rate / frequency).trunc();
        if counts < 1.0 || counts > f64::from(u32::MAX) {
            return Err(Error::precondition(format!(
                "Trigger frequency {frequency} Hz out of range"
            )));
        }
        let counts = counts as u32;
        let period = self.traits.clock_period();
        let width_counts = (width / period).trunc() as u32;
        if i64::from(width_counts) >= i64::from(counts) - WIDTH_MARGIN {
            return Err(Error::precondition(format!(
                "Pulse width {width} s does not fit a period of {} s",
                f64::from(counts) * period
            )));
        }
        for channel in channels {
            self.write(BANK_CONTROL, channel_register(trigger::PERIOD_BASE, channel), counts - 1)?;
            self.write(BANK_CONTROL, channel_register(trigger::WIDTH_BASE, channel), width_counts)?;
        }
        let actual = self.traits.sampling_rate / f64::from(counts);
        if width_counts < MIN_WIDTH_COUNTS {
            debug!("Trigger frequency {} Hz, 50 % duty cycle", actual);
        } else {
            debug!(
                "Trigger frequency {} Hz, width {} s",
                actual,
                f64::from(width_counts) * period
            );
        }
        Ok(actual)
    }

    /// Delay the output by `offset_ps` picoseconds, resolved to 5 ps.
    ///
    /// The fine delay taps are shared by all channels; each selected channel
    /// latches them together with its own coarse delay.
    pub fn set_offset(&mut self, select: ChannelSelect, offset_ps: u64) -> Result<()> {
        let channels = self.channels(select)?;
        let coarse = u32::try_from(offset_ps / COARSE_STEP_PS)
            .map_err(|_| Error::precondition(format!("Offset {offset_ps} ps out of range")))?;
        let fine = ((offset_ps % COARSE_STEP_PS) / FINE_STEP_PS) as u32;
        let tap1 = fine.min(TAPS_PER_STAGE);
        let tap2 = fine - tap1;
        self.write(BANK_DELAY, trigger::DELAY_TAP1, tap1)?;
        self.write(BANK_DELAY, trigger::DELAY_TAP2, tap2)?;
        self.write(BANK_DELAY, trigger::DELAY_TAP3, 0)?;
        self.write(BANK_DELAY, trigger::DELAY_TAP4, 0)?;
        for channel in channels {
            self.write(
                BANK_CONTROL,
                channel_register(trigger::COARSE_OFFSET_BASE, channel),
                coarse,
            )?;
            self.write(BANK_DELAY, trigger::DELAY_LOAD, 0)?;
            self.write(BANK_DELAY, trigger::DELAY_LOAD, 1 << (channel - 1))?;
        }
        Ok(())
    }

    /// Configure count, frequency and offset of the internal trigger in one
    /// go. Returns the frequency actually set.
    pub fn set_internal_trigger(
        &mut self,
        select: ChannelSelect,
        frequency: f64,
        offset_ps: u64,
        count: u32,
        width: f64,
    ) -> Result<f64> {
        self.set_trigger_count(select, count)?;
        let actual = self.set_frequency(select, frequency, width)?;
        self.set_offset(select, offset_ps)?;
        Ok(actual)
    }

    pub fn channel_info(&mut self, channel: u8) -> Result<TriggerChannelInfo> {
        self.channels(ChannelSelect::Channel(channel))?;
        if self.trigger_source()? == TriggerSource::External {
            return Ok(TriggerChannelInfo::External { channel });
        }
        let period = self.traits.clock_period();
        let counts = self.read(channel_register(trigger::PERIOD_BASE, channel))?;
        let frequency = 1.0 / ((f64::from(counts) + 1.0) * period);
        let width_counts = self.read(channel_register(trigger::WIDTH_BASE, channel))?;
        let width = (width_counts >= MIN_WIDTH_COUNTS).then(|| f64::from(width_counts) * period);
        let count = match self.read(channel_register(trigger::COUNT_BASE, channel))? {
            0 => None,
            count => Some(count),
        };
        let coarse = self.read(channel_register(trigger::COARSE_OFFSET_BASE, channel))?;
        let mut taps = 0;
        for address in [
            trigger::DELAY_TAP1,
            trigger::DELAY_TAP2,
            trigger::DELAY_TAP3,
            trigger::DELAY_TAP4,
        ] {
            taps += u64::from(self.link.read_reg(BANK_DELAY, address)?);
        }
        Ok(TriggerChannelInfo::Internal {
            channel,
            frequency,
            width,
            count,
            offset_ps: u64::from(coarse) * COARSE_STEP_PS + taps * FINE_STEP_PS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awgboard_transport::RetryPolicy;
    use awgboard_transport::sim::SimTriggerBoard;

    fn board() -> (TriggerBoard<SimTriggerBoard>, SimTriggerBoard) {
        let sim = SimTriggerBoard::new();
        let link = StatusLink::new(sim.clone(), "sim".into(), RetryPolicy::single());
        (TriggerBoard::new(link), sim)
    }

    #[test]
    fn test_identity() {
        let (mut board, _sim) = board();
        assert_eq!(board.identity().unwrap(), "12345678");
    }

    #[test]
    fn test_clock_source_keeps_other_bits() {
        let (mut board, sim) = board();
        sim.set_register(BANK_CONTROL, trigger::CLOCK_CONTROL, 0b1100);
        board.set_clock_source(ClockSource::External).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::CLOCK_CONTROL), 0b1101);
        board.set_clock_source(ClockSource::Internal).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::CLOCK_CONTROL), 0b1100);
    }

    #[test]
    fn test_outputs() {
        let (mut board, sim) = board();
        board.enable_output(ChannelSelect::Channel(3)).unwrap();
        board.enable_output(ChannelSelect::Channel(1)).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::OUTPUT_ENABLE), 0b101);
        board.disable_output(ChannelSelect::Channel(1)).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::OUTPUT_ENABLE), 0b100);
        board.enable_output(ChannelSelect::All).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::OUTPUT_ENABLE), 0xFFFF);
        board.disable_output(ChannelSelect::All).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::OUTPUT_ENABLE), 0);
        assert!(matches!(
            board.enable_output(ChannelSelect::Channel(17)),
            Err(Error::InvalidChannel(17))
        ));
        board.start_internal_trigger(ChannelSelect::Channel(16)).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, trigger::INTERNAL_START), 0x8000);
    }

    #[test]
    fn test_frequency() {
        let (mut board, sim) = board();
        let actual = board
            .set_frequency(ChannelSelect::Channel(2), 100e3, 1e-6)
            .unwrap();
        assert_eq!(actual, 100e3);
        assert_eq!(sim.register(BANK_CONTROL, 0x184), 2499);
        // 1 us in 4 ns counts, truncated.
        assert!((249..=250).contains(&sim.register(BANK_CONTROL, 0x204)));
        assert!(
            board
                .set_frequency(ChannelSelect::Channel(2), 100e3, 10e-6)
                .is_err()
        );
        assert!(board.set_frequency(ChannelSelect::All, 0.0, 0.0).is_err());
        board.set_frequency(ChannelSelect::All, 1e6, 0.0).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, 0x180 + 15 * 4), 249);
    }

    #[test]
    fn test_offset() {
        let (mut board, sim) = board();
        board.set_offset(ChannelSelect::Channel(4), 9_000).unwrap();
        assert_eq!(sim.register(BANK_CONTROL, 0x10C), 2);
        // The remaining 1000 ps fit the first tap stage.
        assert_eq!(sim.register(BANK_DELAY, trigger::DELAY_TAP1), 200);
        assert_eq!(sim.register(BANK_DELAY, trigger::DELAY_TAP2), 0);
        board.set_offset(ChannelSelect::Channel(4), 7_500).unwrap();
        assert_eq!(sim.register(BANK_DELAY, trigger::DELAY_TAP1), 400);
        assert_eq!(sim.register(BANK_DELAY, trigger::DELAY_TAP2), 300);
        let loads: Vec<_> = sim
            .writes()
            .into_iter()
            .filter(|(bank, address, _)| (*bank, *address) == (BANK_DELAY, trigger::DELAY_LOAD))
            .map(|(_, _, data)| data)
            .collect();
        assert_eq!(loads, vec![0, 8, 0, 8]);
    }

    #[test]
    fn test_channel_info() {
        let (mut board, _sim) = board();
        board.set_trigger_source(TriggerSource::External).unwrap();
        assert_eq!(
            board.channel_info(5).unwrap(),
            TriggerChannelInfo::External { channel: 5 }
        );
        board.set_trigger_source(TriggerSource::Internal).unwrap();
        board
            .set_internal_trigger(ChannelSelect::Channel(5), 10e3, 4_010, 20, 0.0)
            .unwrap();
        let info = board.channel_info(5).unwrap();
        let TriggerChannelInfo::Internal {
            frequency,
            width,
            count,
            offset_ps,
            ..
        } = info
        else {
            panic!("internal trigger expected, got {info:?}");
        };
        assert!((frequency - 10e3).abs() < 1e-6);
        assert_eq!(width, None);
        assert_eq!(count, Some(20));
        assert_eq!(offset_ps, 4_010);
        assert!(info.to_string().contains("20 pulses"));
    }
}
