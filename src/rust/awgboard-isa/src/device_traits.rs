// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

/// Hardware constants of a board family.
///
/// NOTE: The AWG values match the firmware's memory map; changing them
///     without a matching firmware changes the meaning of every program.
#[derive(Debug)]
pub struct DeviceTraits {
    pub name: &'static str,
    pub channel_count: u8,
    /// Samples per second.
    pub sampling_rate: f64,
    /// Samples output per sequencer clock.
    pub samples_per_clock: u16,
    pub has_ddr: bool,
    /// Byte offset of channel 1's DDR region.
    pub ddr_base_addr: u64,
    /// Bytes of DDR reserved for each channel.
    pub channel_ddr_space: u64,
    /// Total DDR budget addressable by replay programs.
    pub ddr_budget: u64,
    pub max_instruction_count: usize,
    pub max_sample_count: usize,
    /// Wave RAM writes must be a multiple of this many samples.
    pub wave_burst_samples: usize,
    pub min_wave_unit_samples: usize,
    pub max_repeat_count: u32,
    /// Largest wave the replay templates may stream per DDR read.
    pub max_replay_wave_bytes: u64,
    /// Fraction of full scale kept free for offset trimming.
    pub headroom: f64,
}

impl DeviceTraits {
    pub fn from_device_kind(kind: &DeviceKind) -> &'static Self {
        match kind {
            DeviceKind::Awg => &AWG_TRAITS,
            DeviceKind::TriggerBoard => &TRIGGER_BOARD_TRAITS,
        }
    }

    /// log2 of samples per clock; shift between sample and clock units.
    pub fn clock_shift(&self) -> u32 {
        self.samples_per_clock.trailing_zeros()
    }

    /// Seconds per sequencer clock.
    pub fn clock_period(&self) -> f64 {
        self.samples_per_clock as f64 / self.sampling_rate
    }

    /// DDR byte address of `channel`'s region (1-based).
    pub fn channel_ddr_base(&self, channel: u8) -> u64 {
        self.ddr_base_addr + self.channel_ddr_space * u64::from(channel.saturating_sub(1))
    }
}

pub const AWG_TRAITS: DeviceTraits = DeviceTraits {
    name: "AWG",
    channel_count: 4,
    sampling_rate: 2e9,
    samples_per_clock: 8,
    has_ddr: true,
    ddr_base_addr: 0,
    channel_ddr_space: 128 << 20,
    ddr_budget: 512 << 20,
    max_instruction_count: 1 << 13,
    max_sample_count: 200_000,
    wave_burst_samples: 512,
    min_wave_unit_samples: 32,
    max_repeat_count: 50_000,
    max_replay_wave_bytes: 200 << 10,
    headroom: 1.1,
};

pub const TRIGGER_BOARD_TRAITS: DeviceTraits = DeviceTraits {
    name: "TriggerBoard",
    channel_count: 16,
    sampling_rate: 250e6,
    samples_per_clock: 1,
    has_ddr: false,
    ddr_base_addr: 0,
    channel_ddr_space: 0,
    ddr_budget: 0,
    max_instruction_count: 0,
    max_sample_count: 0,
    wave_burst_samples: 1,
    min_wave_unit_samples: 0,
    max_repeat_count: 0,
    max_replay_wave_bytes: 0,
    headroom: 1.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Awg,
    TriggerBoard,
}

impl DeviceKind {
    pub fn traits(&self) -> &'static DeviceTraits {
        DeviceTraits::from_device_kind(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awg_clock() {
        let traits = DeviceKind::Awg.traits();
        assert_eq!(traits.clock_shift(), 3);
        assert!((traits.clock_period() - 4e-9).abs() < 1e-18);
        assert_eq!(traits.channel_ddr_base(1), 0);
        assert_eq!(traits.channel_ddr_base(3), 256 << 20);
    }
}
