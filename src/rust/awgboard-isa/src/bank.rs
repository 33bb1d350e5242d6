// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Bank and module identifiers.
//!
//! Register records address a *bank* (one byte), bulk frames address a
//! *module* (the top byte of the second header word). The two namespaces
//! overlap numerically.

use std::ops::RangeInclusive;

/// Register banks of the datagram family.
pub mod reg_bank {
    /// DDR controller.
    pub const DDR: u8 = 0x01;
    /// SPI proxy towards the DAC chips.
    pub const SPI_PROXY: u8 = 0x10;
    /// I2C proxy towards the EEPROM.
    pub const I2C_PROXY: u8 = 0x20;
    /// Network core: addressing, MAC, frame counter.
    pub const NETWORK: u8 = 0x50;
    /// AWG core serving channels 1 and 2.
    pub const AWG_CORE_1: u8 = 0x70;
    /// AWG core serving channels 3 and 4.
    pub const AWG_CORE_2: u8 = 0x71;
}

/// Bulk-transfer modules.
pub mod module {
    use super::RangeInclusive;

    pub const DDR_CONTROLLER: u8 = 1;
    pub const DDR_MODULES: RangeInclusive<u8> = 1..=15;
    pub const RAM_MODULES: RangeInclusive<u8> = 16..=31;
    /// Channel 1/2 sequencer and wave RAM.
    pub const AWG_RAM_1: u8 = 0x10;
    /// Channel 3/4 sequencer and wave RAM.
    pub const AWG_RAM_2: u8 = 0x11;
    pub const UART: u8 = 32;
}

/// Chips behind an AWG core, in the numbering used by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    Dac1,
    Dac2,
    ClockPll,
    AwgCore1,
    AwgCore2,
}

impl Chip {
    /// DAC chip driving `channel` (1-based).
    pub fn dac_for_channel(channel: u8) -> Chip {
        if channel <= 2 { Chip::Dac1 } else { Chip::Dac2 }
    }

    /// AWG core serving `channel` (1-based).
    pub fn awg_for_channel(channel: u8) -> Chip {
        if channel <= 2 {
            Chip::AwgCore1
        } else {
            Chip::AwgCore2
        }
    }

    /// SPI device select of the chip, if it is reached through the SPI proxy.
    pub fn spi_device(self) -> Option<u16> {
        match self {
            Chip::Dac1 => Some(1),
            Chip::Dac2 => Some(2),
            Chip::ClockPll => Some(3),
            Chip::AwgCore1 | Chip::AwgCore2 => None,
        }
    }

    /// Register bank of the chip, if it is directly addressable.
    pub fn register_bank(self) -> Option<u8> {
        match self {
            Chip::AwgCore1 => Some(reg_bank::AWG_CORE_1),
            Chip::AwgCore2 => Some(reg_bank::AWG_CORE_2),
            _ => None,
        }
    }
}

/// Bulk module and RAM regions holding the program and samples of `channel`.
///
/// Returns `(module, command_region, wave_region)`.
pub fn channel_ram(channel: u8) -> (u8, u8, u8) {
    let module = if channel <= 2 {
        module::AWG_RAM_1
    } else {
        module::AWG_RAM_2
    };
    let lane = (channel - 1) & 1;
    (module, 1 << (lane + 2), 1 << lane)
}
