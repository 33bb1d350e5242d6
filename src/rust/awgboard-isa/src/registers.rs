// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register offsets, grouped by the bank they live in.

/// AWG core registers (banks [`AWG_CORE_1`](crate::bank::reg_bank::AWG_CORE_1)
/// and [`AWG_CORE_2`](crate::bank::reg_bank::AWG_CORE_2)).
pub mod awg_core {
    pub const IDENTITY: u16 = 0x00;
    pub const VERSION: u16 = 0x04;
    pub const SYSTEM_STATUS: u16 = 0x08;
    pub const TEST: u16 = 0x0C;
    /// Zero code, amplitude gain and mode bits of the first lane.
    /// The second lane's copy sits [`LANE_STRIDE`] bytes higher.
    pub const CNFG0: u16 = 0x80;
    /// Loop count of the first lane.
    pub const CNFG1: u16 = 0x84;
    pub const CNFG2: u16 = 0x88;
    pub const CNFG3: u16 = 0x8C;
    /// Routes bulk writes to the command or wave RAM of a lane.
    pub const CNFG4: u16 = 0xC0;
    pub const CNFG5: u16 = 0x114;
    pub const CTRL: u16 = 0xD0;
    pub const STATUS1: u16 = 0x100;
    pub const STATUS2: u16 = 0x104;

    pub const LANE_STRIDE: u16 = 0x08;

    pub const CNFG0_MARK_IN_WAVE: u32 = 1 << 0;
    pub const CNFG0_HOLD_OUTPUT: u32 = 1 << 1;
    pub const CNFG0_AMP_GAIN_SHIFT: u32 = 16;

    pub const CTRL_RUN_SHIFT: u32 = 0;
    pub const CTRL_STOP_SHIFT: u32 = 4;

    pub const CNFG4_COMMAND_SELECT_SHIFT: u32 = 0;
    pub const CNFG4_WAVE_SELECT_SHIFT: u32 = 4;
    pub const CNFG4_READBACK_SHIFT: u32 = 8;
}

/// DDR controller registers (bank [`DDR`](crate::bank::reg_bank::DDR)).
pub mod ddr {
    /// Assert then deassert bit 0 to reset the engine.
    pub const RESET: u16 = 0x10;
    /// Read-path scratch registers cleared before each read.
    pub const READ_SETUP: [u16; 4] = [0x20, 0x24, 0x28, 0x2C];
    pub const STOP_READ: u16 = 0x40;
    /// A rising edge on bit 0 starts streaming.
    pub const START_READ: u16 = 0x44;
    pub const READ_ADDR: u16 = 0x48;
    pub const READ_LEN: u16 = 0x4C;
    pub const STATUS: u16 = 0x64;

    pub const STATUS_BUSY: u32 = 1 << 0;
}

/// Network core registers (bank [`NETWORK`](crate::bank::reg_bank::NETWORK)).
pub mod network {
    pub const IP_ADDR: u16 = 0x20;
    pub const NETMASK: u16 = 0x24;
    pub const GATEWAY: u16 = 0x28;
    pub const MAC_LOW: u16 = 0x2C;
    pub const MAC_HIGH: u16 = 0x30;
    /// Counts every datagram the board has accepted.
    pub const FRAME_COUNT: u16 = 0x58;
    /// Selects the peer whose datagrams are counted.
    pub const COUNT_SOURCE: u16 = 0x5C;
}

/// I2C proxy registers (bank [`I2C_PROXY`](crate::bank::reg_bank::I2C_PROXY)).
pub mod i2c {
    pub const PRESCALE: u16 = 0x040;
    pub const CONTROL: u16 = 0x020;
    pub const COMMAND: u16 = 0x100;
    pub const TX_FIFO: u16 = 0x108;
    pub const RX_DATA: u16 = 0x10C;

    pub const PRESCALE_VALUE: u32 = 0x0A;
    pub const CONTROL_ENABLE: u32 = 0xD0;
    pub const COMMAND_EXECUTE: u32 = 0x0D;
    /// FIFO tag: the byte opens a transaction.
    pub const TX_START: u32 = 0x100;
    /// FIFO tag: the byte closes a transaction.
    pub const TX_STOP: u32 = 0x200;

    /// Bus address of the configuration EEPROM.
    pub const EEPROM_DEVICE: u32 = 0x52;
}

/// DAC registers, reached through the SPI proxy.
pub mod dac {
    pub const PAGE: u16 = 0x008;
    /// Full-scale current, high bits. Low byte at `+1`, second lane `+4`.
    pub const FULL_SCALE: u16 = 0x40;
    pub const OFFSET_ENABLE: u16 = 0x135;
    pub const OFFSET_LSB: u16 = 0x136;
    pub const OFFSET_MSB: u16 = 0x137;
    pub const OFFSET_SIXTEEN: u16 = 0x13A;
    pub const STATUS: u16 = 0x147;

    pub const STATUS_READY: u32 = 0xC0;

    /// Address of a DAC register on the SPI proxy bank.
    pub const fn spi_address(device: u16, offset: u16) -> u16 {
        (device << 12) | offset
    }
}

/// Trigger board registers of the status-reply family.
pub mod trigger {
    pub const BANK_CONTROL: u32 = 4;
    pub const BANK_DELAY: u32 = 5;
    pub const BANK_IDENTITY: u32 = 8;

    pub const OUTPUT_ENABLE: u32 = 0x040;
    pub const TRIGGER_SOURCE: u32 = 0x044;
    pub const INTERNAL_START: u32 = 0x048;
    pub const CLOCK_CONTROL: u32 = 0x04C;
    pub const COUNT_BASE: u32 = 0x080;
    pub const COARSE_OFFSET_BASE: u32 = 0x100;
    pub const PERIOD_BASE: u32 = 0x180;
    pub const WIDTH_BASE: u32 = 0x200;

    pub const DELAY_LOAD: u32 = 0x0;
    pub const DELAY_TAP1: u32 = 0x4;
    pub const DELAY_TAP2: u32 = 0x8;
    pub const DELAY_TAP3: u32 = 0xC;
    pub const DELAY_TAP4: u32 = 0x10;

    pub const CLOCK_EXTERNAL_BIT: u32 = 0;

    /// Per-channel register at `base`, channels numbered from 1.
    pub const fn channel_register(base: u32, channel: u8) -> u32 {
        base + (channel as u32 - 1) * 4
    }
}
