// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Configuration EEPROM behind the I2C proxy.
//!
//! The lower half holds the network identity and is written only through
//! [`NetworkConfig`](crate::NetworkConfig). The upper half carries the
//! factory calibration: two marker bytes followed by little-endian 32 bit
//! parameters.

use std::thread;
use std::time::Duration;

use awgboard_isa::bank::reg_bank::I2C_PROXY;
use awgboard_isa::registers::i2c;
use awgboard_log::{diagnostic, error, warn};
use awgboard_transport::{Endpoint, Link};

use crate::{Error, Result};

/// First address open to [`Eeprom::write_byte`].
pub const USER_AREA_START: u8 = 0x80;
const MARKER_DEVICE_ADDR: u8 = 0x80;
const MARKER_STATUS_ADDR: u8 = 0x81;
const MARKER_DEVICE: u8 = 0xDA;
const MARKER_VALID: u8 = 0x5A;
/// Written to the status marker while the parameters are being updated.
const MARKER_UPDATING: u8 = 0x00;
const PARAM_BASE: u16 = 130;
/// Parameters that fit below the end of the EEPROM.
pub const PARAM_COUNT: usize = 31;

/// Scale of the fixed point amplifier gain parameters.
const GAIN_SCALE: f64 = 65536.0;

pub struct Eeprom<'a, L: Link> {
    endpoint: &'a mut Endpoint<L>,
    settle: Duration,
}

impl<'a, L: Link> Eeprom<'a, L> {
    pub fn new(endpoint: &'a mut Endpoint<L>, settle: Duration) -> Self {
        Eeprom { endpoint, settle }
    }

    /// Queue one I2C transaction in the proxy FIFO and run it.
    fn transaction(&mut self, bytes: &[u32]) -> Result<()> {
        let mut ops = vec![
            (I2C_PROXY, i2c::PRESCALE, i2c::PRESCALE_VALUE),
            (I2C_PROXY, i2c::CONTROL, i2c::CONTROL_ENABLE),
        ];
        ops.extend(bytes.iter().map(|byte| (I2C_PROXY, i2c::TX_FIFO, *byte)));
        ops.push((I2C_PROXY, i2c::COMMAND, i2c::COMMAND_EXECUTE));
        self.endpoint.write_regs(&ops)?;
        thread::sleep(self.settle);
        Ok(())
    }

    pub fn read_byte(&mut self, address: u8) -> Result<u8> {
        let device = i2c::EEPROM_DEVICE << 1;
        self.transaction(&[i2c::TX_START | device, i2c::TX_STOP | u32::from(address)])?;
        self.transaction(&[i2c::TX_START | device | 1, i2c::TX_STOP])?;
        let value = self.endpoint.read_reg(I2C_PROXY, i2c::RX_DATA)?;
        diagnostic!("EEPROM[{:#04x}] = {:#04x}", address, value & 0xFF);
        Ok((value & 0xFF) as u8)
    }

    /// Write a byte of the user area and verify it.
    pub fn write_byte(&mut self, address: u8, data: u8) -> Result<()> {
        if address < USER_AREA_START {
            return Err(Error::precondition(format!(
                "EEPROM address {address:#04x} is write protected"
            )));
        }
        self.write_byte_unprotected(address, data)
    }

    pub(crate) fn write_byte_unprotected(&mut self, address: u8, data: u8) -> Result<()> {
        let device = i2c::EEPROM_DEVICE << 1;
        self.transaction(&[
            i2c::TX_START | device,
            u32::from(address),
            i2c::TX_STOP | u32::from(data),
        ])?;
        let read = self.read_byte(address)?;
        if read != data {
            error!(
                "EEPROM write verification failed at {:#04x}: wrote {:#04x}, read {:#04x}",
                address, data, read
            );
            return Err(Error::EepromVerify {
                address,
                written: data,
                read,
            });
        }
        Ok(())
    }

    fn param_address(index: usize) -> Result<u8> {
        if index >= PARAM_COUNT {
            return Err(Error::precondition(format!(
                "EEPROM parameter {index} out of range, {PARAM_COUNT} available"
            )));
        }
        Ok((PARAM_BASE + 4 * index as u16) as u8)
    }

    pub fn read_param(&mut self, index: usize) -> Result<i32> {
        let base = Self::param_address(index)?;
        let mut bytes = [0u8; 4];
        for (offset, byte) in (0u8..).zip(bytes.iter_mut()) {
            *byte = self.read_byte(base + offset)?;
        }
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn write_param(&mut self, index: usize, value: i32) -> Result<()> {
        let base = Self::param_address(index)?;
        for (offset, byte) in (0u8..).zip(value.to_le_bytes()) {
            self.write_byte(base + offset, byte)?;
        }
        Ok(())
    }
}

/// Factory calibration of the four AWG channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// DAC offset code that brings the zero code to 0 V.
    pub offsets: [i32; 4],
    /// Output amplifier gain correction.
    pub diff_amp_gain: [f64; 4],
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            offsets: [0; 4],
            diff_amp_gain: [1.0; 4],
        }
    }
}

impl Calibration {
    /// Read the calibration. Returns `None` when the EEPROM carries no
    /// complete parameter set.
    pub fn load<L: Link>(eeprom: &mut Eeprom<'_, L>) -> Result<Option<Self>> {
        let device = eeprom.read_byte(MARKER_DEVICE_ADDR)?;
        let status = eeprom.read_byte(MARKER_STATUS_ADDR)?;
        if device != MARKER_DEVICE || status != MARKER_VALID {
            warn!(
                "No valid calibration in EEPROM (markers {:#04x} {:#04x}), using defaults",
                device, status
            );
            return Ok(None);
        }
        let mut calibration = Calibration::default();
        for (index, offset) in calibration.offsets.iter_mut().enumerate() {
            *offset = eeprom.read_param(index)?;
        }
        for (index, gain) in calibration.diff_amp_gain.iter_mut().enumerate() {
            *gain = f64::from(eeprom.read_param(index + 4)?) / GAIN_SCALE;
        }
        Ok(Some(calibration))
    }

    /// Store the calibration. The status marker is only set once every
    /// parameter has been written.
    pub fn store<L: Link>(&self, eeprom: &mut Eeprom<'_, L>) -> Result<()> {
        eeprom.write_byte(MARKER_DEVICE_ADDR, MARKER_DEVICE)?;
        eeprom.write_byte(MARKER_STATUS_ADDR, MARKER_UPDATING)?;
        for (index, offset) in self.offsets.iter().enumerate() {
            eeprom.write_param(index, *offset)?;
        }
        for (index, gain) in self.diff_amp_gain.iter().enumerate() {
            eeprom.write_param(index + 4, (gain * GAIN_SCALE) as i32)?;
        }
        eeprom.write_byte(MARKER_STATUS_ADDR, MARKER_VALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awgboard_transport::sim::{SimLink, SimulatedBoard, fast_settings};

    fn endpoint() -> (Endpoint<SimLink>, SimulatedBoard) {
        let board = SimulatedBoard::new();
        let endpoint = Endpoint::new(board.link(), fast_settings());
        (endpoint, board)
    }

    #[test]
    fn test_byte_access() {
        let (mut endpoint, board) = endpoint();
        board.set_eeprom(0x90, &[0x42]);
        let mut eeprom = Eeprom::new(&mut endpoint, Duration::ZERO);
        assert_eq!(eeprom.read_byte(0x90).unwrap(), 0x42);
        eeprom.write_byte(0x91, 0x17).unwrap();
        assert_eq!(board.eeprom()[0x91], 0x17);
    }

    #[test]
    fn test_lower_half_is_protected() {
        let (mut endpoint, board) = endpoint();
        let before = board.datagrams_received();
        let mut eeprom = Eeprom::new(&mut endpoint, Duration::ZERO);
        assert!(matches!(eeprom.write_byte(0x7F, 1), Err(Error::Precondition(_))));
        assert_eq!(board.datagrams_received(), before);
    }

    #[test]
    fn test_params() {
        let (mut endpoint, board) = endpoint();
        let mut eeprom = Eeprom::new(&mut endpoint, Duration::ZERO);
        eeprom.write_param(2, -1234).unwrap();
        assert_eq!(board.eeprom()[138..142], (-1234i32).to_le_bytes());
        assert_eq!(eeprom.read_param(2).unwrap(), -1234);
        assert!(eeprom.read_param(PARAM_COUNT).is_err());
    }

    #[test]
    fn test_calibration_round_trip() {
        let (mut endpoint, board) = endpoint();
        let mut eeprom = Eeprom::new(&mut endpoint, Duration::ZERO);
        assert_eq!(Calibration::load(&mut eeprom).unwrap(), None);
        let calibration = Calibration {
            offsets: [10, -20, 30, -40],
            diff_amp_gain: [1.0, 0.5, 1.25, 0.75],
        };
        calibration.store(&mut eeprom).unwrap();
        assert_eq!(board.eeprom()[0x80..0x82], [0xDA, 0x5A]);
        assert_eq!(Calibration::load(&mut eeprom).unwrap(), Some(calibration));
    }
}
