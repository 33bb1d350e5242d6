// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! DDR readback and throughput negotiation.
//!
//! The board streams a DDR region as a burst of 1 KiB frames once a read is
//! started. Frames are received straight into the endpoint's buffer. How
//! many frames the host can take in one burst without losses depends on the
//! network path, so the block size is negotiated on connect and lowered
//! whenever reads keep failing.

use std::time::{Duration, Instant};

use awgboard_isa::bank::module;
use awgboard_isa::registers::ddr;
use awgboard_isa::wire::{FRAME_HEADER_LEN, FRAME_LEN, FRAME_PAYLOAD_LEN};
use awgboard_log::{debug, error, info, warn};

use crate::codec::{DdrHeader, RegisterOp};
use crate::endpoint::{Endpoint, recv_on};
use crate::link::Link;
use crate::retry::{RetryPolicy, with_retry};
use crate::{Error, Result};

/// DDR reads must be multiples of this many bytes.
pub const DDR_READ_ALIGN: usize = 4096;

/// Frames of a DDR read, as received.
#[derive(Debug)]
pub struct DdrReadout<'a> {
    frames: &'a [u8],
}

impl<'a> DdrReadout<'a> {
    /// Raw frames including headers.
    pub fn raw(&self) -> &'a [u8] {
        self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len() / FRAME_LEN
    }

    /// Payload of every frame, in address order.
    pub fn payload(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.frames
            .chunks_exact(FRAME_LEN)
            .map(|frame| &frame[FRAME_HEADER_LEN..])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_count() * FRAME_PAYLOAD_LEN);
        for chunk in self.payload() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// Timing of a DDR self test.
#[derive(Debug, Clone, Copy)]
pub struct SelfTestReport {
    pub bytes: usize,
    pub write: Duration,
    pub read: Duration,
}

impl<L: Link> Endpoint<L> {
    /// Read `length` bytes of DDR starting at `start_addr`.
    ///
    /// Both must be multiples of 4 KiB. The read is split into blocks of the
    /// negotiated size; a block that keeps failing lowers the block size for
    /// good and is read again with the smaller size.
    pub fn read_ddr(&mut self, module_id: u8, start_addr: u32, length: usize) -> Result<DdrReadout<'_>> {
        check_read(module_id, start_addr, length)?;
        if self.block_exp.is_none() {
            return Err(Error::NotNegotiated);
        }
        self.view_offset = 0;
        self.reserve_frames(length / FRAME_PAYLOAD_LEN);
        let mut done = 0;
        while done < length {
            let Some(exp) = self.block_exp else {
                return Err(Error::NotNegotiated);
            };
            let block = (1usize << exp).min(length - done);
            let address = start_addr + done as u32;
            let timeout = self.settings.frame_timeout();
            let policy = self.settings.read_policy();
            match self.read_ddr_block_with(module_id, address, block, policy, timeout) {
                Ok(()) => done += block,
                Err(err) if err.is_precondition() => return Err(err),
                Err(err) => self.degrade_block_size(&err)?,
            }
        }
        let end = self.view_offset;
        Ok(DdrReadout {
            frames: &self.buffer[..end],
        })
    }

    /// Read one block into the buffer at the current view offset.
    ///
    /// `negotiating` reads make a single attempt, as used while probing the
    /// block size.
    pub fn read_ddr_block(&mut self, module_id: u8, start_addr: u32, length: usize, negotiating: bool) -> Result<()> {
        check_read(module_id, start_addr, length)?;
        if let Some(exp) = self.block_exp {
            if length > 1 << exp {
                return Err(Error::precondition(format!(
                    "block of {length} bytes exceeds the negotiated {} bytes",
                    1usize << exp
                )));
            }
        }
        self.reserve_frames(self.view_offset / FRAME_LEN + length / FRAME_PAYLOAD_LEN);
        let policy = if negotiating {
            RetryPolicy::single()
        } else {
            self.settings.read_policy()
        };
        let timeout = self.settings.frame_timeout();
        self.read_ddr_block_with(module_id, start_addr, length, policy, timeout)
    }

    fn read_ddr_block_with(
        &mut self,
        module_id: u8,
        start_addr: u32,
        length: usize,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<()> {
        with_retry(
            self,
            policy,
            "read ddr",
            |ep| ep.read_block_once(module_id, start_addr, length, timeout),
            |ep| {
                if let Err(err) = ep.stop_ddr_read(module_id) {
                    debug!("Stopping the DDR read failed: {}", err);
                }
                ep.flush();
            },
        )?;
        self.view_offset += length / FRAME_PAYLOAD_LEN * FRAME_LEN;
        Ok(())
    }

    fn read_block_once(&mut self, module_id: u8, start_addr: u32, length: usize, timeout: Duration) -> Result<()> {
        self.start_ddr_read(module_id, start_addr, length)?;
        for index in 0..length / FRAME_PAYLOAD_LEN {
            let at = self.view_offset + index * FRAME_LEN;
            let frame = &mut self.buffer[at..at + FRAME_LEN];
            let received = recv_on(&mut self.link, frame, timeout)?;
            if received != FRAME_LEN {
                return Err(Error::ShortFrame {
                    expected: FRAME_LEN,
                    received,
                });
            }
            let expected = DdrHeader {
                module: module_id,
                address: start_addr + (index * FRAME_PAYLOAD_LEN) as u32,
            };
            if DdrHeader::decode(frame) != Some(expected) {
                return Err(Error::FrameOutOfSequence { index });
            }
        }
        Ok(())
    }

    /// Program address and length and start streaming.
    pub fn start_ddr_read(&mut self, module_id: u8, start_addr: u32, length: usize) -> Result<()> {
        self.wait_ddr_idle(module_id)?;
        let mut ops: Vec<_> = ddr::READ_SETUP
            .iter()
            .map(|&address| RegisterOp::write(module_id, address, 0))
            .collect();
        ops.extend([
            RegisterOp::write(module_id, ddr::READ_ADDR, start_addr),
            RegisterOp::write(module_id, ddr::READ_LEN, length as u32),
            RegisterOp::write(module_id, ddr::START_READ, 0),
            RegisterOp::write(module_id, ddr::START_READ, 1),
            RegisterOp::write(module_id, ddr::START_READ, 0),
        ]);
        self.reg_ops(&ops, true)?;
        Ok(())
    }

    pub fn stop_ddr_read(&mut self, module_id: u8) -> Result<()> {
        self.write_regs_no_reply(&[(module_id, ddr::STOP_READ, 1)])?;
        self.write_reg(module_id, ddr::STOP_READ, 0)
    }

    /// Poll the busy flag; an engine that stays busy is reset.
    fn wait_ddr_idle(&mut self, module_id: u8) -> Result<()> {
        for _ in 0..self.settings.busy_poll_limit.max(1) {
            if self.read_reg(module_id, ddr::STATUS)? & ddr::STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        warn!("DDR memory is busy; resetting the engine");
        self.reset_ddr(module_id)
    }

    /// Negotiate the DDR read block size.
    ///
    /// Starting from the largest size, every candidate must survive all
    /// trials, with the receive timeout growing with the trial index. On
    /// total failure bulk reads are disabled and `None` is returned;
    /// register access keeps working.
    pub fn set_speed(&mut self) -> Result<Option<u8>> {
        let base = self.settings.frame_timeout();
        let (min_exp, max_exp) = (self.settings.min_block_exp, self.settings.max_block_exp);
        self.block_exp = None;
        self.reserve_frames((1usize << max_exp) / FRAME_PAYLOAD_LEN);
        for exp in (min_exp..=max_exp).rev() {
            if self.probe_block_size(exp, base)? {
                self.block_exp = Some(exp);
                self.view_offset = 0;
                info!(
                    "Device connect successful, readout data size unit is {} kB",
                    1usize << (exp - 10)
                );
                return Ok(Some(exp));
            }
        }
        self.view_offset = 0;
        error!(
            "Device connect failed: no DDR read block size works with {}",
            self.link.peer()
        );
        Ok(None)
    }

    fn probe_block_size(&mut self, exp: u8, base: Duration) -> Result<bool> {
        for trial in 0..self.settings.negotiation_trials {
            if let Err(err) = self.stop_ddr_read(module::DDR_CONTROLLER) {
                debug!("Block size {} trial {}: {}", 1usize << exp, trial, err);
                return Ok(false);
            }
            self.flush();
            self.view_offset = 0;
            let timeout = base * (trial + 1);
            match self.read_ddr_block_with(
                module::DDR_CONTROLLER,
                0,
                1 << exp,
                RetryPolicy::single(),
                timeout,
            ) {
                Ok(()) => {}
                Err(err) if err.is_precondition() => return Err(err),
                Err(err) => {
                    debug!("Block size {} trial {}: {}", 1usize << exp, trial, err);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Halve the block size after a block failed for good.
    fn degrade_block_size(&mut self, cause: &Error) -> Result<()> {
        let Some(exp) = self.block_exp else {
            return Err(Error::NotNegotiated);
        };
        let floor = self.settings.min_block_exp;
        if exp <= floor {
            error!("Network data read failed at the {} byte floor: {}", 1usize << floor, cause);
            return Err(Error::ThroughputFloor { floor: 1 << floor });
        }
        let pause = self.settings.degrade_pause();
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
        self.block_exp = Some(exp - 1);
        warn!(
            "DDR read failed ({}); transmit unit set to {} kB",
            cause,
            1usize << (exp - 11)
        );
        if let Err(err) = self.stop_ddr_read(module::DDR_CONTROLLER) {
            debug!("Stopping the DDR read failed: {}", err);
        }
        self.flush();
        Ok(())
    }

    /// Grow the receive buffer to hold `frames` frames.
    fn reserve_frames(&mut self, frames: usize) {
        let needed = frames * FRAME_LEN;
        if self.buffer.len() < needed {
            self.buffer.resize(needed, 0);
        }
    }

    /// Write a counter pattern of `mebibytes` MiB starting at `start_addr`,
    /// read it back and compare.
    pub fn ddr_self_test(&mut self, start_addr: u32, mebibytes: usize) -> Result<SelfTestReport> {
        let pattern: Vec<u8> = (0..1u32 << 19)
            .flat_map(|i| ((i & 0xFFFF) as u16).to_le_bytes())
            .collect();
        let started = Instant::now();
        for i in 0..mebibytes {
            self.write_ddr(module::DDR_CONTROLLER, start_addr + ((i as u32) << 20), &pattern)?;
        }
        let written = Instant::now();
        for i in 0..mebibytes {
            let address = start_addr + ((i as u32) << 20);
            let readout = self.read_ddr(module::DDR_CONTROLLER, address, pattern.len())?;
            let mismatch = readout
                .payload()
                .flatten()
                .zip(&pattern)
                .position(|(got, want)| got != want);
            if let Some(offset) = mismatch {
                let offset = (i << 20) + offset;
                self.reset_ddr(module::DDR_CONTROLLER)?;
                return Err(Error::new(format!(
                    "DDR self test mismatch at byte {offset} after {start_addr:#x}"
                )));
            }
        }
        let report = SelfTestReport {
            bytes: mebibytes << 20,
            write: written - started,
            read: written.elapsed(),
        };
        info!(
            "DDR self test of {} MiB passed: write {:?}, read {:?}",
            mebibytes, report.write, report.read
        );
        Ok(report)
    }

    /// Write a 128 KiB counter pattern into block RAM of `module_id`.
    pub fn ram_self_test(&mut self, module_id: u8) -> Result<()> {
        let pattern: Vec<u8> = (0..=u16::MAX).flat_map(u16::to_le_bytes).collect();
        self.write_ram(module_id, 0, 0, &pattern)?;
        info!("RAM self test of {} kB passed", pattern.len() >> 10);
        Ok(())
    }
}

fn check_read(module_id: u8, start_addr: u32, length: usize) -> Result<()> {
    if !module::DDR_MODULES.contains(&module_id) {
        return Err(Error::precondition(format!(
            "module {module_id} is not a DDR module"
        )));
    }
    if length == 0 || !length.is_multiple_of(DDR_READ_ALIGN) {
        return Err(Error::precondition(format!(
            "DDR read of {length} bytes is not a non-empty multiple of 4 KiB"
        )));
    }
    if !(start_addr as usize).is_multiple_of(DDR_READ_ALIGN) {
        return Err(Error::precondition(format!(
            "DDR read address {start_addr:#x} is not 4 KiB aligned"
        )));
    }
    if u64::from(start_addr) + length as u64 > 1 << 32 {
        return Err(Error::precondition(format!(
            "DDR read of {length} bytes at {start_addr:#x} runs past 4 GiB"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimLink, SimulatedBoard, fast_settings};

    fn connected(board: &SimulatedBoard) -> Endpoint<SimLink> {
        let mut endpoint = Endpoint::new(board.link(), fast_settings());
        endpoint.initialize().expect("board comes up");
        endpoint
    }

    #[test]
    fn test_negotiation_picks_largest_working_block() {
        let board = SimulatedBoard::new();
        board.limit_stream_frames(16);
        let endpoint = connected(&board);
        assert_eq!(endpoint.block_size(), Some(16 << 10));
    }

    #[test]
    fn test_negotiation_failure_keeps_registers_usable() {
        let board = SimulatedBoard::new();
        board.limit_stream_frames(2);
        let mut endpoint = connected(&board);
        assert_eq!(endpoint.block_size(), None);
        assert!(matches!(
            endpoint.read_ddr(1, 0, 4096),
            Err(Error::NotNegotiated)
        ));
        endpoint.write_reg(0x70, 0x80, 5).expect("registers still work");
    }

    #[test]
    fn test_read_ddr_returns_written_data() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        let data: Vec<u8> = (0..3 * 65536u32).map(|i| (i % 253) as u8).collect();
        endpoint.write_ddr(1, 1 << 20, &data).expect("written");
        let readout = endpoint.read_ddr(1, 1 << 20, data.len()).expect("read");
        assert_eq!(readout.frame_count(), data.len() / 1024);
        assert_eq!(readout.to_vec(), data);
    }

    #[test]
    fn test_read_ddr_preconditions() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        assert!(matches!(
            endpoint.read_ddr(1, 0, 1024),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            endpoint.read_ddr(1, 1024, 4096),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            endpoint.read_ddr(0, 0, 4096),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            endpoint.read_ddr(1, 0xFFFF_F000, 8192),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            endpoint.read_ddr_block(1, 0xFFFF_F000, 8192, false),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn test_read_ddr_last_block() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        endpoint.write_ddr(1, 0xFFFF_F000, &[0x77; 4096]).expect("written");
        let readout = endpoint.read_ddr(1, 0xFFFF_F000, 4096).expect("read");
        assert_eq!(readout.to_vec(), vec![0x77; 4096]);
    }

    #[test]
    fn test_read_ddr_block_rejects_oversized_block() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        assert_eq!(endpoint.block_size(), Some(1 << 16));
        assert!(matches!(
            endpoint.read_ddr_block(1, 0, 1 << 17, false),
            Err(Error::Precondition(_))
        ));
        assert_eq!(endpoint.view_offset, 0);
    }

    #[test]
    fn test_read_ddr_block_negotiating_makes_one_attempt() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        board.truncate_next_streams(1);
        let err = endpoint
            .read_ddr_block(1, 0, 4096, true)
            .expect_err("single attempt fails");
        assert!(err.is_transient());
        assert_eq!(endpoint.view_offset, 0);
        endpoint.read_ddr_block(1, 0, 4096, true).expect("stream is whole again");
    }

    #[test]
    fn test_read_ddr_block_retries_outside_negotiation() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        endpoint.write_ddr(1, 0, &[0x11; 4096]).expect("written");
        board.truncate_next_streams(2);
        endpoint.read_ddr_block(1, 0, 4096, false).expect("third attempt succeeds");
        assert_eq!(endpoint.view_offset, 4 * FRAME_LEN);

        board.truncate_next_streams(5);
        assert!(matches!(
            endpoint.read_ddr_block(1, 0, 4096, false),
            Err(Error::RetriesExhausted { attempts: 5, .. })
        ));
        assert_eq!(endpoint.view_offset, 4 * FRAME_LEN);
    }

    #[test]
    fn test_read_ddr_block_appends_at_view_offset() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        endpoint.write_ddr(1, 0, &[0xA1; 4096]).expect("written");
        endpoint.write_ddr(1, 8192, &[0xB2; 8192]).expect("written");
        endpoint.read_ddr_block(1, 0, 4096, false).expect("first block");
        endpoint.read_ddr_block(1, 8192, 8192, false).expect("second block");
        assert_eq!(endpoint.view_offset, 12 * FRAME_LEN);

        let readout = DdrReadout {
            frames: &endpoint.buffer[..endpoint.view_offset],
        };
        let payload = readout.to_vec();
        assert_eq!(payload[..4096], [0xA1; 4096]);
        assert_eq!(payload[4096..], [0xB2; 8192]);
        let second = DdrHeader::decode(&readout.raw()[4 * FRAME_LEN..]).expect("header");
        assert_eq!(second.address, 8192);
    }

    #[test]
    fn test_truncated_stream_is_retried() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        endpoint.write_ddr(1, 0, &[0x5A; 8192]).expect("written");
        board.truncate_next_streams(2);
        let readout = endpoint.read_ddr(1, 0, 8192).expect("third attempt succeeds");
        assert!(readout.to_vec().iter().all(|b| *b == 0x5A));
        assert_eq!(endpoint.block_size(), Some(1 << 16));
    }

    #[test]
    fn test_persistent_failure_degrades_block_size() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        endpoint.write_ddr(1, 0, &[0xC3; 65536]).expect("written");
        // One block's worth of attempts fails, then the link recovers.
        board.truncate_next_streams(5);
        let readout = endpoint.read_ddr(1, 0, 65536).expect("read with smaller blocks");
        assert_eq!(readout.to_vec(), vec![0xC3; 65536]);
        assert_eq!(endpoint.block_size(), Some(1 << 15));
    }

    #[test]
    fn test_floor_failure_is_loud() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        endpoint.block_exp = Some(12);
        board.truncate_next_streams(100);
        assert!(matches!(
            endpoint.read_ddr(1, 0, 4096),
            Err(Error::ThroughputFloor { floor: 4096 })
        ));
    }

    #[test]
    fn test_ddr_self_test() {
        let board = SimulatedBoard::new();
        let mut endpoint = connected(&board);
        let report = endpoint.ddr_self_test(0, 1).expect("pattern survives");
        assert_eq!(report.bytes, 1 << 20);
        endpoint.ram_self_test(0x10).expect("ram pattern written");
    }
}
