// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Bulk writes to block RAM and DDR.
//!
//! A bulk write is accepted only when the board's frame counter advanced by
//! exactly the number of frames sent; otherwise the whole transfer is
//! repeated.

use awgboard_isa::bank::module;
use awgboard_isa::wire::{FRAME_HEADER_LEN, FRAME_LEN, FRAME_PAYLOAD_LEN};
use awgboard_log::debug;

use crate::codec;
use crate::endpoint::Endpoint;
use crate::link::Link;
use crate::retry::{RetryPolicy, with_retry};
use crate::{Error, Result};

/// RAM addresses are 24 bits wide.
const RAM_ADDRESS_LIMIT: u64 = 1 << 24;

impl<L: Link> Endpoint<L> {
    /// Write `data` into block RAM `region` of `module_id`.
    ///
    /// `data` must be a non-empty multiple of 8 bytes.
    pub fn write_ram(&mut self, module_id: u8, region: u8, start_addr: u32, data: &[u8]) -> Result<()> {
        check_ram_request(module_id, start_addr, data)?;
        let frames = codec::ram_frames(module_id, region, start_addr, data);
        let policy = self.settings.write_policy();
        self.send_counted(policy, "write ram", &frames)
    }

    /// Write `data` to the UART bridge. The bridge does not take part in
    /// frame counting, so delivery is not verified.
    pub fn write_uart(&mut self, region: u8, start_addr: u32, data: &[u8]) -> Result<()> {
        check_payload(data, 8)?;
        let frames = codec::ram_frames(module::UART, region, start_addr, data);
        let policy = self.settings.write_policy();
        with_retry(
            self,
            policy,
            "write uart",
            |ep| {
                for frame in &frames {
                    ep.link.send(frame)?;
                }
                Ok(())
            },
            |ep| {
                ep.flush();
            },
        )
    }

    /// Read one frame (1 KiB) of block RAM.
    pub fn read_ram(&mut self, module_id: u8, region: u8, start_addr: u32) -> Result<Vec<u8>> {
        if !module::RAM_MODULES.contains(&module_id) {
            return Err(Error::precondition(format!(
                "module {module_id} is not a RAM module"
            )));
        }
        if region & 0x80 != 0 {
            return Err(Error::precondition(format!("RAM region {region:#x} out of range")));
        }
        if u64::from(start_addr) >= RAM_ADDRESS_LIMIT {
            return Err(Error::precondition(format!(
                "RAM address {start_addr:#x} exceeds 24 bits"
            )));
        }
        let request = codec::ram_read_request(module_id, region, start_addr);
        let policy = self.settings.read_policy();
        with_retry(
            self,
            policy,
            "read ram",
            |ep| {
                ep.link.send(&request)?;
                let timeout = ep.settings.reply_timeout();
                let mut reply = vec![0u8; FRAME_LEN];
                let received = ep.recv(&mut reply, timeout)?;
                if received <= FRAME_HEADER_LEN {
                    return Err(Error::ShortFrame {
                        expected: FRAME_LEN,
                        received,
                    });
                }
                reply.truncate(received);
                Ok(reply.split_off(FRAME_HEADER_LEN))
            },
            |ep| {
                ep.flush();
            },
        )
    }

    /// Write `data` into DDR through `module_id`.
    ///
    /// `data` must be a non-empty multiple of 1 KiB and `start_addr` 1 KiB
    /// aligned.
    pub fn write_ddr(&mut self, module_id: u8, start_addr: u32, data: &[u8]) -> Result<()> {
        if !module::DDR_MODULES.contains(&module_id) {
            return Err(Error::precondition(format!(
                "module {module_id} is not a DDR module"
            )));
        }
        check_payload(data, FRAME_PAYLOAD_LEN)?;
        if !(start_addr as usize).is_multiple_of(FRAME_PAYLOAD_LEN) {
            return Err(Error::precondition(format!(
                "DDR address {start_addr:#x} is not 1 KiB aligned"
            )));
        }
        if u64::from(start_addr) + data.len() as u64 > u64::from(u32::MAX) + 1 {
            return Err(Error::precondition("DDR write exceeds the 32 bit address space"));
        }
        let frames = codec::ddr_frames(module_id, start_addr, data);
        let policy = self.settings.write_policy();
        self.send_counted(policy, "write ddr", &frames)
    }

    /// Send `frames` and verify them against the board's frame counter.
    fn send_counted(&mut self, policy: RetryPolicy, operation: &'static str, frames: &[Vec<u8>]) -> Result<()> {
        let expected = frames.len() as u32;
        with_retry(
            self,
            policy,
            operation,
            |ep| {
                // The counter read is itself an accepted datagram.
                let first = ep.frame_count()?.wrapping_add(1);
                for frame in frames {
                    ep.link.send(frame)?;
                }
                let counted = ep.frame_count()?.wrapping_sub(first);
                if counted != expected {
                    debug!(
                        "{}: board counted {} of {} frames",
                        operation, counted, expected
                    );
                    return Err(Error::FrameCountMismatch { expected, counted });
                }
                Ok(())
            },
            |ep| {
                ep.flush();
            },
        )
    }
}

fn check_payload(data: &[u8], multiple: usize) -> Result<()> {
    if data.is_empty() || !data.len().is_multiple_of(multiple) {
        return Err(Error::precondition(format!(
            "payload of {} bytes is not a non-empty multiple of {multiple}",
            data.len()
        )));
    }
    Ok(())
}

fn check_ram_request(module_id: u8, start_addr: u32, data: &[u8]) -> Result<()> {
    if !module::RAM_MODULES.contains(&module_id) {
        return Err(Error::precondition(format!(
            "module {module_id} is not a RAM module"
        )));
    }
    check_payload(data, 8)?;
    if u64::from(start_addr) + data.len() as u64 > RAM_ADDRESS_LIMIT {
        return Err(Error::precondition("RAM write exceeds the 24 bit address space"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimLink, SimulatedBoard, fast_settings};

    fn endpoint() -> (Endpoint<SimLink>, SimulatedBoard) {
        let board = SimulatedBoard::new();
        let mut endpoint = Endpoint::new(board.link(), fast_settings());
        endpoint.arm_frame_counter().expect("counter armed");
        (endpoint, board)
    }

    #[test]
    fn test_misaligned_payloads_fail_before_sending() {
        let (mut ep, board) = endpoint();
        let before = board.datagrams_received();
        assert!(matches!(
            ep.write_ram(0x10, 1, 0, &[0; 12]),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            ep.write_ddr(1, 0, &[0; 1000]),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            ep.write_ddr(1, 512, &[0; 1024]),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            ep.write_ddr(16, 0, &[0; 1024]),
            Err(Error::Precondition(_))
        ));
        assert_eq!(board.datagrams_received(), before);
    }

    #[test]
    fn test_write_and_read_ram() {
        let (mut ep, board) = endpoint();
        let data: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        ep.write_ram(0x10, 4, 0, &data).expect("write succeeds");
        assert_eq!(board.ram(0x10, 4, 0, data.len()), data);

        let first = ep.read_ram(0x10, 4, 1024).expect("read succeeds");
        assert_eq!(first, data[1024..2048].to_vec());
    }

    #[test]
    fn test_ddr_write_recovers_from_lost_frame() {
        let (mut ep, board) = endpoint();
        let data: Vec<u8> = (0..8 * 1024u32).map(|i| (i * 7 % 256) as u8).collect();
        board.drop_bulk_frame(2);
        ep.write_ddr(1, 4096, &data).expect("second attempt succeeds");
        assert_eq!(board.ddr(4096, data.len()), data);
        assert_eq!(board.bulk_frames_dropped(), 1);
    }

    #[test]
    fn test_ddr_write_gives_up() {
        let (mut ep, board) = endpoint();
        for attempt in 0..5 {
            board.drop_bulk_frame(attempt * 4);
        }
        let err = ep.write_ddr(1, 0, &[0x55; 4096]).expect_err("every attempt loses a frame");
        assert!(matches!(
            err.root_cause(),
            Error::FrameCountMismatch {
                expected: 4,
                counted: 3
            }
        ));
    }

    #[test]
    fn test_uart_is_not_counted() {
        let (mut ep, board) = endpoint();
        ep.write_uart(0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).expect("sent");
        assert_eq!(board.uart(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
