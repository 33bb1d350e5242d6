// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Byte layout of every datagram exchanged with a board.
//!
//! Register batch (host -> board, echoed board -> host):
//!
//! ```text
//!  +----------------+-----+-----+---------+-----------+-- ... --+------+
//!  | 8 x 0x00       | dir | bank| addr LE | data LE   |  n recs | 0xFF |
//!  +----------------+-----+-----+---------+-----------+-- ... --+------+
//!                   |<------------- 8 byte record ----->|  fill to 128
//! ```
//!
//! Bulk frames carry an 8 byte header and up to 1 KiB of payload:
//!
//! ```text
//!  RAM write   addr[15:0] u16 | addr[23:16] u8 | region u8 | module << 24 u32
//!  RAM read    module u32     | addr[15:0] u16 | addr[23:16] u8 | 0x80 | region
//!  DDR frame   addr u32       | module << 24 u32
//! ```
//!
//! DDR readback frames reuse the DDR write header, so the receiver can check
//! that every frame belongs to the block it asked for.

use awgboard_isa::bank::module;
use awgboard_isa::wire::{
    FILL_RECORD, FRAME_HEADER_LEN, FRAME_LEN, FRAME_PAYLOAD_LEN, RAM_READ_FLAG,
    REGISTER_RECORD_LEN, REGISTER_RECORD_SLOTS, STATUS_COMMAND_LEN, STATUS_REPLY_LEN,
};
use awgboard_isa::{Direction, WireCommand};

use crate::{Error, Result};

/// One register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterOp {
    pub direction: Direction,
    pub bank: u8,
    pub address: u16,
    pub data: u32,
}

impl RegisterOp {
    pub fn read(bank: u8, address: u16) -> Self {
        RegisterOp {
            direction: Direction::Read,
            bank,
            address,
            data: 0,
        }
    }

    pub fn write(bank: u8, address: u16, data: u32) -> Self {
        RegisterOp {
            direction: Direction::Write,
            bank,
            address,
            data,
        }
    }

    pub fn encode(&self) -> [u8; REGISTER_RECORD_LEN] {
        let mut out = [0u8; REGISTER_RECORD_LEN];
        out[0] = self.direction as u8;
        out[1] = self.bank;
        out[2..4].copy_from_slice(&self.address.to_le_bytes());
        out[4..8].copy_from_slice(&self.data.to_le_bytes());
        out
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < REGISTER_RECORD_LEN {
            return Err(Error::ShortFrame {
                expected: REGISTER_RECORD_LEN,
                received: record.len(),
            });
        }
        Ok(RegisterOp {
            direction: Direction::try_from(record[0])?,
            bank: record[1],
            address: u16::from_le_bytes([record[2], record[3]]),
            data: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
        })
    }

    /// Whether `reply` is the board's answer to this request. Writes echo
    /// the written value, reads carry the register content.
    pub fn is_echoed_by(&self, reply: &RegisterOp) -> bool {
        self.direction == reply.direction
            && self.bank == reply.bank
            && self.address == reply.address
            && (self.direction == Direction::Read || self.data == reply.data)
    }
}

/// Largest number of operations in one register datagram.
pub const MAX_REGISTER_BATCH: usize = REGISTER_RECORD_SLOTS - 1;

pub fn encode_register_batch(ops: &[RegisterOp]) -> Result<Vec<u8>> {
    if ops.len() > MAX_REGISTER_BATCH {
        return Err(Error::precondition(format!(
            "register batch of {} operations exceeds the limit of {MAX_REGISTER_BATCH}",
            ops.len()
        )));
    }
    let mut datagram = Vec::with_capacity(FRAME_LEN);
    datagram.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);
    for op in ops {
        datagram.extend_from_slice(&op.encode());
    }
    for _ in ops.len()..REGISTER_RECORD_SLOTS {
        datagram.extend_from_slice(&FILL_RECORD);
    }
    Ok(datagram)
}

/// Decode the first `count` records of a register datagram.
pub fn decode_register_batch(datagram: &[u8], count: usize) -> Result<Vec<RegisterOp>> {
    let needed = FRAME_HEADER_LEN + count * REGISTER_RECORD_LEN;
    if datagram.len() < needed {
        return Err(Error::ShortFrame {
            expected: needed,
            received: datagram.len(),
        });
    }
    if datagram[..FRAME_HEADER_LEN].iter().any(|b| *b != 0) {
        return Err(Error::StaleReply);
    }
    datagram[FRAME_HEADER_LEN..needed]
        .chunks_exact(REGISTER_RECORD_LEN)
        .map(RegisterOp::decode)
        .collect()
}

/// Number of leading non-fill records of a register datagram.
pub fn register_batch_len(datagram: &[u8]) -> usize {
    datagram
        .get(FRAME_HEADER_LEN..)
        .unwrap_or_default()
        .chunks_exact(REGISTER_RECORD_LEN)
        .take_while(|record| *record != FILL_RECORD)
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamHeader {
    pub module: u8,
    pub region: u8,
    /// 24 bit byte address inside the RAM.
    pub address: u32,
}

impl RamHeader {
    pub fn encode_write(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..2].copy_from_slice(&((self.address & 0xFFFF) as u16).to_le_bytes());
        out[2] = (self.address >> 16) as u8;
        out[3] = self.region;
        out[4..8].copy_from_slice(&((self.module as u32) << 24).to_le_bytes());
        out
    }

    pub fn encode_read(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&(self.module as u32).to_le_bytes());
        out[4..6].copy_from_slice(&((self.address & 0xFFFF) as u16).to_le_bytes());
        out[6] = (self.address >> 16) as u8;
        out[7] = RAM_READ_FLAG | self.region;
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdrHeader {
    pub module: u8,
    pub address: u32,
}

impl DdrHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&self.address.to_le_bytes());
        out[4..8].copy_from_slice(&((self.module as u32) << 24).to_le_bytes());
        out
    }

    pub fn decode(header: &[u8]) -> Option<Self> {
        let header: &[u8; FRAME_HEADER_LEN] = header.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
        let tag = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if tag & 0x00FF_FFFF != 0 {
            return None;
        }
        Some(DdrHeader {
            module: (tag >> 24) as u8,
            address: u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
        })
    }
}

/// What a datagram asks the board to do, judged from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    RegisterBatch,
    RamWrite(RamHeader),
    RamRead(RamHeader),
    DdrWrite(DdrHeader),
    Uart(RamHeader),
    Unknown,
}

pub fn classify(datagram: &[u8]) -> DatagramKind {
    let Some(header) = datagram.get(..FRAME_HEADER_LEN) else {
        return DatagramKind::Unknown;
    };
    if header.iter().all(|b| *b == 0) {
        return DatagramKind::RegisterBatch;
    }
    if header[7] & RAM_READ_FLAG != 0 {
        return DatagramKind::RamRead(RamHeader {
            module: header[0],
            region: header[7] & !RAM_READ_FLAG,
            address: u32::from(u16::from_le_bytes([header[4], header[5]]))
                | (u32::from(header[6]) << 16),
        });
    }
    let ram = RamHeader {
        module: header[7],
        region: header[3],
        address: u32::from(u16::from_le_bytes([header[0], header[1]]))
            | (u32::from(header[2]) << 16),
    };
    match header[7] {
        m if module::DDR_MODULES.contains(&m) => match DdrHeader::decode(header) {
            Some(ddr) => DatagramKind::DdrWrite(ddr),
            None => DatagramKind::Unknown,
        },
        m if module::RAM_MODULES.contains(&m) => DatagramKind::RamWrite(ram),
        module::UART => DatagramKind::Uart(ram),
        _ => DatagramKind::Unknown,
    }
}

/// Split `data` into RAM write frames starting at `start_addr`.
pub fn ram_frames(module: u8, region: u8, start_addr: u32, data: &[u8]) -> Vec<Vec<u8>> {
    data.chunks(FRAME_PAYLOAD_LEN)
        .enumerate()
        .map(|(i, chunk)| {
            let header = RamHeader {
                module,
                region,
                address: start_addr + (i * FRAME_PAYLOAD_LEN) as u32,
            };
            let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + chunk.len());
            frame.extend_from_slice(&header.encode_write());
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}

/// Split `data` into DDR write frames starting at `start_addr`.
pub fn ddr_frames(module: u8, start_addr: u32, data: &[u8]) -> Vec<Vec<u8>> {
    data.chunks(FRAME_PAYLOAD_LEN)
        .enumerate()
        .map(|(i, chunk)| {
            let header = DdrHeader {
                module,
                address: start_addr + (i * FRAME_PAYLOAD_LEN) as u32,
            };
            let mut frame = Vec::with_capacity(FRAME_LEN);
            frame.extend_from_slice(&header.encode());
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}

/// RAM read request padded to a full datagram.
pub fn ram_read_request(module: u8, region: u8, address: u32) -> Vec<u8> {
    let header = RamHeader {
        module,
        region,
        address,
    };
    let mut datagram = Vec::with_capacity(FRAME_LEN);
    datagram.extend_from_slice(&header.encode_read());
    for _ in 0..REGISTER_RECORD_SLOTS {
        datagram.extend_from_slice(&FILL_RECORD);
    }
    datagram
}

/// Encode a status-reply family command.
pub fn encode_status_command(
    command: WireCommand,
    bank: u32,
    address: u32,
    data: u32,
) -> [u8; STATUS_COMMAND_LEN] {
    let mut out = [0u8; STATUS_COMMAND_LEN];
    for (chunk, word) in out
        .chunks_exact_mut(4)
        .zip([command.code(), bank, address, data])
    {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Decode a status-reply family command, as the board sees it.
pub fn decode_status_command(bytes: &[u8; STATUS_COMMAND_LEN]) -> Result<(WireCommand, u32, u32, u32)> {
    let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    Ok((WireCommand::try_from(word(0))?, word(4), word(8), word(12)))
}

/// Split a 20 byte status reply into its five big-endian words.
pub fn status_reply_words(bytes: &[u8; STATUS_REPLY_LEN]) -> [u32; 5] {
    let mut words = [0u32; 5];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}
