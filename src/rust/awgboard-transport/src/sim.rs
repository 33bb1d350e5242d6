// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-process board models.
//!
//! [`SimulatedBoard`] answers the datagram family the way the FPGA does:
//! register batches are echoed, bulk frames land in RAM or DDR and are
//! counted, and a DDR read streams frames back. Faults can be injected to
//! exercise the retry paths. [`SimTriggerBoard`] speaks the status-reply
//! family over an in-memory byte stream.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use awgboard_isa::bank::{module, reg_bank};
use awgboard_isa::registers::{dac, ddr, i2c, network, trigger};
use awgboard_isa::wire::{
    FRAME_HEADER_LEN, FRAME_PAYLOAD_LEN, STATUS_COMMAND_LEN, STATUS_REPLY_LEN,
};
use awgboard_isa::{Direction, Status, WireCommand};

use crate::codec::{self, DatagramKind, DdrHeader, RamHeader, RegisterOp};
use crate::link::Link;
use crate::settings::TransportSettings;
use crate::status_link::StatusReply;

/// MAC address reported by a simulated board.
pub const SIM_MAC_HIGH: u32 = 0x7077;
pub const SIM_MAC_LOW: u32 = 0x0102_ABCD;

const EEPROM_SIZE: usize = 256;
const DDR_PAGE: usize = 1024;

/// Settings that keep tests against the simulator fast.
pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        frame_timeout_ms: 1,
        reply_timeout_ms: 1,
        flush_timeout_ms: 1,
        attempts: 5,
        write_backoff_ms: 0,
        max_block_exp: 16,
        negotiation_trials: 2,
        busy_poll_limit: 4,
        degrade_pause_ms: 0,
        ..Default::default()
    }
}

/// Something the board observed, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    RegisterWrite { bank: u8, address: u16, data: u32 },
    RamWrite { module: u8, region: u8, address: u32, len: usize },
    DdrWrite { address: u32, len: usize },
}

enum Outgoing {
    Reply(Vec<u8>),
    Stream(Vec<u8>),
}

impl Outgoing {
    fn bytes(&self) -> &[u8] {
        match self {
            Outgoing::Reply(bytes) | Outgoing::Stream(bytes) => bytes,
        }
    }
}

#[derive(Default)]
struct I2cBus {
    fifo: Vec<u32>,
    pointer: u8,
    rx_data: u8,
    eeprom: Vec<u8>,
}

impl I2cBus {
    /// Run the queued FIFO entries as one transaction. Returns the byte
    /// read, if the transaction was a read.
    fn execute(&mut self) -> Option<u8> {
        let fifo = std::mem::take(&mut self.fifo);
        let device = (fifo.first()? & 0xFF) >> 1;
        let is_read = fifo[0] & 1 == 1;
        if device != i2c::EEPROM_DEVICE {
            return None;
        }
        let bytes: Vec<u8> = fifo[1..].iter().map(|entry| (entry & 0xFF) as u8).collect();
        match (is_read, bytes.as_slice()) {
            (true, _) => {
                let value = self.eeprom[self.pointer as usize];
                self.pointer = self.pointer.wrapping_add(1);
                Some(value)
            }
            (false, &[address]) => {
                self.pointer = address;
                None
            }
            (false, &[address, value]) => {
                self.eeprom[address as usize] = value;
                self.pointer = address.wrapping_add(1);
                None
            }
            _ => None,
        }
    }
}

struct BoardState {
    registers: HashMap<(u8, u16), u32>,
    frame_count: u32,
    datagrams: usize,
    outgoing: VecDeque<Outgoing>,
    ram: HashMap<(u8, u8), Vec<u8>>,
    /// Sparse DDR, in pages of [`DDR_PAGE`] bytes.
    ddr: HashMap<usize, Vec<u8>>,
    uart: Vec<u8>,
    i2c: I2cBus,
    events: Vec<SimEvent>,
    bulk_frames: usize,
    drop_frames: Vec<usize>,
    dropped: usize,
    muted_replies: usize,
    stream_limit: Option<usize>,
    truncated_streams: usize,
}

impl BoardState {
    fn new() -> Self {
        let mut registers = HashMap::new();
        registers.insert((reg_bank::NETWORK, network::IP_ADDR), 0xC0A8_0A0A);
        registers.insert((reg_bank::NETWORK, network::NETMASK), 0xFFFF_FF00);
        registers.insert((reg_bank::NETWORK, network::GATEWAY), 0xC0A8_0A01);
        registers.insert((reg_bank::NETWORK, network::MAC_LOW), SIM_MAC_LOW);
        registers.insert((reg_bank::NETWORK, network::MAC_HIGH), SIM_MAC_HIGH);
        for device in [1, 2] {
            registers.insert(
                (reg_bank::SPI_PROXY, dac::spi_address(device, dac::STATUS)),
                dac::STATUS_READY,
            );
        }
        BoardState {
            registers,
            frame_count: 0,
            datagrams: 0,
            outgoing: VecDeque::new(),
            ram: HashMap::new(),
            ddr: HashMap::new(),
            uart: Vec::new(),
            i2c: I2cBus {
                eeprom: vec![0xFF; EEPROM_SIZE],
                ..Default::default()
            },
            events: Vec::new(),
            bulk_frames: 0,
            drop_frames: Vec::new(),
            dropped: 0,
            muted_replies: 0,
            stream_limit: None,
            truncated_streams: 0,
        }
    }

    fn receive(&mut self, datagram: &[u8]) {
        self.datagrams += 1;
        match codec::classify(datagram) {
            DatagramKind::RegisterBatch => {
                self.frame_count = self.frame_count.wrapping_add(1);
                self.register_batch(datagram);
            }
            DatagramKind::RamWrite(header) => {
                if self.accept_bulk_frame() {
                    self.ram_write(header, &datagram[FRAME_HEADER_LEN..]);
                }
            }
            DatagramKind::DdrWrite(header) => {
                if self.accept_bulk_frame() {
                    self.ddr_write(header, &datagram[FRAME_HEADER_LEN..]);
                }
            }
            DatagramKind::RamRead(header) => {
                self.frame_count = self.frame_count.wrapping_add(1);
                let mut reply = datagram[..FRAME_HEADER_LEN].to_vec();
                reply.extend(self.ram_bytes(header.module, header.region, header.address, FRAME_PAYLOAD_LEN));
                self.reply(reply);
            }
            DatagramKind::Uart(_) => self.uart.extend_from_slice(&datagram[FRAME_HEADER_LEN..]),
            DatagramKind::Unknown => {}
        }
    }

    /// Count a bulk frame, unless it is scheduled to be lost.
    fn accept_bulk_frame(&mut self) -> bool {
        let index = self.bulk_frames;
        self.bulk_frames += 1;
        if let Some(at) = self.drop_frames.iter().position(|&i| i == index) {
            self.drop_frames.swap_remove(at);
            self.dropped += 1;
            return false;
        }
        self.frame_count = self.frame_count.wrapping_add(1);
        true
    }

    fn register_batch(&mut self, datagram: &[u8]) {
        let count = codec::register_batch_len(datagram);
        let Ok(ops) = codec::decode_register_batch(datagram, count) else {
            return;
        };
        let mut reply = Vec::with_capacity(ops.len());
        let mut streams = Vec::new();
        for op in ops {
            match op.direction {
                Direction::Read => reply.push(RegisterOp {
                    data: self.read_register(op.bank, op.address),
                    ..op
                }),
                Direction::Write => {
                    if let Some(stream) = self.write_register(op.bank, op.address, op.data) {
                        streams.push(stream);
                    }
                    reply.push(op);
                }
            }
        }
        if let Ok(bytes) = codec::encode_register_batch(&reply) {
            self.reply(bytes);
        }
        for (module_id, address, length) in streams {
            self.stream_ddr(module_id, address, length);
        }
    }

    fn reply(&mut self, bytes: Vec<u8>) {
        if self.muted_replies > 0 {
            self.muted_replies -= 1;
            return;
        }
        self.outgoing.push_back(Outgoing::Reply(bytes));
    }

    fn read_register(&mut self, bank: u8, address: u16) -> u32 {
        match (bank, address) {
            (reg_bank::NETWORK, network::FRAME_COUNT) => self.frame_count,
            (reg_bank::I2C_PROXY, i2c::RX_DATA) => u32::from(self.i2c.rx_data),
            _ => self.registers.get(&(bank, address)).copied().unwrap_or(0),
        }
    }

    /// Store a register write. Returns a DDR read to stream, if the write
    /// started one.
    fn write_register(&mut self, bank: u8, address: u16, data: u32) -> Option<(u8, u32, usize)> {
        self.events.push(SimEvent::RegisterWrite {
            bank,
            address,
            data,
        });
        let previous = self.registers.insert((bank, address), data).unwrap_or(0);
        match (bank, address) {
            (reg_bank::NETWORK, network::COUNT_SOURCE) if data == 0 => {
                self.frame_count = 0;
                None
            }
            (reg_bank::I2C_PROXY, i2c::TX_FIFO) => {
                self.i2c.fifo.push(data);
                None
            }
            (reg_bank::I2C_PROXY, i2c::COMMAND) if data == i2c::COMMAND_EXECUTE => {
                if let Some(value) = self.i2c.execute() {
                    self.i2c.rx_data = value;
                }
                None
            }
            (b, ddr::STOP_READ) if module::DDR_MODULES.contains(&b) && data & 1 == 1 => {
                self.outgoing
                    .retain(|item| matches!(item, Outgoing::Reply(_)));
                None
            }
            (b, ddr::START_READ)
                if module::DDR_MODULES.contains(&b) && previous & 1 == 0 && data & 1 == 1 =>
            {
                let address = self.registers.get(&(b, ddr::READ_ADDR)).copied().unwrap_or(0);
                let length = self.registers.get(&(b, ddr::READ_LEN)).copied().unwrap_or(0);
                Some((b, address, length as usize))
            }
            _ => None,
        }
    }

    fn stream_ddr(&mut self, module_id: u8, start: u32, length: usize) {
        let mut frames = length / FRAME_PAYLOAD_LEN;
        if let Some(limit) = self.stream_limit {
            frames = frames.min(limit);
        }
        if self.truncated_streams > 0 {
            self.truncated_streams -= 1;
            frames = frames.saturating_sub(1);
        }
        for index in 0..frames {
            let address = start.wrapping_add((index * FRAME_PAYLOAD_LEN) as u32);
            let mut frame = DdrHeader {
                module: module_id,
                address,
            }
            .encode()
            .to_vec();
            frame.extend(self.ddr_bytes(address, FRAME_PAYLOAD_LEN));
            self.outgoing.push_back(Outgoing::Stream(frame));
        }
    }

    fn ram_write(&mut self, header: RamHeader, payload: &[u8]) {
        self.events.push(SimEvent::RamWrite {
            module: header.module,
            region: header.region,
            address: header.address,
            len: payload.len(),
        });
        let memory = self.ram.entry((header.module, header.region)).or_default();
        write_at(memory, header.address as usize, payload);
    }

    fn ddr_write(&mut self, header: DdrHeader, payload: &[u8]) {
        self.events.push(SimEvent::DdrWrite {
            address: header.address,
            len: payload.len(),
        });
        self.ddr_store(header.address as usize, payload);
    }

    fn ram_bytes(&self, module_id: u8, region: u8, address: u32, len: usize) -> Vec<u8> {
        read_at(
            self.ram.get(&(module_id, region)).map(Vec::as_slice).unwrap_or_default(),
            address as usize,
            len,
        )
    }

    fn ddr_store(&mut self, mut at: usize, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let offset = at % DDR_PAGE;
            let count = (DDR_PAGE - offset).min(bytes.len());
            let page = self.ddr.entry(at / DDR_PAGE).or_insert_with(|| vec![0; DDR_PAGE]);
            page[offset..offset + count].copy_from_slice(&bytes[..count]);
            at += count;
            bytes = &bytes[count..];
        }
    }

    fn ddr_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut at = address as usize;
        let mut filled = 0;
        while filled < len {
            let offset = at % DDR_PAGE;
            let count = (DDR_PAGE - offset).min(len - filled);
            if let Some(page) = self.ddr.get(&(at / DDR_PAGE)) {
                out[filled..filled + count].copy_from_slice(&page[offset..offset + count]);
            }
            at += count;
            filled += count;
        }
        out
    }
}

fn write_at(memory: &mut Vec<u8>, at: usize, bytes: &[u8]) {
    if memory.len() < at + bytes.len() {
        memory.resize(at + bytes.len(), 0);
    }
    memory[at..at + bytes.len()].copy_from_slice(bytes);
}

fn read_at(memory: &[u8], at: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if at < memory.len() {
        let end = memory.len().min(at + len);
        out[..end - at].copy_from_slice(&memory[at..end]);
    }
    out
}

/// Shared handle on a simulated AWG board.
#[derive(Clone)]
pub struct SimulatedBoard {
    state: Arc<Mutex<BoardState>>,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBoard {
    pub fn new() -> Self {
        SimulatedBoard {
            state: Arc::new(Mutex::new(BoardState::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        // A panicking test thread must not hide the board from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A link talking to this board.
    pub fn link(&self) -> SimLink {
        SimLink {
            state: Arc::clone(&self.state),
        }
    }

    /// Datagrams sent to the board so far, lost ones included.
    pub fn datagrams_received(&self) -> usize {
        self.state().datagrams
    }

    /// Swallow the next `count` replies.
    pub fn mute_next_replies(&self, count: usize) {
        self.state().muted_replies += count;
    }

    /// Lose the bulk frame with the given index, counted over all bulk
    /// frames the board has seen.
    pub fn drop_bulk_frame(&self, index: usize) {
        self.state().drop_frames.push(index);
    }

    pub fn bulk_frames_dropped(&self) -> usize {
        self.state().dropped
    }

    /// Send at most `frames` frames per DDR read.
    pub fn limit_stream_frames(&self, frames: usize) {
        self.state().stream_limit = Some(frames);
    }

    /// Lose the last frame of each of the next `count` DDR reads.
    pub fn truncate_next_streams(&self, count: usize) {
        self.state().truncated_streams += count;
    }

    pub fn register(&self, bank: u8, address: u16) -> u32 {
        self.state().registers.get(&(bank, address)).copied().unwrap_or(0)
    }

    pub fn set_register(&self, bank: u8, address: u16, data: u32) {
        self.state().registers.insert((bank, address), data);
    }

    pub fn ram(&self, module_id: u8, region: u8, address: u32, len: usize) -> Vec<u8> {
        self.state().ram_bytes(module_id, region, address, len)
    }

    pub fn ddr(&self, address: u32, len: usize) -> Vec<u8> {
        self.state().ddr_bytes(address, len)
    }

    pub fn uart(&self) -> Vec<u8> {
        self.state().uart.clone()
    }

    pub fn eeprom(&self) -> Vec<u8> {
        self.state().i2c.eeprom.clone()
    }

    pub fn set_eeprom(&self, address: u8, bytes: &[u8]) {
        write_at(&mut self.state().i2c.eeprom, address as usize, bytes);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }
}

/// [`Link`] into a [`SimulatedBoard`]. An empty receive queue reports a
/// timeout immediately.
pub struct SimLink {
    state: Arc<Mutex<BoardState>>,
}

impl SimLink {
    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Link for SimLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.state().receive(datagram);
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        let Some(item) = self.state().outgoing.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let bytes = item.bytes();
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(len)
    }

    fn peer(&self) -> String {
        "simulated board".to_string()
    }
}

/// Identity reported by [`SimTriggerBoard`] in bank 8.
pub const SIM_TRIGGER_IDENTITY: (u32, u32) = (0x1234, 0x5678_0000);
/// Banks above this are rejected with a command error.
const TRIGGER_BANK_LIMIT: u32 = 16;

#[derive(Default)]
struct TriggerState {
    registers: HashMap<(u32, u32), u32>,
    memory: HashMap<u32, Vec<u8>>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    writes: Vec<(u32, u32, u32)>,
}

impl TriggerState {
    /// Consume complete commands from the input buffer.
    fn process(&mut self) {
        loop {
            let Some(head) = self.input.first_chunk::<STATUS_COMMAND_LEN>() else {
                return;
            };
            let head = *head;
            let Ok((command, bank, address, data)) = codec::decode_status_command(&head) else {
                self.input.clear();
                self.respond(0, 0, 0, 0, Status::CommandError);
                return;
            };
            if command == WireCommand::WriteMem {
                if self.input.len() < STATUS_COMMAND_LEN + data as usize {
                    return;
                }
                let payload: Vec<u8> = self
                    .input
                    .drain(..STATUS_COMMAND_LEN + data as usize)
                    .skip(STATUS_COMMAND_LEN)
                    .collect();
                let status = self.write_memory(bank, address, &payload);
                self.respond(command.code(), bank, address, data, status);
                continue;
            }
            self.input.drain(..STATUS_COMMAND_LEN);
            self.execute(command, bank, address, data);
        }
    }

    fn execute(&mut self, command: WireCommand, bank: u32, address: u32, data: u32) {
        if bank >= TRIGGER_BANK_LIMIT {
            self.respond(command.code(), bank, address, data, Status::CommandError);
            return;
        }
        match command {
            WireCommand::ReadReg if bank == trigger::BANK_IDENTITY => {
                let (aux, value) = SIM_TRIGGER_IDENTITY;
                self.respond(command.code(), bank, aux, value, Status::Success);
            }
            WireCommand::ReadReg => {
                let value = self.registers.get(&(bank, address)).copied().unwrap_or(0);
                self.respond(command.code(), bank, address, value, Status::Success);
            }
            WireCommand::WriteReg => {
                self.registers.insert((bank, address), data);
                self.writes.push((bank, address, data));
                self.respond(command.code(), bank, address, data, Status::Success);
            }
            WireCommand::ReadMem => {
                let memory = self.memory.get(&bank).map(Vec::as_slice).unwrap_or_default();
                let bytes = read_at(memory, address as usize, data as usize);
                self.respond(command.code(), bank, address, data, Status::Success);
                self.output.extend(bytes);
                self.output.extend(Status::Success.code().to_be_bytes());
            }
            WireCommand::WriteMem => {}
        }
    }

    fn write_memory(&mut self, bank: u32, address: u32, payload: &[u8]) -> Status {
        if bank >= TRIGGER_BANK_LIMIT {
            return Status::MemoryRangeError;
        }
        write_at(self.memory.entry(bank).or_default(), address as usize, payload);
        Status::Success
    }

    fn respond(&mut self, command: u32, bank: u32, aux: u32, data: u32, status: Status) {
        let reply = StatusReply {
            command,
            bank,
            aux,
            data,
            status,
        };
        let bytes: [u8; STATUS_REPLY_LEN] = reply.encode();
        self.output.extend(bytes);
    }
}

/// Shared handle on a simulated trigger board, usable as the byte stream of
/// a [`crate::StatusLink`].
#[derive(Clone, Default)]
pub struct SimTriggerBoard {
    state: Arc<Mutex<TriggerState>>,
}

impl SimTriggerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, bank: u32, address: u32) -> u32 {
        self.state().registers.get(&(bank, address)).copied().unwrap_or(0)
    }

    pub fn set_register(&self, bank: u32, address: u32, data: u32) {
        self.state().registers.insert((bank, address), data);
    }

    /// Register writes in arrival order.
    pub fn writes(&self) -> Vec<(u32, u32, u32)> {
        self.state().writes.clone()
    }
}

impl Read for SimTriggerBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.output.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let len = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for SimTriggerBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.input.extend_from_slice(buf);
        state.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eeprom_transactions() {
        let board = SimulatedBoard::new();
        let mut link = board.link();
        let start = i2c::TX_START | (i2c::EEPROM_DEVICE << 1);
        let batch = |ops: &[RegisterOp]| codec::encode_register_batch(ops).expect("fits");
        let execute = RegisterOp::write(reg_bank::I2C_PROXY, i2c::COMMAND, i2c::COMMAND_EXECUTE);
        let fifo = |data| RegisterOp::write(reg_bank::I2C_PROXY, i2c::TX_FIFO, data);

        link.send(&batch(&[fifo(start), fifo(130), fifo(i2c::TX_STOP | 0xDA), execute]))
            .expect("sent");
        assert_eq!(board.eeprom()[130], 0xDA);

        link.send(&batch(&[fifo(start), fifo(i2c::TX_STOP | 130), execute]))
            .expect("sent");
        link.send(&batch(&[fifo(start | 1), fifo(i2c::TX_STOP), execute]))
            .expect("sent");
        link.send(&batch(&[RegisterOp::read(reg_bank::I2C_PROXY, i2c::RX_DATA)]))
            .expect("sent");
        let mut reply = [0u8; 1032];
        for _ in 0..3 {
            link.recv_timeout(&mut reply, Duration::ZERO).expect("reply");
        }
        let len = link.recv_timeout(&mut reply, Duration::ZERO).expect("reply");
        let records = codec::decode_register_batch(&reply[..len], 1).expect("decodes");
        assert_eq!(records[0].data, 0xDA);
    }

    #[test]
    fn test_frame_counter_counts_its_own_read() {
        let board = SimulatedBoard::new();
        let mut link = board.link();
        let read = codec::encode_register_batch(&[RegisterOp::read(
            reg_bank::NETWORK,
            network::FRAME_COUNT,
        )])
        .expect("fits");
        link.send(&read).expect("sent");
        let mut reply = [0u8; 1032];
        let len = link.recv_timeout(&mut reply, Duration::ZERO).expect("reply");
        let records = codec::decode_register_batch(&reply[..len], 1).expect("decodes");
        assert_eq!(records[0].data, 1);
        assert!(link.recv_timeout(&mut reply, Duration::ZERO).is_err());
    }
}
