// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Stream transport of the status-reply family (trigger board).
//!
//! Every command is answered by a 20 byte reply carrying a status word.
//! Memory reads are followed by the requested bytes and a trailing status.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use awgboard_isa::wire::{STATUS_REPLY_LEN, WireCommand};
use awgboard_isa::Status;
use awgboard_log::diagnostic;

use crate::codec;
use crate::retry::{RetryPolicy, with_retry};
use crate::settings::TransportSettings;
use crate::{Error, Result};

/// Default TCP port of the trigger board.
pub const STATUS_LINK_PORT: u16 = 80;

/// Complete replies to earlier requests skipped before a transaction gives up.
const MAX_STALE_REPLIES: usize = 4;

/// Decoded 20 byte reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    pub command: u32,
    pub bank: u32,
    pub aux: u32,
    pub data: u32,
    pub status: Status,
}

impl StatusReply {
    pub fn decode(bytes: &[u8; STATUS_REPLY_LEN]) -> Result<Self> {
        let [command, bank, aux, data, status] = codec::status_reply_words(bytes);
        Ok(StatusReply {
            command,
            bank,
            aux,
            data,
            status: Status::try_from(status)?,
        })
    }

    pub fn encode(&self) -> [u8; STATUS_REPLY_LEN] {
        let mut out = [0u8; STATUS_REPLY_LEN];
        let words = [self.command, self.bank, self.aux, self.data, self.status.code()];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

pub struct StatusLink<S> {
    stream: S,
    peer: String,
    policy: RetryPolicy,
    /// Set once a reply was cut off; the byte stream no longer starts at a
    /// reply boundary.
    out_of_step: bool,
}

impl StatusLink<TcpStream> {
    pub fn connect(addr: SocketAddr, settings: &TransportSettings) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, settings.reply_timeout() * 50)?;
        stream.set_read_timeout(Some(settings.reply_timeout() * 50))?;
        stream.set_nodelay(true)?;
        Ok(StatusLink::new(stream, addr.to_string(), settings.register_policy()))
    }
}

impl<S: Read + Write> StatusLink<S> {
    pub fn new(stream: S, peer: String, policy: RetryPolicy) -> Self {
        StatusLink {
            stream,
            peer,
            policy,
            out_of_step: false,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether the stream still starts at a reply boundary. A link that
    /// fell out of step refuses further traffic and must be reopened.
    pub fn is_in_step(&self) -> bool {
        !self.out_of_step
    }

    /// Send one command and wait for its reply. A non-success status is
    /// reported as [`Error::DeviceStatus`].
    ///
    /// Late replies to earlier attempts are recognized by their echoed
    /// command and bank and skipped.
    pub fn transact(&mut self, command: WireCommand, bank: u32, address: u32, data: u32) -> Result<StatusReply> {
        self.check_in_step()?;
        let request = codec::encode_status_command(command, bank, address, data);
        let policy = self.policy;
        with_retry(
            self,
            policy,
            "status link transaction",
            |link| {
                link.stream.write_all(&request)?;
                link.read_reply_to(command, bank)
            },
            |_| {},
        )
    }

    fn check_in_step(&self) -> Result<()> {
        if self.out_of_step {
            return Err(Error::new(format!(
                "Stream to {} is out of step; reconnect required",
                self.peer
            )));
        }
        Ok(())
    }

    fn read_reply_to(&mut self, command: WireCommand, bank: u32) -> Result<StatusReply> {
        for _ in 0..=MAX_STALE_REPLIES {
            let reply = self.read_reply()?;
            if reply.command == command.code() && reply.bank == bank {
                return Ok(reply);
            }
            diagnostic!("{} skipped stale reply {:?}", self.peer, reply);
        }
        Err(Error::StaleReply)
    }

    /// Read one reply and check its status.
    fn read_reply(&mut self) -> Result<StatusReply> {
        let mut bytes = [0u8; STATUS_REPLY_LEN];
        self.fill(&mut bytes)?;
        let reply = StatusReply::decode(&bytes)?;
        diagnostic!("{} replied {:?}", self.peer, reply);
        if !reply.status.is_success() {
            return Err(Error::DeviceStatus(reply.status));
        }
        Ok(reply)
    }

    /// Fill `buf` from the stream. A failure after the first byte leaves
    /// the link out of step.
    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let err = match self.stream.read(&mut buf[filled..]) {
                Ok(0) => io::Error::from(io::ErrorKind::UnexpectedEof),
                Ok(n) => {
                    filled += n;
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => err,
            };
            if filled == 0 {
                return Err(err.into());
            }
            self.out_of_step = true;
            return Err(Error::new(format!(
                "{} stopped after {} of {} bytes: {}",
                self.peer,
                filled,
                buf.len(),
                err
            )));
        }
        Ok(())
    }

    pub fn read_reg(&mut self, bank: u32, address: u32) -> Result<u32> {
        Ok(self.transact(WireCommand::ReadReg, bank, address, 0)?.data)
    }

    pub fn write_reg(&mut self, bank: u32, address: u32, data: u32) -> Result<()> {
        self.transact(WireCommand::WriteReg, bank, address, data)?;
        Ok(())
    }

    /// Board identity, as a hex string.
    pub fn identity(&mut self) -> Result<String> {
        let reply = self.transact(
            WireCommand::ReadReg,
            awgboard_isa::registers::trigger::BANK_IDENTITY,
            0,
            0,
        )?;
        Ok(format!("{:X}", (u64::from(reply.aux) << 16) + u64::from(reply.data >> 16)))
    }

    /// Write `data` into board memory `bank` at `address`.
    pub fn write_mem(&mut self, bank: u32, address: u32, data: &[u8]) -> Result<()> {
        self.check_in_step()?;
        let length = u32::try_from(data.len())
            .map_err(|_| Error::precondition("memory write exceeds 4 GiB"))?;
        let request = codec::encode_status_command(WireCommand::WriteMem, bank, address, length);
        self.stream.write_all(&request)?;
        self.stream.write_all(data)?;
        self.read_reply_to(WireCommand::WriteMem, bank)?;
        Ok(())
    }

    /// Read `length` bytes of board memory. The data arrives behind a
    /// 20 byte header and is followed by a 4 byte status.
    ///
    /// The reply has no fixed length, so any failure after the request was
    /// sent leaves the link out of step.
    pub fn read_mem(&mut self, bank: u32, address: u32, length: u32) -> Result<Vec<u8>> {
        self.check_in_step()?;
        let request = codec::encode_status_command(WireCommand::ReadMem, bank, address, length);
        self.stream.write_all(&request)?;
        let result = self.read_mem_reply(length);
        if result.is_err() {
            self.out_of_step = true;
        }
        result
    }

    fn read_mem_reply(&mut self, length: u32) -> Result<Vec<u8>> {
        let mut header = [0u8; STATUS_REPLY_LEN];
        self.fill(&mut header)?;
        let mut data = vec![0u8; length as usize];
        self.fill(&mut data)?;
        let mut status = [0u8; 4];
        self.fill(&mut status)?;
        let status = Status::try_from(u32::from_be_bytes(status))?;
        if !status.is_success() {
            return Err(Error::DeviceStatus(status));
        }
        Ok(data)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
