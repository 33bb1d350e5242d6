// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use awgboard_isa::bank::{module, reg_bank};
use awgboard_isa::registers::{ddr, network};
use awgboard_isa::wire::FRAME_LEN;
use awgboard_log::{diagnostic, error, info};

use crate::codec::{self, RegisterOp};
use crate::link::{Link, UdpLink, is_timeout};
use crate::retry::with_retry;
use crate::settings::TransportSettings;
use crate::{Error, Result};

/// Upper bound on datagrams discarded by one [`Endpoint::flush`].
const FLUSH_LIMIT: usize = 1 << 16;
/// Stale register replies skipped before an attempt is given up.
const STALE_REPLY_LIMIT: usize = 8;

/// Network identity reported by the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub netmask: u32,
    pub gateway: u32,
    pub mac_low: u32,
    pub mac_high: u32,
}

impl NetworkInfo {
    /// Device id derived from the MAC address.
    pub fn device_id(&self) -> String {
        format!("{:04X}{:08X}", self.mac_high, self.mac_low)
    }
}

/// One connected board.
///
/// All operations take `&mut self`: a board serves one transfer at a time
/// and the receive buffer and negotiated block size belong to the endpoint.
pub struct Endpoint<L: Link = UdpLink> {
    pub(crate) link: L,
    pub(crate) settings: TransportSettings,
    /// log2 of the DDR read block; `None` until negotiation succeeded.
    pub(crate) block_exp: Option<u8>,
    /// Receive buffer for DDR readback, reused across reads.
    pub(crate) buffer: Vec<u8>,
    /// Write cursor into `buffer`.
    pub(crate) view_offset: usize,
    network: NetworkInfo,
}

impl Endpoint<UdpLink> {
    /// Open a link to the board at `ip` and bring it into a usable state.
    pub fn connect(ip: IpAddr, mut settings: TransportSettings) -> Result<Self> {
        sanitize_logged(&mut settings);
        let link = UdpLink::open(SocketAddr::new(ip, settings.port), &settings)?;
        let mut endpoint = Endpoint::new(link, settings);
        endpoint.initialize()?;
        Ok(endpoint)
    }
}

impl<L: Link> Endpoint<L> {
    /// Wrap an open link. No traffic is generated.
    pub fn new(link: L, mut settings: TransportSettings) -> Self {
        sanitize_logged(&mut settings);
        Endpoint {
            link,
            settings,
            block_exp: None,
            buffer: Vec::new(),
            view_offset: 0,
            network: NetworkInfo::default(),
        }
    }

    /// Reset the DDR engine, negotiate the readback block size, read the
    /// network identity and arm the frame counter.
    pub fn initialize(&mut self) -> Result<()> {
        self.reset_ddr(module::DDR_CONTROLLER)?;
        self.set_speed()?;
        self.read_network_info()?;
        self.arm_frame_counter()?;
        info!(
            "Connected to {} (device id {})",
            self.link.peer(),
            self.network.device_id()
        );
        Ok(())
    }

    /// Close the link.
    pub fn disconnect(self) {
        info!("Disconnected from {}", self.link.peer());
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn peer(&self) -> String {
        self.link.peer()
    }

    pub fn network_info(&self) -> &NetworkInfo {
        &self.network
    }

    pub fn device_id(&self) -> String {
        self.network.device_id()
    }

    /// Negotiated DDR read block in bytes.
    pub fn block_size(&self) -> Option<usize> {
        self.block_exp.map(|exp| 1 << exp)
    }

    /// Execute a batch of register operations.
    ///
    /// Returns the data field of every record in the reply, or an empty
    /// vector when `expect_reply` is false. Batches of 128 or more
    /// operations are rejected before anything is sent.
    pub fn reg_ops(&mut self, ops: &[RegisterOp], expect_reply: bool) -> Result<Vec<u32>> {
        let datagram = codec::encode_register_batch(ops)?;
        let policy = self.settings.register_policy();
        with_retry(
            self,
            policy,
            "register access",
            |ep| ep.reg_ops_once(&datagram, ops, expect_reply),
            |ep| {
                ep.flush();
            },
        )
    }

    fn reg_ops_once(
        &mut self,
        datagram: &[u8],
        ops: &[RegisterOp],
        expect_reply: bool,
    ) -> Result<Vec<u32>> {
        self.link.send(datagram)?;
        if !expect_reply {
            return Ok(Vec::new());
        }
        let timeout = self.settings.reply_timeout();
        let mut reply = [0u8; FRAME_LEN];
        for _ in 0..STALE_REPLY_LIMIT {
            let received = self.recv(&mut reply, timeout)?;
            let Ok(records) = codec::decode_register_batch(&reply[..received], ops.len()) else {
                diagnostic!("Discarding {} byte datagram while waiting for a reply", received);
                continue;
            };
            if ops.iter().zip(&records).all(|(op, rec)| op.is_echoed_by(rec)) {
                return Ok(records.iter().map(|rec| rec.data).collect());
            }
            diagnostic!("Discarding register reply that does not echo the request");
        }
        Err(Error::StaleReply)
    }

    pub fn read_regs(&mut self, regs: &[(u8, u16)]) -> Result<Vec<u32>> {
        let ops: Vec<_> = regs
            .iter()
            .map(|&(bank, address)| RegisterOp::read(bank, address))
            .collect();
        self.reg_ops(&ops, true)
    }

    pub fn write_regs(&mut self, regs: &[(u8, u16, u32)]) -> Result<()> {
        let ops: Vec<_> = regs
            .iter()
            .map(|&(bank, address, data)| RegisterOp::write(bank, address, data))
            .collect();
        self.reg_ops(&ops, true)?;
        Ok(())
    }

    /// Fire-and-forget register writes. The board still answers; the reply
    /// is discarded by the next exchange.
    pub fn write_regs_no_reply(&mut self, regs: &[(u8, u16, u32)]) -> Result<()> {
        let ops: Vec<_> = regs
            .iter()
            .map(|&(bank, address, data)| RegisterOp::write(bank, address, data))
            .collect();
        self.reg_ops(&ops, false)?;
        Ok(())
    }

    pub fn read_reg(&mut self, bank: u8, address: u16) -> Result<u32> {
        let values = self.reg_ops(&[RegisterOp::read(bank, address)], true)?;
        values
            .first()
            .copied()
            .ok_or_else(|| Error::new("Empty register reply"))
    }

    pub fn write_reg(&mut self, bank: u8, address: u16, data: u32) -> Result<()> {
        self.write_regs(&[(bank, address, data)])
    }

    /// Number of datagrams the board has accepted, including this request.
    pub fn frame_count(&mut self) -> Result<u32> {
        self.read_reg(reg_bank::NETWORK, network::FRAME_COUNT)
    }

    /// Make the board count datagrams coming from this host.
    pub fn arm_frame_counter(&mut self) -> Result<()> {
        self.write_reg(reg_bank::NETWORK, network::COUNT_SOURCE, 0)?;
        self.write_reg(reg_bank::NETWORK, network::COUNT_SOURCE, 1)
    }

    pub fn read_network_info(&mut self) -> Result<NetworkInfo> {
        let values = self.read_regs(&[
            (reg_bank::NETWORK, network::NETMASK),
            (reg_bank::NETWORK, network::GATEWAY),
            (reg_bank::NETWORK, network::MAC_LOW),
            (reg_bank::NETWORK, network::MAC_HIGH),
        ])?;
        let &[netmask, gateway, mac_low, mac_high] = values.as_slice() else {
            return Err(Error::new("Incomplete network information reply"));
        };
        self.network = NetworkInfo {
            netmask,
            gateway,
            mac_low,
            mac_high,
        };
        Ok(self.network)
    }

    pub fn reset_ddr(&mut self, module_id: u8) -> Result<()> {
        self.write_regs(&[(module_id, ddr::RESET, 1), (module_id, ddr::RESET, 0)])
    }

    /// Drain datagrams still queued on the link. Returns how many were
    /// discarded.
    pub fn flush(&mut self) -> usize {
        let timeout = self.settings.flush_timeout();
        let mut scratch = [0u8; FRAME_LEN];
        let mut drained = 0;
        while drained < FLUSH_LIMIT && self.link.recv_timeout(&mut scratch, timeout).is_ok() {
            drained += 1;
        }
        if drained == FLUSH_LIMIT {
            error!("{} keeps sending; flush gave up", self.link.peer());
        } else if drained > 0 {
            diagnostic!("Flushed {} stray datagrams", drained);
        }
        drained
    }

    /// Receive one datagram, mapping an expired timeout to [`Error::Timeout`].
    pub(crate) fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        recv_on(&mut self.link, buf, timeout)
    }
}

pub(crate) fn recv_on<L: Link>(link: &mut L, buf: &mut [u8], timeout: Duration) -> Result<usize> {
    match link.recv_timeout(buf, timeout) {
        Ok(received) => Ok(received),
        Err(err) if is_timeout(&err) => Err(Error::Timeout { timeout }),
        Err(err) => Err(err.into()),
    }
}

fn sanitize_logged(settings: &mut TransportSettings) {
    for change in settings.sanitize() {
        info!(
            "Transport setting {} changed from {} to {}: {}",
            change.field, change.original, change.sanitized, change.reason
        );
    }
}
