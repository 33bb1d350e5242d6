// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Persistent network identity of a datagram board.

use std::net::Ipv4Addr;
use std::time::Duration;

use awgboard_isa::bank::reg_bank::NETWORK;
use awgboard_isa::registers::network;
use awgboard_log::warn;
use awgboard_transport::{Endpoint, Link};

use crate::eeprom::Eeprom;
use crate::{Error, Result};

const EEPROM_IP: u8 = 0x00;
const EEPROM_NETMASK: u8 = 0x04;
const EEPROM_GATEWAY: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

fn is_host_address(addr: Ipv4Addr) -> bool {
    let [first, .., last] = addr.octets();
    (1..255).contains(&first) && (1..255).contains(&last)
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_host_address(self.ip) {
            return Err(Error::precondition(format!("{} is not a host address", self.ip)));
        }
        if !is_host_address(self.gateway) {
            return Err(Error::precondition(format!(
                "Gateway {} is not a host address",
                self.gateway
            )));
        }
        let mask = u32::from(self.netmask);
        if mask == 0 || mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(Error::precondition(format!(
                "{} is not a valid netmask",
                self.netmask
            )));
        }
        if u32::from(self.ip) & mask != u32::from(self.gateway) & mask {
            return Err(Error::precondition(format!(
                "Gateway {} is outside {}/{}",
                self.gateway,
                self.ip,
                mask.leading_ones()
            )));
        }
        Ok(())
    }

    /// Store the identity in the EEPROM and switch the board over. The board
    /// answers on the new address afterwards; the endpoint must reconnect.
    pub fn apply<L: Link>(&self, endpoint: &mut Endpoint<L>, settle: Duration) -> Result<()> {
        self.validate()?;
        let mut eeprom = Eeprom::new(endpoint, settle);
        for (base, addr) in [
            (EEPROM_IP, self.ip),
            (EEPROM_NETMASK, self.netmask),
            (EEPROM_GATEWAY, self.gateway),
        ] {
            for (offset, byte) in (0u8..).zip(u32::from(addr).to_le_bytes()) {
                eeprom.write_byte_unprotected(base + offset, byte)?;
            }
        }
        endpoint.write_regs(&[
            (NETWORK, network::GATEWAY, u32::from(self.gateway)),
            (NETWORK, network::NETMASK, u32::from(self.netmask)),
        ])?;
        // The reply to this write already comes from the new address.
        endpoint.write_regs_no_reply(&[(NETWORK, network::IP_ADDR, u32::from(self.ip))])?;
        warn!(
            "Board moved to {} (netmask {}, gateway {}); reconnect required",
            self.ip, self.netmask, self.gateway
        );
        Ok(())
    }
}
