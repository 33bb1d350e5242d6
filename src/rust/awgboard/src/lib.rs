// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Drivers for the AWG and trigger boards.
//!
//! [`AwgBoard`] owns the transport endpoint of one AWG board together with
//! the per-channel configuration, compiles waves and sequences into sample
//! memory and command programs and uploads them. [`TriggerBoard`] programs
//! the trigger generator over the status-reply link.

mod awg;
pub mod channel;
pub mod eeprom;
pub mod network;
mod sequence;
pub mod settings;
pub mod trigger;

pub use awg::{AwgBoard, ChannelPair, ChannelReport};
pub use channel::{ChannelPhase, ChannelState};
pub use eeprom::{Calibration, Eeprom};
pub use network::NetworkConfig;
pub use settings::BoardSettings;
pub use trigger::{ChannelSelect, ClockSource, TriggerBoard, TriggerChannelInfo, TriggerSource};

use awgboard_compiler as compiler;
use awgboard_transport as transport;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Channel {0} does not exist")]
    InvalidChannel(u8),
    #[error("Channel {channel} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        channel: u8,
        from: ChannelPhase,
        to: ChannelPhase,
    },
    #[error("DAC status check failed: {dac1:#04x}, {dac2:#04x}")]
    DacNotReady { dac1: u32, dac2: u32 },
    #[error("EEPROM byte {address:#04x} reads back {read:#04x}, wrote {written:#04x}")]
    EepromVerify { address: u8, written: u8, read: u8 },
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    Compiler(#[from] compiler::Error),
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new(msg: impl std::fmt::Display) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
