// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::io;
use std::time::Duration;

use awgboard_isa::Status;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request itself is invalid. Never retried.
    #[error("Invalid request: {0}")]
    Precondition(String),
    #[error("No datagram received within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("Short datagram: expected {expected} bytes, received {received}")]
    ShortFrame { expected: usize, received: usize },
    #[error("Reply does not match the request")]
    StaleReply,
    #[error("Frame counter advanced by {counted}, expected {expected}")]
    FrameCountMismatch { expected: u32, counted: u32 },
    #[error("DDR frame {index} arrived out of sequence")]
    FrameOutOfSequence { index: usize },
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("Bulk reads are unavailable: throughput negotiation did not succeed")]
    NotNegotiated,
    #[error("DDR reads keep failing at the {floor} byte block floor")]
    ThroughputFloor { floor: usize },
    #[error("Device reported {0}")]
    DeviceStatus(Status),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Isa(#[from] awgboard_isa::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new<T: Display>(msg: T) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }

    pub fn precondition<T: Display>(msg: T) -> Self {
        Error::Precondition(msg.to_string())
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }

    /// Faults that a repeated attempt may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::ShortFrame { .. }
                | Error::StaleReply
                | Error::FrameCountMismatch { .. }
                | Error::FrameOutOfSequence { .. }
                | Error::Io(_)
        )
    }

    /// The innermost cause of an exhausted retry.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
