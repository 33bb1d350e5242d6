// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register and memory bus over the board's datagram link.
//!
//! The link itself is unreliable; [`Endpoint`] turns it into a dependable
//! bus with batched register access, frame-counted bulk writes, negotiated
//! DDR readback and bounded retries. [`StatusLink`] covers the stream-based
//! status-reply family used by the trigger board.

pub mod codec;
mod endpoint;
mod error;
pub mod link;
mod memory;
mod readback;
pub mod retry;
pub mod settings;
pub mod status_link;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use codec::RegisterOp;
pub use endpoint::{Endpoint, NetworkInfo};
pub use error::{Error, Result};
pub use link::{Link, UdpLink};
pub use readback::{DdrReadout, SelfTestReport};
pub use retry::RetryPolicy;
pub use settings::{SanitizationChange, TransportSettings};
pub use status_link::{StatusLink, StatusReply};
