// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Datagram links.
//!
//! [`Link`] is the seam between the protocol and the socket: the endpoint
//! only ever sends and receives whole datagrams.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use awgboard_log::warn;

use crate::settings::TransportSettings;

pub trait Link {
    /// Send one datagram.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`, waiting at most `timeout`.
    ///
    /// A timeout is reported as [`io::ErrorKind::WouldBlock`] or
    /// [`io::ErrorKind::TimedOut`].
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Human readable peer name, for logs.
    fn peer(&self) -> String;
}

/// UDP socket connected to one board.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
    timeout: Option<Duration>,
}

impl UdpLink {
    pub fn open(peer: SocketAddr, settings: &TransportSettings) -> io::Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        set_recv_buffer(&socket, settings.recv_buffer_bytes);
        let mut link = UdpLink {
            socket,
            peer,
            timeout: None,
        };
        link.apply_timeout(settings.frame_timeout())?;
        Ok(link)
    }

    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        if self.timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.timeout = Some(timeout);
        }
        Ok(())
    }
}

impl Link for UdpLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(datagram)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.apply_timeout(timeout)?;
        self.socket.recv(buf)
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

#[cfg(unix)]
fn set_recv_buffer(socket: &UdpSocket, bytes: usize) {
    if let Err(err) = rustix::net::sockopt::set_socket_recv_buffer_size(socket, bytes) {
        warn!("Could not set receive buffer to {} bytes: {}", bytes, err);
    }
}

#[cfg(not(unix))]
fn set_recv_buffer(_socket: &UdpSocket, bytes: usize) {
    warn!("Receive buffer size {} not applied on this platform", bytes);
}

/// Whether an I/O error stands for an expired receive timeout.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
