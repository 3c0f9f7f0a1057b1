// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS over TCP framing.
//!
//! Zone transfers and dynamic updates both travel over a reliable stream. Each DNS
//! message is preceded by its length as a two-byte big-endian integer (RFC 1035
//! §4.2.2). Datagram transport is never used: an update must not be dropped or
//! applied partially because of fragmentation.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::constants::{DNS_PORT, MAX_TCP_MESSAGE_SIZE};

/// Failure to open a connection. Nothing has been written when this is returned.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The server address could not be resolved
    #[error("cannot resolve {server}: {reason}")]
    Resolve {
        /// The configured server string
        server: String,
        /// Resolver error
        reason: String,
    },

    /// No address accepted the connection within the timeout
    #[error("connection to {server} timed out after {timeout_ms}ms")]
    Timeout {
        /// The configured server string
        server: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Every resolved address refused or reset the connection
    #[error("connection to {server} failed: {source}")]
    Io {
        /// The configured server string
        server: String,
        /// Last I/O error
        #[source]
        source: io::Error,
    },
}

/// Append the standard DNS port when a server is given without one.
///
/// Accepts `192.0.2.1`, `192.0.2.1:5353`, `2001:db8::1`, `[2001:db8::1]:53`,
/// `ns1.example.com` and `ns1.example.com:53`.
#[must_use]
pub fn server_address(server: &str) -> String {
    if server.parse::<SocketAddr>().is_ok() {
        return server.to_string();
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return SocketAddr::new(ip, DNS_PORT).to_string();
    }
    match server.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => server.to_string(),
        _ => format!("{server}:{DNS_PORT}"),
    }
}

/// Open a TCP connection to `server`, trying each resolved address in turn.
///
/// # Errors
///
/// Returns [`ConnectError`] if resolution fails, every address fails, or the
/// timeout elapses first.
pub async fn connect(server: &str, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let address = server_address(server);
    let attempt = async {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| ConnectError::Resolve {
                server: server.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        let mut last_error =
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
        for addr in addrs {
            debug!(server = %server, address = %addr, "Connecting");
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    // Requests are written in one piece; no point delaying them.
                    stream.set_nodelay(true).ok();
                    return Ok(stream);
                }
                Err(e) => last_error = e,
            }
        }
        Err(ConnectError::Io {
            server: server.to_string(),
            source: last_error,
        })
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| ConnectError::Timeout {
            server: server.to_string(),
            timeout_ms: duration_ms(timeout),
        })?
}

/// Write one length-prefixed DNS message.
///
/// # Errors
///
/// Returns an error if the message is larger than a TCP DNS frame allows or the
/// write fails.
pub async fn write_message(stream: &mut TcpStream, wire: &[u8]) -> io::Result<()> {
    let len = u16::try_from(wire.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "message of {} bytes exceeds the {MAX_TCP_MESSAGE_SIZE} byte TCP frame limit",
                wire.len()
            ),
        )
    })?;

    let mut frame = Vec::with_capacity(wire.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(wire);
    stream.write_all(&frame).await?;
    stream.flush().await
}

/// Read one length-prefixed DNS message.
///
/// Returns `Ok(None)` if the peer closed the connection cleanly before a new frame.
///
/// # Errors
///
/// Returns an error if the connection breaks in the middle of a frame.
pub async fn read_message(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = usize::from(u16::from_be_bytes(len_buf));
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Milliseconds in a duration, saturating.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod transport_tests;
