// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Update transmitter.
//!
//! Delivers one [`SignedTransaction`] at a time over TCP and waits for the
//! server's answer. Nothing is retried: once the request has been written, a
//! failure is final for the run and reported with the batch index so operators
//! can see how much of the zone was updated.
//!
//! The only failover happens before any byte is written. If a server cannot be
//! reached, the next configured server is tried with the same transaction.

use hickory_client::op::{Message, ResponseCode};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::errors::SendError;
use crate::transport::{self, duration_ms, ConnectError};
use crate::tsig::SignedTransaction;

/// Outcome of an acknowledged transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    /// Batch index carried by the transaction
    pub batch_index: usize,
    /// Server that acknowledged it
    pub server: String,
    /// DNS message id
    pub id: u16,
    /// Number of operations applied
    pub operations: usize,
    /// Whether the server's reply carried a verified signature
    pub response_verified: bool,
    /// Round trip time in milliseconds
    pub elapsed_ms: u64,
}

/// Why a single attempt failed.
enum Attempt {
    /// The connection was never established; the transaction was not sent
    NotConnected(ConnectError),
    /// The transaction may have reached the server
    Failed(SendError),
}

/// Send a transaction to one server and wait for its response.
///
/// # Errors
///
/// - [`SendError::Transport`] if the connection cannot be made, breaks, or the
///   reply is not a valid response to this transaction
/// - [`SendError::Timeout`] if no reply arrives within `timeout`
/// - [`SendError::Rejected`] if the server answers with an error code or the
///   reply signature does not verify
pub async fn send(
    transaction: &mut SignedTransaction,
    server: &str,
    timeout: Duration,
) -> Result<TransactionResult, SendError> {
    match attempt(transaction, server, timeout).await {
        Ok(result) => Ok(result),
        Err(Attempt::NotConnected(e)) => Err(SendError::Transport {
            batch: transaction.batch_index(),
            server: server.to_string(),
            reason: e.to_string(),
        }),
        Err(Attempt::Failed(e)) => Err(e),
    }
}

async fn attempt(
    transaction: &mut SignedTransaction,
    server: &str,
    timeout: Duration,
) -> Result<TransactionResult, Attempt> {
    let batch = transaction.batch_index();
    let transport_error = |reason: String| {
        Attempt::Failed(SendError::Transport {
            batch,
            server: server.to_string(),
            reason,
        })
    };
    let timed_out = || {
        Attempt::Failed(SendError::Timeout {
            batch,
            server: server.to_string(),
            timeout_ms: duration_ms(timeout),
        })
    };

    let mut stream = transport::connect(server, timeout)
        .await
        .map_err(Attempt::NotConnected)?;

    let started = Instant::now();
    debug!(
        zone = %transaction.zone(),
        batch,
        server = %server,
        id = transaction.id(),
        operations = transaction.operations(),
        "Sending update"
    );

    tokio::time::timeout(timeout, transport::write_message(&mut stream, transaction.wire()))
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| transport_error(e.to_string()))?;

    let remaining = timeout.saturating_sub(started.elapsed());
    let frame = tokio::time::timeout(remaining, transport::read_message(&mut stream))
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| transport_error(e.to_string()))?
        .ok_or_else(|| transport_error("connection closed before a response".to_string()))?;

    let response = Message::from_vec(&frame).map_err(|e| transport_error(e.to_string()))?;
    if response.id() != transaction.id() {
        return Err(transport_error(format!(
            "response id {} does not match request id {}",
            response.id(),
            transaction.id()
        )));
    }

    if response.response_code() != ResponseCode::NoError {
        return Err(Attempt::Failed(SendError::Rejected {
            batch,
            server: server.to_string(),
            rcode: format!("{:?}", response.response_code()),
        }));
    }

    let mut response_verified = false;
    if let Some(mut verifier) = transaction.take_verifier() {
        if response.signature().is_empty() {
            warn!(
                zone = %transaction.zone(),
                batch,
                server = %server,
                "Server acknowledged a signed update without signing its response"
            );
        } else {
            verifier(&frame).map_err(|e| {
                Attempt::Failed(SendError::Rejected {
                    batch,
                    server: server.to_string(),
                    rcode: format!("response signature invalid: {e}"),
                })
            })?;
            response_verified = true;
        }
    }

    Ok(TransactionResult {
        batch_index: batch,
        server: server.to_string(),
        id: transaction.id(),
        operations: transaction.operations(),
        response_verified,
        elapsed_ms: duration_ms(started.elapsed()),
    })
}

/// Sends transactions to the first reachable server of an ordered list.
#[derive(Debug, Clone)]
pub struct Transmitter {
    servers: Vec<String>,
    timeout: Duration,
}

impl Transmitter {
    /// Create a transmitter for `servers`, tried in order.
    #[must_use]
    pub fn new(servers: Vec<String>, timeout: Duration) -> Self {
        Self { servers, timeout }
    }

    /// Configured servers
    #[must_use]
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Per-transaction timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one transaction and wait for it to be acknowledged.
    ///
    /// Moves on to the next server only when a connection could not be opened.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] as described for [`send`]. When no server can be
    /// reached, the connection error of the last one is reported.
    pub async fn send(
        &self,
        transaction: &mut SignedTransaction,
    ) -> Result<TransactionResult, SendError> {
        let batch = transaction.batch_index();
        let mut last_error = SendError::Transport {
            batch,
            server: String::new(),
            reason: "no servers configured".to_string(),
        };

        for server in &self.servers {
            match attempt(transaction, server, self.timeout).await {
                Ok(result) => {
                    info!(
                        zone = %transaction.zone(),
                        batch,
                        server = %server,
                        operations = result.operations,
                        elapsed_ms = result.elapsed_ms,
                        "Update acknowledged"
                    );
                    return Ok(result);
                }
                Err(Attempt::NotConnected(e)) => {
                    warn!(batch, server = %server, error = %e, "Server unreachable, trying next");
                    last_error = SendError::Transport {
                        batch,
                        server: server.clone(),
                        reason: e.to_string(),
                    };
                }
                Err(Attempt::Failed(e)) => return Err(e),
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
#[path = "transmit_tests.rs"]
mod transmit_tests;
