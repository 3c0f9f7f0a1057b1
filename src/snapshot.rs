// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Zone snapshot reader.
//!
//! Fetches the live record set of a zone with a full zone transfer (AXFR,
//! RFC 5936) over TCP. A transfer is accepted only when it is complete: it must
//! open with the zone's SOA and close with the same SOA. Anything short of that
//! is reported as a failure and no partial snapshot is returned.
//!
//! Reserved owner names and server-managed record types are dropped while the
//! snapshot is built, so the rest of the pipeline never sees them.

use hickory_client::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_client::rr::{DNSClass, Name, RData, RecordType};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::diff::DiffOperation;
use crate::errors::TransferError;
use crate::records::{equals, same_slot, ReservedNames, ResourceRecord};
use crate::transport::{self, duration_ms, ConnectError};
use crate::tsig::Authenticator;

/// Records currently served for a zone, from one transfer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSnapshot {
    zone: Name,
    serial: u32,
    records: BTreeMap<Name, Vec<ResourceRecord>>,
}

impl ZoneSnapshot {
    /// Build a snapshot from transferred records.
    ///
    /// Records excluded by `reserved` are dropped and identical duplicates are
    /// collapsed.
    pub fn from_records<I>(reserved: &ReservedNames, serial: u32, records: I) -> Self
    where
        I: IntoIterator<Item = ResourceRecord>,
    {
        let mut by_name: BTreeMap<Name, Vec<ResourceRecord>> = BTreeMap::new();
        for record in records {
            if reserved.excludes(&record) {
                continue;
            }
            let entry = by_name.entry(record.name().clone()).or_default();
            if !entry.iter().any(|existing| equals(existing, &record)) {
                entry.push(record);
            }
        }
        for records in by_name.values_mut() {
            records.sort_by(ResourceRecord::canonical_cmp);
        }

        Self {
            zone: reserved.apex().clone(),
            serial,
            records: by_name,
        }
    }

    /// An empty snapshot, as seen for a zone with only reserved records.
    #[must_use]
    pub fn empty(reserved: &ReservedNames, serial: u32) -> Self {
        Self::from_records(reserved, serial, std::iter::empty())
    }

    /// The zone apex
    #[must_use]
    pub fn zone(&self) -> &Name {
        &self.zone
    }

    /// SOA serial at the time of the transfer
    #[must_use]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Owner names with at least one record, in canonical order
    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.records.keys()
    }

    /// Records at `name` (empty if none)
    #[must_use]
    pub fn records_at(&self, name: &Name) -> &[ResourceRecord] {
        self.records
            .get(&crate::records::normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every record, grouped by owner name
    pub fn iter(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values().flatten()
    }

    /// Total number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// Returns true if the zone holds no reconcilable records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The snapshot a server would hold after applying `operations` in order.
    ///
    /// Follows RFC 2136 semantics: a removal deletes the record in the same slot
    /// whatever its ttl, an addition to an occupied slot replaces it.
    #[must_use]
    pub fn with_applied(&self, operations: &[DiffOperation]) -> Self {
        let mut records = self.records.clone();
        for operation in operations {
            match operation {
                DiffOperation::Remove(record) => {
                    if let Some(existing) = records.get_mut(record.name()) {
                        existing.retain(|r| !same_slot(r, record));
                        if existing.is_empty() {
                            records.remove(record.name());
                        }
                    }
                }
                DiffOperation::Add(record) => {
                    let existing = records.entry(record.name().clone()).or_default();
                    existing.retain(|r| !same_slot(r, record));
                    existing.push(record.clone());
                    existing.sort_by(ResourceRecord::canonical_cmp);
                }
            }
        }
        Self {
            zone: self.zone.clone(),
            serial: self.serial,
            records,
        }
    }
}

fn soa_serial(rdata: Option<&RData>) -> Option<u32> {
    match rdata {
        Some(RData::SOA(soa)) => Some(soa.serial()),
        _ => None,
    }
}

/// NOTAUTH, or one of the TSIG error codes of RFC 8945 when the server echoes them.
fn is_signature_rejection(rcode: ResponseCode) -> bool {
    matches!(
        rcode,
        ResponseCode::NotAuth
            | ResponseCode::BADSIG
            | ResponseCode::BADKEY
            | ResponseCode::BADTIME
    )
}

fn build_axfr_request(zone: &Name) -> Message {
    let mut query = Query::query(zone.clone(), RecordType::AXFR);
    query.set_query_class(DNSClass::IN);

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false);
    message.add_query(query);
    message
}

/// Fetch a complete snapshot of a zone from one server.
///
/// # Errors
///
/// - [`TransferError::TransferTimeout`] if the whole transfer does not finish
///   within `timeout`
/// - [`TransferError::TransferNotAuthorized`] if the request was signed and the
///   server rejects the signature
/// - [`TransferError::TransferRefused`] if the server answers with an error code
/// - [`TransferError::TransferIncomplete`] if the stream ends before the closing SOA
/// - [`TransferError::TransferFailed`] for connection and protocol failures
pub async fn fetch_snapshot(
    reserved: &ReservedNames,
    server: &str,
    timeout: Duration,
    key: Option<&Authenticator>,
) -> Result<ZoneSnapshot, TransferError> {
    let zone = reserved.apex();
    match tokio::time::timeout(timeout, transfer(reserved, server, timeout, key)).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::TransferTimeout {
            zone: zone.to_string(),
            server: server.to_string(),
            timeout_ms: duration_ms(timeout),
        }),
    }
}

/// Fetch a snapshot from the first server that completes a transfer.
///
/// Servers are tried in order; the error of the last server is returned when
/// all of them fail.
///
/// # Errors
///
/// Returns the last [`TransferError`] if no server completes a transfer, or
/// [`TransferError::TransferFailed`] if `servers` is empty.
pub async fn fetch_snapshot_from_any(
    reserved: &ReservedNames,
    servers: &[String],
    timeout: Duration,
    key: Option<&Authenticator>,
) -> Result<(ZoneSnapshot, String), TransferError> {
    let mut last_error = TransferError::TransferFailed {
        zone: reserved.apex().to_string(),
        server: String::new(),
        reason: "no servers configured".to_string(),
    };
    for server in servers {
        match fetch_snapshot(reserved, server, timeout, key).await {
            Ok(snapshot) => return Ok((snapshot, server.clone())),
            Err(e) => {
                warn!(zone = %reserved.apex(), server = %server, error = %e, "Zone transfer failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

async fn transfer(
    reserved: &ReservedNames,
    server: &str,
    timeout: Duration,
    key: Option<&Authenticator>,
) -> Result<ZoneSnapshot, TransferError> {
    let zone = reserved.apex();
    let failed = |reason: String| TransferError::TransferFailed {
        zone: zone.to_string(),
        server: server.to_string(),
        reason,
    };

    let mut request = build_axfr_request(zone);
    if let Some(authenticator) = key {
        // The reply stream is accepted without verifying its signatures.
        authenticator
            .sign_message(&mut request)
            .map_err(|e| failed(e.to_string()))?;
    }
    let wire = request.to_vec().map_err(|e| failed(e.to_string()))?;

    let mut stream = transport::connect(server, timeout)
        .await
        .map_err(|e| match e {
            ConnectError::Timeout { timeout_ms, .. } => TransferError::TransferTimeout {
                zone: zone.to_string(),
                server: server.to_string(),
                timeout_ms,
            },
            other => failed(other.to_string()),
        })?;
    transport::write_message(&mut stream, &wire)
        .await
        .map_err(|e| failed(e.to_string()))?;
    debug!(zone = %zone, server = %server, "Requested zone transfer");

    let mut opening_serial: Option<u32> = None;
    let mut records: Vec<ResourceRecord> = Vec::new();
    let mut received = 0usize;

    loop {
        let Some(frame) = transport::read_message(&mut stream)
            .await
            .map_err(|e| failed(e.to_string()))?
        else {
            return Err(TransferError::TransferIncomplete {
                zone: zone.to_string(),
                server: server.to_string(),
                records: received,
            });
        };

        let response = Message::from_vec(&frame).map_err(|e| failed(e.to_string()))?;
        if response.id() != request.id() {
            return Err(failed(format!(
                "response id {} does not match request id {}",
                response.id(),
                request.id()
            )));
        }
        let rcode = response.response_code();
        if let (Some(authenticator), true) = (key, is_signature_rejection(rcode)) {
            return Err(TransferError::TransferNotAuthorized {
                zone: zone.to_string(),
                server: server.to_string(),
                key_name: authenticator.key_name().to_string(),
                rcode: format!("{rcode:?}"),
            });
        }
        if rcode != ResponseCode::NoError {
            return Err(TransferError::TransferRefused {
                zone: zone.to_string(),
                server: server.to_string(),
                rcode: format!("{:?}", response.response_code()),
            });
        }

        for record in response.answers() {
            received += 1;
            let serial = soa_serial(record.data());

            match (opening_serial, serial) {
                (None, Some(serial)) => {
                    opening_serial = Some(serial);
                    continue;
                }
                (None, None) => {
                    return Err(failed(format!(
                        "transfer did not start with an SOA record (got {})",
                        record.record_type()
                    )));
                }
                (Some(opening), Some(closing)) => {
                    if opening != closing {
                        return Err(failed(format!(
                            "incremental transfer (serial {opening} then {closing}) is not accepted"
                        )));
                    }
                    let snapshot = ZoneSnapshot::from_records(reserved, opening, records);
                    info!(
                        zone = %zone,
                        server = %server,
                        serial = opening,
                        received,
                        records = snapshot.len(),
                        "Zone transfer complete"
                    );
                    return Ok(snapshot);
                }
                (Some(_), None) => {}
            }

            if let Some(converted) =
                ResourceRecord::from_record(record).map_err(|e| failed(e.to_string()))?
            {
                records.push(converted);
            }
        }
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod snapshot_tests;
