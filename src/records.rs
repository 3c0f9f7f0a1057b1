// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Canonical resource record model.
//!
//! Records coming from the configuration loader and records received in a zone
//! transfer are both converted into [`ResourceRecord`], whose owner name and
//! embedded names are lower-cased and fully qualified. Comparisons between the
//! two sources are therefore never spuriously false because of letter case or a
//! missing trailing dot.
//!
//! Two identity rules are provided:
//! - [`equals`]: every field matches (owner, ttl, class, type, rdata)
//! - [`same_slot`]: owner, type and rdata match regardless of ttl; for singleton
//!   types (CNAME) owner and type alone decide, so at most one record occupies
//!   the slot

use hickory_client::rr::rdata::{CNAME, MX, SRV, TXT};
use hickory_client::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::errors::ConfigError;

/// Record types restricted to one record per owner name.
pub const SINGLETON_TYPES: &[RecordType] = &[RecordType::CNAME];

/// Record types maintained by the server itself; never diffed or mutated.
pub const SERVER_MANAGED_TYPES: &[RecordType] = &[
    RecordType::SOA,
    RecordType::RRSIG,
    RecordType::NSEC,
    RecordType::NSEC3,
    RecordType::NSEC3PARAM,
    RecordType::DNSKEY,
    RecordType::CDS,
    RecordType::CDNSKEY,
];

/// Returns true if at most one record of this type may exist per owner name.
#[must_use]
pub fn is_singleton_type(record_type: RecordType) -> bool {
    SINGLETON_TYPES.contains(&record_type)
}

/// Lower-case a name and mark it fully qualified.
#[must_use]
pub fn normalize_name(name: &Name) -> Name {
    let mut normalized = name.to_lowercase();
    normalized.set_fqdn(true);
    normalized
}

/// Rdata of a record type the loader cannot express, kept in wire form.
///
/// Only seen in live snapshots; carried so the record can still be removed.
#[derive(Debug, Clone)]
pub struct OpaqueRdata {
    record_type: RecordType,
    wire: Vec<u8>,
    rdata: RData,
}

impl OpaqueRdata {
    /// Wrap hickory rdata, encoding it once for comparisons.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if the rdata cannot be serialized.
    pub fn new(rdata: RData) -> Result<Self, hickory_proto::error::ProtoError> {
        let wire = rdata.to_bytes()?;
        Ok(Self {
            record_type: rdata.record_type(),
            wire,
            rdata,
        })
    }

    /// The record type of the wrapped rdata
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// The wrapped rdata
    #[must_use]
    pub fn rdata(&self) -> &RData {
        &self.rdata
    }
}

impl PartialEq for OpaqueRdata {
    fn eq(&self, other: &Self) -> bool {
        self.record_type == other.record_type && self.wire == other.wire
    }
}

impl Eq for OpaqueRdata {}

impl PartialOrd for OpaqueRdata {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpaqueRdata {
    fn cmp(&self, other: &Self) -> Ordering {
        u16::from(self.record_type)
            .cmp(&u16::from(other.record_type))
            .then_with(|| self.wire.cmp(&other.wire))
    }
}

/// Type-specific record data.
///
/// Names inside rdata are always normalized; build values through the
/// constructors rather than the variants when the input may be mixed-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordData {
    /// IPv4 host address
    A(Ipv4Addr),
    /// IPv6 host address
    Aaaa(Ipv6Addr),
    /// Canonical name (alias target)
    Cname(Name),
    /// Mail exchanger
    Mx {
        /// Lower values are preferred
        preference: u16,
        /// Mail server host name
        exchange: Name,
    },
    /// Service locator
    Srv {
        /// Lower values are tried first
        priority: u16,
        /// Relative weight among equal priorities
        weight: u16,
        /// Service port
        port: u16,
        /// Host providing the service
        target: Name,
    },
    /// Character strings, in order
    Txt(Vec<Vec<u8>>),
    /// Any other type, compared by wire form
    Other(OpaqueRdata),
}

impl RecordData {
    /// CNAME rdata with a normalized target.
    #[must_use]
    pub fn cname(target: &Name) -> Self {
        Self::Cname(normalize_name(target))
    }

    /// MX rdata with a normalized exchange.
    #[must_use]
    pub fn mx(preference: u16, exchange: &Name) -> Self {
        Self::Mx {
            preference,
            exchange: normalize_name(exchange),
        }
    }

    /// SRV rdata with a normalized target.
    #[must_use]
    pub fn srv(priority: u16, weight: u16, port: u16, target: &Name) -> Self {
        Self::Srv {
            priority,
            weight,
            port,
            target: normalize_name(target),
        }
    }

    /// TXT rdata from text strings.
    #[must_use]
    pub fn txt<S: AsRef<str>>(strings: &[S]) -> Self {
        Self::Txt(
            strings
                .iter()
                .map(|s| s.as_ref().as_bytes().to_vec())
                .collect(),
        )
    }

    /// The DNS record type for this rdata
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Aaaa(_) => RecordType::AAAA,
            Self::Cname(_) => RecordType::CNAME,
            Self::Mx { .. } => RecordType::MX,
            Self::Srv { .. } => RecordType::SRV,
            Self::Txt(_) => RecordType::TXT,
            Self::Other(opaque) => opaque.record_type(),
        }
    }

    /// Convert hickory rdata into the canonical model.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if an unmanaged type cannot be serialized.
    pub fn from_rdata(rdata: &RData) -> Result<Self, hickory_proto::error::ProtoError> {
        Ok(match rdata {
            RData::A(a) => Self::A(a.0),
            RData::AAAA(aaaa) => Self::Aaaa(aaaa.0),
            RData::CNAME(cname) => Self::cname(&cname.0),
            RData::MX(mx) => Self::mx(mx.preference(), mx.exchange()),
            RData::SRV(srv) => Self::srv(srv.priority(), srv.weight(), srv.port(), srv.target()),
            RData::TXT(txt) => Self::Txt(txt.txt_data().iter().map(|s| s.to_vec()).collect()),
            other => Self::Other(OpaqueRdata::new(other.clone())?),
        })
    }

    /// Convert back into hickory rdata for the wire.
    #[must_use]
    pub fn to_rdata(&self) -> RData {
        match self {
            Self::A(ip) => RData::A((*ip).into()),
            Self::Aaaa(ip) => RData::AAAA((*ip).into()),
            Self::Cname(target) => RData::CNAME(CNAME(target.clone())),
            Self::Mx {
                preference,
                exchange,
            } => RData::MX(MX::new(*preference, exchange.clone())),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => RData::SRV(SRV::new(*priority, *weight, *port, target.clone())),
            Self::Txt(strings) => RData::TXT(TXT::from_bytes(
                strings.iter().map(Vec::as_slice).collect(),
            )),
            Self::Other(opaque) => opaque.rdata().clone(),
        }
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(ip) => write!(f, "{ip}"),
            Self::Aaaa(ip) => write!(f, "{ip}"),
            Self::Cname(target) => write!(f, "{target}"),
            Self::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
            Self::Txt(strings) => {
                let quoted: Vec<String> = strings
                    .iter()
                    .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
                    .collect();
                write!(f, "{}", quoted.join(" "))
            }
            Self::Other(opaque) => write!(f, "{}", opaque.rdata()),
        }
    }
}

/// An immutable DNS resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    name: Name,
    ttl: u32,
    class: DNSClass,
    data: RecordData,
}

impl ResourceRecord {
    /// Create an `IN` class record; the owner name is normalized.
    #[must_use]
    pub fn new(name: &Name, ttl: u32, data: RecordData) -> Self {
        Self {
            name: normalize_name(name),
            ttl,
            class: DNSClass::IN,
            data,
        }
    }

    /// Convert a record received from a server.
    ///
    /// Returns `Ok(None)` for records without rdata (update-style placeholders).
    ///
    /// # Errors
    ///
    /// Returns the encoder error if an unmanaged type cannot be serialized.
    pub fn from_record(record: &Record) -> Result<Option<Self>, hickory_proto::error::ProtoError> {
        let Some(rdata) = record.data() else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: normalize_name(record.name()),
            ttl: record.ttl(),
            class: record.dns_class(),
            data: RecordData::from_rdata(rdata)?,
        }))
    }

    /// Convert into a hickory record carrying this record's class and ttl.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let mut record = Record::from_rdata(self.name.clone(), self.ttl, self.data.to_rdata());
        record.set_dns_class(self.class);
        record
    }

    /// Owner name (lower-case, fully qualified)
    #[must_use]
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Time to live in seconds
    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Record class
    #[must_use]
    pub fn dns_class(&self) -> DNSClass {
        self.class
    }

    /// Record type
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    /// Type-specific data
    #[must_use]
    pub fn data(&self) -> &RecordData {
        &self.data
    }

    /// Returns true for singleton-type records (see [`SINGLETON_TYPES`]).
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        is_singleton_type(self.record_type())
    }

    /// Identity of this record for diffing.
    #[must_use]
    pub fn slot(&self) -> SlotKey {
        SlotKey {
            name: self.name.clone(),
            record_type: u16::from(self.record_type()),
            data: if self.is_singleton() {
                None
            } else {
                Some(self.data.clone())
            },
        }
    }

    /// Total order over `(owner, type, rdata, ttl)` used to make diffs deterministic.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| u16::from(self.record_type()).cmp(&u16::from(other.record_type())))
            .then_with(|| self.data.cmp(&other.data))
            .then_with(|| self.ttl.cmp(&other.ttl))
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.name,
            self.ttl,
            self.class,
            self.record_type(),
            self.data
        )
    }
}

/// Key under which a record occupies a slot in a zone.
///
/// Singleton types carry no rdata so that any two records of that type at the
/// same owner name collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotKey {
    name: Name,
    record_type: u16,
    data: Option<RecordData>,
}

/// Full equality: owner, ttl, class, type and rdata all match.
#[must_use]
pub fn equals(a: &ResourceRecord, b: &ResourceRecord) -> bool {
    a == b
}

/// Slot identity: owner, type and rdata match regardless of ttl; singleton types
/// match on owner and type alone.
#[must_use]
pub fn same_slot(a: &ResourceRecord, b: &ResourceRecord) -> bool {
    a.slot() == b.slot()
}

/// Owner names that are protocol-reserved for a zone and never reconciled.
///
/// The apex is always reserved; additional names (e.g. the zone's own name
/// servers) come from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedNames {
    apex: Name,
    names: Vec<Name>,
}

impl ReservedNames {
    /// Reserve the apex of `zone` plus the given names relative to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a name cannot be joined to the zone.
    pub fn new<S: AsRef<str>>(zone: &Name, relative: &[S]) -> Result<Self, ConfigError> {
        let apex = normalize_name(zone);
        let names = relative
            .iter()
            .map(|label| qualify(label.as_ref(), &apex))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { apex, names })
    }

    /// The zone apex
    #[must_use]
    pub fn apex(&self) -> &Name {
        &self.apex
    }

    /// Returns true if records at `name` must never be diffed or mutated.
    #[must_use]
    pub fn is_reserved(&self, name: &Name) -> bool {
        let name = normalize_name(name);
        name == self.apex || self.names.contains(&name)
    }

    /// Returns true if a record is excluded from reconciliation, by owner or by type.
    #[must_use]
    pub fn excludes(&self, record: &ResourceRecord) -> bool {
        self.is_reserved(record.name()) || SERVER_MANAGED_TYPES.contains(&record.record_type())
    }
}

/// Resolve a configuration name against a zone.
///
/// Names with a trailing dot are absolute; anything else is relative to `zone`.
/// `@` denotes the apex.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the name is not a valid domain name.
pub fn qualify(name: &str, zone: &Name) -> Result<Name, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        reason: format!("'{name}' is not a valid domain name: {reason}"),
    };

    if name == crate::constants::APEX_LABEL {
        return Ok(normalize_name(zone));
    }
    let parsed = Name::from_ascii(name).map_err(|e| invalid(e.to_string()))?;
    if parsed.is_fqdn() {
        return Ok(normalize_name(&parsed));
    }
    let joined = parsed
        .append_domain(zone)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(normalize_name(&joined))
}

/// Parse an rdata target (CNAME, MX exchange, SRV target) as an absolute name.
///
/// The root is appended when the trailing dot is missing, so `mx1.example.net`
/// and `mx1.example.net.` are the same target. Targets are never joined to the zone.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the name is not a valid domain name.
pub fn absolute(name: &str) -> Result<Name, ConfigError> {
    let mut parsed = Name::from_ascii(name).map_err(|e| ConfigError::Invalid {
        reason: format!("'{name}' is not a valid domain name: {e}"),
    })?;
    parsed.set_fqdn(true);
    Ok(normalize_name(&parsed))
}

/// Desired records of one zone, grouped by owner name in insertion order.
///
/// Invariant: no singleton-type record shares its owner name with any other record.
#[derive(Debug, Clone)]
pub struct DesiredState {
    reserved: ReservedNames,
    entries: Vec<(Name, Vec<ResourceRecord>)>,
}

impl DesiredState {
    /// An empty desired state for the zone described by `reserved`.
    #[must_use]
    pub fn new(reserved: ReservedNames) -> Self {
        Self {
            reserved,
            entries: Vec::new(),
        }
    }

    /// The zone apex
    #[must_use]
    pub fn zone(&self) -> &Name {
        self.reserved.apex()
    }

    /// Reserved names for this zone
    #[must_use]
    pub fn reserved(&self) -> &ReservedNames {
        &self.reserved
    }

    /// Add a desired record. Identical duplicates are ignored.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ReservedName`] if the owner is reserved
    /// - [`ConfigError::InvalidRecord`] if the owner is outside the zone or the
    ///   type is server-managed
    /// - [`ConfigError::SingletonCollision`] if a singleton would share its owner
    pub fn insert(&mut self, record: ResourceRecord) -> Result<(), ConfigError> {
        let zone = self.zone().to_string();
        if self.reserved.is_reserved(record.name()) {
            return Err(ConfigError::ReservedName {
                zone,
                name: record.name().to_string(),
            });
        }
        if !self.reserved.apex().zone_of(record.name()) {
            return Err(ConfigError::InvalidRecord {
                zone,
                name: record.name().to_string(),
                reason: "owner name is outside the zone".to_string(),
            });
        }
        if SERVER_MANAGED_TYPES.contains(&record.record_type()) {
            return Err(ConfigError::InvalidRecord {
                zone,
                name: record.name().to_string(),
                reason: format!("{} records are maintained by the server", record.record_type()),
            });
        }

        let position = self.entries.iter().position(|(name, _)| name == record.name());
        let records = match position {
            Some(index) => &mut self.entries[index].1,
            None => {
                self.entries.push((record.name().clone(), Vec::new()));
                let last = self.entries.len() - 1;
                &mut self.entries[last].1
            }
        };

        if records.iter().any(|existing| equals(existing, &record)) {
            return Ok(());
        }
        if !records.is_empty() {
            let singleton = if record.is_singleton() {
                Some(&record)
            } else {
                records.iter().find(|r| r.is_singleton())
            };
            if let Some(singleton) = singleton {
                return Err(ConfigError::SingletonCollision {
                    name: record.name().to_string(),
                    record_type: singleton.record_type().to_string(),
                });
            }
        }
        records.push(record);
        Ok(())
    }

    /// Owner names and their records, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &[ResourceRecord])> {
        self.entries
            .iter()
            .map(|(name, records)| (name, records.as_slice()))
    }

    /// Records desired at `name` (empty if none)
    #[must_use]
    pub fn records_at(&self, name: &Name) -> &[ResourceRecord] {
        let name = normalize_name(name);
        self.entries
            .iter()
            .find(|(owner, _)| *owner == name)
            .map(|(_, records)| records.as_slice())
            .unwrap_or_default()
    }

    /// Total number of desired records
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, records)| records.len()).sum()
    }

    /// Returns true if no records are desired
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod records_tests;
