// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Transaction signatures (TSIG, RFC 8945) for dynamic update transactions.
//!
//! A batch is turned into one RFC 2136 UPDATE message and signed as a whole with a
//! pre-shared symmetric key. The keyed-hash algorithm is a configuration input;
//! adding another HMAC variant only touches [`TsigAlgorithmName`].
//!
//! Verification of the request happens on the server. This module only builds the
//! message correctly; it keeps the verifier hickory hands back so that a signed
//! response can be checked by the transmitter.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hickory_client::op::{Message, MessageType, OpCode, Query};
use hickory_client::rr::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::{DNSClass, Name, RecordType};
use hickory_proto::op::MessageVerifier;
use hickory_proto::rr::dnssec::tsig::TSigner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::batch::Batch;
use crate::constants::TSIG_FUDGE_TIME_SECS;
use crate::diff::DiffOperation;
use crate::errors::AuthConfigError;

/// Keyed-hash algorithms accepted for transaction signatures.
///
/// Legacy HMAC-MD5 and HMAC-SHA1 are not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigAlgorithmName {
    /// HMAC-SHA256 (the default and the minimum every server must support)
    HmacSha256,
    /// HMAC-SHA384
    HmacSha384,
    /// HMAC-SHA512
    HmacSha512,
}

impl TsigAlgorithmName {
    /// BIND-style algorithm name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha384 => "hmac-sha384",
            Self::HmacSha512 => "hmac-sha512",
        }
    }

    fn to_hickory(self) -> TsigAlgorithm {
        match self {
            Self::HmacSha256 => TsigAlgorithm::HmacSha256,
            Self::HmacSha384 => TsigAlgorithm::HmacSha384,
            Self::HmacSha512 => TsigAlgorithm::HmacSha512,
        }
    }
}

impl FromStr for TsigAlgorithmName {
    type Err = AuthConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both "hmac-sha256" and the fully qualified "hmac-sha256." form.
        match s.trim_end_matches('.').to_ascii_lowercase().as_str() {
            "hmac-sha256" => Ok(Self::HmacSha256),
            "hmac-sha384" => Ok(Self::HmacSha384),
            "hmac-sha512" => Ok(Self::HmacSha512),
            _ => Err(AuthConfigError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TsigAlgorithmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_algorithm() -> String {
    TsigAlgorithmName::HmacSha256.as_str().to_string()
}

/// TSIG key material as supplied by configuration.
///
/// Kept as plain strings so that malformed material surfaces as an
/// [`AuthConfigError`] when the [`Authenticator`] is built, not as a parse error.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TsigKey {
    /// Key name as configured on the server (e.g. "admin-tsig-key.example.com")
    pub name: String,
    /// Algorithm name (default "hmac-sha256")
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Base64-encoded shared secret
    pub secret: String,
}

impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Validated key material, ready to sign transactions.
pub struct Authenticator {
    key_name: Name,
    algorithm: TsigAlgorithmName,
    signer: TSigner,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("key_name", &self.key_name)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create a TSIG signer from key data.
    ///
    /// # Errors
    ///
    /// Returns [`AuthConfigError`] if the key name is not a domain name, the
    /// algorithm is unsupported, or the secret is empty or not base64.
    pub fn new(key: &TsigKey) -> Result<Self, AuthConfigError> {
        let algorithm = TsigAlgorithmName::from_str(&key.algorithm)?;

        let key_name =
            Name::from_ascii(&key.name).map_err(|e| AuthConfigError::InvalidKeyName {
                key_name: key.name.clone(),
                reason: e.to_string(),
            })?;
        if key_name.is_root() {
            return Err(AuthConfigError::InvalidKeyName {
                key_name: key.name.clone(),
                reason: "key name must not be empty".to_string(),
            });
        }
        let key_name = crate::records::normalize_name(&key_name);

        let key_bytes =
            BASE64
                .decode(key.secret.trim())
                .map_err(|e| AuthConfigError::InvalidSecret {
                    key_name: key.name.clone(),
                    reason: e.to_string(),
                })?;
        if key_bytes.is_empty() {
            return Err(AuthConfigError::InvalidSecret {
                key_name: key.name.clone(),
                reason: "secret is empty".to_string(),
            });
        }

        let signer = TSigner::new(
            key_bytes,
            algorithm.to_hickory(),
            key_name.clone(),
            TSIG_FUDGE_TIME_SECS,
        )
        .map_err(|e| AuthConfigError::InvalidSecret {
            key_name: key.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            key_name,
            algorithm,
            signer,
        })
    }

    /// Fully qualified key name
    #[must_use]
    pub fn key_name(&self) -> &Name {
        &self.key_name
    }

    /// Keyed-hash algorithm
    #[must_use]
    pub fn algorithm(&self) -> TsigAlgorithmName {
        self.algorithm
    }

    /// Append a TSIG record covering the whole message.
    ///
    /// Returns the verifier for the server's signed response.
    ///
    /// # Errors
    ///
    /// Returns [`AuthConfigError::SigningFailed`] if the message cannot be encoded.
    pub fn sign_message(
        &self,
        message: &mut Message,
    ) -> Result<Option<MessageVerifier>, AuthConfigError> {
        let now = u32::try_from(chrono::Utc::now().timestamp()).map_err(|e| {
            AuthConfigError::SigningFailed {
                key_name: self.key_name.to_string(),
                reason: format!("system clock out of range: {e}"),
            }
        })?;
        message
            .finalize(&self.signer, now)
            .map_err(|e| AuthConfigError::SigningFailed {
                key_name: self.key_name.to_string(),
                reason: e.to_string(),
            })
    }
}

/// A batch encoded as one signed UPDATE message.
///
/// Lives for a single transmission attempt.
pub struct SignedTransaction {
    batch_index: usize,
    zone: Name,
    id: u16,
    operations: usize,
    key_name: Option<Name>,
    algorithm: Option<TsigAlgorithmName>,
    wire: Vec<u8>,
    verifier: Option<MessageVerifier>,
}

impl fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("batch_index", &self.batch_index)
            .field("zone", &self.zone)
            .field("id", &self.id)
            .field("operations", &self.operations)
            .field("key_name", &self.key_name)
            .field("algorithm", &self.algorithm)
            .field("bytes", &self.wire.len())
            .finish_non_exhaustive()
    }
}

impl SignedTransaction {
    /// Index of the batch this transaction carries
    #[must_use]
    pub fn batch_index(&self) -> usize {
        self.batch_index
    }

    /// Target zone
    #[must_use]
    pub fn zone(&self) -> &Name {
        &self.zone
    }

    /// DNS message id
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Number of update operations in the message
    #[must_use]
    pub fn operations(&self) -> usize {
        self.operations
    }

    /// Signing key name, if signed
    #[must_use]
    pub fn key_name(&self) -> Option<&Name> {
        self.key_name.as_ref()
    }

    /// Signing algorithm, if signed
    #[must_use]
    pub fn algorithm(&self) -> Option<TsigAlgorithmName> {
        self.algorithm
    }

    /// Returns true if a transaction signature is attached
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.key_name.is_some()
    }

    /// Encoded message, without the TCP length prefix
    #[must_use]
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Take the response verifier, if the transaction was signed.
    pub fn take_verifier(&mut self) -> Option<MessageVerifier> {
        self.verifier.take()
    }
}

/// Build an unsigned RFC 2136 UPDATE message for a batch.
///
/// Additions carry class IN and their ttl; removals use class NONE with ttl 0,
/// which deletes exactly the matching RR (RFC 2136 §2.5.4).
#[must_use]
pub fn build_update(batch: &Batch<'_>, zone: &Name, id: u16) -> Message {
    let mut zone_section = Query::query(zone.clone(), RecordType::SOA);
    zone_section.set_query_class(DNSClass::IN);

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Update)
        .set_recursion_desired(false);
    message.add_query(zone_section);

    for operation in batch.operations() {
        let record = match operation {
            DiffOperation::Add(record) => record.to_record(),
            DiffOperation::Remove(record) => {
                let mut delete = record.to_record();
                delete.set_dns_class(DNSClass::NONE);
                delete.set_ttl(0);
                delete
            }
        };
        message.add_name_server(record);
    }
    message
}

/// Sign a batch as a single authenticated update transaction for `zone`.
///
/// With no key the message is sent unsigned.
///
/// # Errors
///
/// Returns [`AuthConfigError::SigningFailed`] if the message cannot be signed or
/// encoded.
pub fn sign(
    batch: &Batch<'_>,
    zone: &Name,
    key: Option<&Authenticator>,
) -> Result<SignedTransaction, AuthConfigError> {
    let id: u16 = rand::random();
    let mut message = build_update(batch, zone, id);

    let verifier = match key {
        Some(authenticator) => authenticator.sign_message(&mut message)?,
        None => None,
    };

    let wire = message
        .to_vec()
        .map_err(|e| AuthConfigError::SigningFailed {
            key_name: key.map_or_else(String::new, |k| k.key_name().to_string()),
            reason: e.to_string(),
        })?;

    debug!(
        zone = %zone,
        batch = batch.index(),
        id,
        operations = batch.len(),
        bytes = wire.len(),
        signed = key.is_some(),
        "Built update transaction"
    );

    Ok(SignedTransaction {
        batch_index: batch.index(),
        zone: zone.clone(),
        id,
        operations: batch.len(),
        key_name: key.map(|k| k.key_name().clone()),
        algorithm: key.map(Authenticator::algorithm),
        wire,
        verifier,
    })
}

#[cfg(test)]
#[path = "tsig_tests.rs"]
mod tsig_tests;
