// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for zone reconciliation.
//!
//! This module provides specialized error types for:
//! - Desired-state validation (configuration errors)
//! - Zone snapshot acquisition via AXFR
//! - TSIG key material problems
//! - Dynamic update transmission (transport, timeout, rejection)
//!
//! Every failure reaches the mode controller as one of these typed errors, never as
//! a catch-all. The composite [`ReconcileError`] maps each kind to a distinct exit
//! status and a human-readable stage.

use thiserror::Error;

use crate::constants::{
    EXIT_AUTH_CONFIG_ERROR, EXIT_CONFIG_ERROR, EXIT_NOT_AUTHORIZED_ERROR, EXIT_REJECTED_ERROR,
    EXIT_TIMEOUT_ERROR, EXIT_TRANSFER_ERROR, EXIT_TRANSPORT_ERROR,
};

/// Errors in the desired state or in run options.
///
/// These are local errors, surfaced before any network traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file '{path}': {reason}")]
    Unreadable {
        /// Path that was opened
        path: String,
        /// Underlying I/O error
        reason: String,
    },

    /// The configuration file is not valid YAML for the expected schema
    #[error("Failed to parse configuration file '{path}': {reason}")]
    Malformed {
        /// Path that was parsed
        path: String,
        /// Parser error
        reason: String,
    },

    /// A global setting is missing or contradictory
    #[error("Invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is invalid
        reason: String,
    },

    /// A record entry is malformed
    #[error("Invalid record '{name}' in zone '{zone}': {reason}")]
    InvalidRecord {
        /// The zone containing the record
        zone: String,
        /// The owner name as written in the configuration
        name: String,
        /// Explanation of what is invalid
        reason: String,
    },

    /// A singleton-type record shares its owner name with another record
    #[error("{record_type} record at '{name}' cannot coexist with other records at the same name")]
    SingletonCollision {
        /// Fully qualified owner name
        name: String,
        /// The singleton record type (e.g. CNAME)
        record_type: String,
    },

    /// The owner name is protocol-reserved and is never reconciled
    #[error("Owner name '{name}' in zone '{zone}' is reserved and cannot be managed")]
    ReservedName {
        /// The zone containing the name
        zone: String,
        /// The reserved owner name
        name: String,
    },

    /// The batch size limit is not a positive integer
    #[error("Batch size must be a positive integer, got {value}")]
    InvalidBatchSize {
        /// The rejected value
        value: i64,
    },
}

/// Errors acquiring the live zone snapshot via full zone transfer.
///
/// Any of these aborts the zone's run before a diff is computed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The transfer could not be established or was interrupted
    #[error("Zone transfer for '{zone}' from {server} failed: {reason}")]
    TransferFailed {
        /// The zone being transferred
        zone: String,
        /// The server the transfer was requested from
        server: String,
        /// Reason for the failure
        reason: String,
    },

    /// The server answered the transfer request with an error response code
    #[error("Zone transfer for '{zone}' refused by {server} ({rcode})")]
    TransferRefused {
        /// The zone being transferred
        zone: String,
        /// The server that refused
        server: String,
        /// Response code returned by the server
        rcode: String,
    },

    /// The server did not accept the transaction signature on the transfer request
    #[error("Zone transfer for '{zone}' from {server} not authorized for key '{key_name}' ({rcode})")]
    TransferNotAuthorized {
        /// The zone being transferred
        zone: String,
        /// The server that rejected the signature
        server: String,
        /// Key the request was signed with
        key_name: String,
        /// Response code returned by the server
        rcode: String,
    },

    /// The stream ended before the closing SOA record
    #[error("Zone transfer for '{zone}' from {server} ended after {records} records without a closing SOA")]
    TransferIncomplete {
        /// The zone being transferred
        zone: String,
        /// The server that sent the partial transfer
        server: String,
        /// Records received before the stream ended
        records: usize,
    },

    /// No complete transfer within the configured timeout
    #[error("Zone transfer for '{zone}' from {server} timed out after {timeout_ms}ms")]
    TransferTimeout {
        /// The zone being transferred
        zone: String,
        /// The server that did not answer in time
        server: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },
}

/// Errors in the TSIG key material.
///
/// Detected before any transaction is transmitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthConfigError {
    /// The key name is not a valid domain name
    #[error("Invalid TSIG key name '{key_name}': {reason}")]
    InvalidKeyName {
        /// The configured key name
        key_name: String,
        /// Parser error
        reason: String,
    },

    /// The secret is not valid base64 or is empty
    #[error("Invalid TSIG secret for key '{key_name}': {reason}")]
    InvalidSecret {
        /// The key whose secret is invalid
        key_name: String,
        /// Explanation of what is invalid
        reason: String,
    },

    /// The keyed-hash algorithm is unknown or not supported for signing
    #[error("Unsupported TSIG algorithm '{algorithm}'. Supported algorithms: hmac-sha256, hmac-sha384, hmac-sha512")]
    UnsupportedAlgorithm {
        /// The configured algorithm name
        algorithm: String,
    },

    /// The transaction could not be encoded or signed
    #[error("Failed to sign transaction with key '{key_name}': {reason}")]
    SigningFailed {
        /// The key used for signing
        key_name: String,
        /// Underlying error
        reason: String,
    },
}

/// Errors transmitting a signed update transaction.
///
/// Each variant carries the zero-based index of the failing batch so operators can
/// tell how much of the desired state was applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Connection refused, reset, or closed before a response was read
    #[error("Batch {batch} to {server}: transport failure: {reason}")]
    Transport {
        /// Index of the failing batch
        batch: usize,
        /// Server the batch was sent to
        server: String,
        /// Underlying I/O error
        reason: String,
    },

    /// The batch was sent but no response arrived in time; its fate is unknown
    #[error("Batch {batch} to {server}: no response within {timeout_ms}ms, the update may or may not have been applied")]
    Timeout {
        /// Index of the failing batch
        batch: usize,
        /// Server the batch was sent to
        server: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// The server answered with a non-success status
    #[error("Batch {batch} rejected by {server}: {rcode}")]
    Rejected {
        /// Index of the failing batch
        batch: usize,
        /// Server that rejected the batch
        server: String,
        /// Response code or verification failure returned
        rcode: String,
    },
}

impl SendError {
    /// Zero-based index of the batch that failed.
    #[must_use]
    pub fn batch_index(&self) -> usize {
        match self {
            Self::Transport { batch, .. }
            | Self::Timeout { batch, .. }
            | Self::Rejected { batch, .. } => *batch,
        }
    }
}

/// Composite error type for a reconciliation run.
///
/// This is the error returned by the mode controller for a zone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Desired state or run options are invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Live snapshot could not be acquired
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// TSIG key material is unusable
    #[error(transparent)]
    AuthConfig(#[from] AuthConfigError),

    /// A batch could not be delivered or was rejected
    #[error(transparent)]
    Send(#[from] SendError),
}

impl ReconcileError {
    /// Process exit status for this error. Every kind maps to a distinct non-zero code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => EXIT_CONFIG_ERROR,
            Self::Transfer(TransferError::TransferTimeout { .. })
            | Self::Send(SendError::Timeout { .. }) => EXIT_TIMEOUT_ERROR,
            Self::Transfer(TransferError::TransferNotAuthorized { .. }) => {
                EXIT_NOT_AUTHORIZED_ERROR
            }
            Self::Transfer(_) => EXIT_TRANSFER_ERROR,
            Self::AuthConfig(_) => EXIT_AUTH_CONFIG_ERROR,
            Self::Send(SendError::Transport { .. }) => EXIT_TRANSPORT_ERROR,
            Self::Send(SendError::Rejected { .. }) => EXIT_REJECTED_ERROR,
        }
    }

    /// Name of the pipeline stage that failed, for summaries.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "validate",
            Self::Transfer(_) => "snapshot",
            Self::AuthConfig(_) => "sign",
            Self::Send(_) => "transmit",
        }
    }

    /// Short machine-readable reason code for this error.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(ConfigError::Unreadable { .. }) => "ConfigUnreadable",
            Self::Config(ConfigError::Malformed { .. }) => "ConfigMalformed",
            Self::Config(ConfigError::Invalid { .. }) => "ConfigInvalid",
            Self::Config(ConfigError::InvalidRecord { .. }) => "InvalidRecord",
            Self::Config(ConfigError::SingletonCollision { .. }) => "SingletonCollision",
            Self::Config(ConfigError::ReservedName { .. }) => "ReservedName",
            Self::Config(ConfigError::InvalidBatchSize { .. }) => "InvalidBatchSize",

            Self::Transfer(TransferError::TransferFailed { .. }) => "TransferFailed",
            Self::Transfer(TransferError::TransferRefused { .. }) => "TransferRefused",
            Self::Transfer(TransferError::TransferNotAuthorized { .. }) => {
                "TransferNotAuthorized"
            }
            Self::Transfer(TransferError::TransferIncomplete { .. }) => "TransferIncomplete",
            Self::Transfer(TransferError::TransferTimeout { .. }) => "TransferTimeout",

            Self::AuthConfig(AuthConfigError::InvalidKeyName { .. }) => "InvalidKeyName",
            Self::AuthConfig(AuthConfigError::InvalidSecret { .. }) => "InvalidSecret",
            Self::AuthConfig(AuthConfigError::UnsupportedAlgorithm { .. }) => {
                "UnsupportedAlgorithm"
            }
            Self::AuthConfig(AuthConfigError::SigningFailed { .. }) => "SigningFailed",

            Self::Send(SendError::Transport { .. }) => "TransportError",
            Self::Send(SendError::Timeout { .. }) => "SendTimeout",
            Self::Send(SendError::Rejected { .. }) => "UpdateRejected",
        }
    }

    /// Returns true when re-running the whole reconciliation may succeed without
    /// operator intervention (network trouble, unknown transaction fate).
    ///
    /// Nothing is retried automatically; this only informs the summary.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transfer(
                TransferError::TransferFailed { .. }
                | TransferError::TransferIncomplete { .. }
                | TransferError::TransferTimeout { .. },
            )
            | Self::Send(SendError::Transport { .. } | SendError::Timeout { .. }) => true,

            Self::Config(_)
            | Self::Transfer(
                TransferError::TransferRefused { .. }
                | TransferError::TransferNotAuthorized { .. },
            )
            | Self::AuthConfig(_)
            | Self::Send(SendError::Rejected { .. }) => false,
        }
    }

    /// Index of the first failing batch, for transmission errors.
    #[must_use]
    pub fn failed_batch(&self) -> Option<usize> {
        match self {
            Self::Send(e) => Some(e.batch_index()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
