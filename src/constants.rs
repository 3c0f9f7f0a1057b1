// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for zonesync.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// DNS Protocol Constants
// ============================================================================

/// Standard DNS port for zone transfers and dynamic updates
pub const DNS_PORT: u16 = 53;

/// Largest DNS message that fits behind the two-byte TCP length prefix
pub const MAX_TCP_MESSAGE_SIZE: usize = 65_535;

/// TSIG fudge time in seconds (allows for clock skew)
pub const TSIG_FUDGE_TIME_SECS: u16 = 300;

/// Owner name that designates the zone apex in configuration files
pub const APEX_LABEL: &str = "@";

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "records.yml";

/// Default TTL for records when neither the name nor the zone sets one (1 hour)
pub const DEFAULT_RECORD_TTL_SECS: u32 = 3600;

/// Default network timeout for transfers and updates
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Owner names (relative to the zone) that are never reconciled unless configured otherwise
pub const DEFAULT_IGNORE_NAMES: &[&str] = &["ns"];

// ============================================================================
// Environment Variables
// ============================================================================

/// Newline-separated list of servers appended to the configured ones
pub const ENV_DNS_SERVERS: &str = "DNS_SERVERS";

/// TSIG key name override
pub const ENV_TSIG_NAME: &str = "TSIG_NAME";

/// TSIG algorithm override
pub const ENV_TSIG_ALGORITHM: &str = "TSIG_ALGORITHM";

/// TSIG secret override (base64)
pub const ENV_TSIG_SECRET: &str = "TSIG_SECRET";

/// Log output format selector (`json` or `text`)
pub const ENV_LOG_FORMAT: &str = "RUST_LOG_FORMAT";

// ============================================================================
// Exit Codes
// ============================================================================

/// Desired state is malformed or contradictory
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Zone transfer failed or was incomplete
pub const EXIT_TRANSFER_ERROR: i32 = 3;

/// Network operation exceeded the configured timeout
pub const EXIT_TIMEOUT_ERROR: i32 = 4;

/// TSIG key material is unusable
pub const EXIT_AUTH_CONFIG_ERROR: i32 = 5;

/// Connection refused, reset or otherwise broken while sending
pub const EXIT_TRANSPORT_ERROR: i32 = 6;

/// Server answered an update with a non-success response code
pub const EXIT_REJECTED_ERROR: i32 = 7;

/// Server rejected the transaction signature of a zone transfer request
pub const EXIT_NOT_AUTHORIZED_ERROR: i32 = 8;
