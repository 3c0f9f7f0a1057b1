// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # zonesync - declarative DNS zone reconciliation
//!
//! zonesync converges an authoritative DNS zone to a declared record set using
//! full zone transfers (AXFR) to read the live zone and TSIG-signed dynamic
//! updates (RFC 2136) to change it.
//!
//! ## Overview
//!
//! A run goes through these stages for every configured zone:
//!
//! 1. [`config`] loads the desired records and builds a [`records::DesiredState`]
//! 2. [`snapshot`] fetches the live zone into a [`snapshot::ZoneSnapshot`]
//! 3. [`diff`] computes the additions and removals that converge the zone
//! 4. [`batch`] splits the diff into bounded transactions, never splitting a
//!    replacement pair
//! 5. [`tsig`] encodes and signs each batch as one update message
//! 6. [`transmit`] sends the transactions one at a time and waits for each answer
//!
//! [`controller`] ties the stages together and offers the `check` and `insert`
//! modes. Diffing is idempotent: re-running after any failure is always safe.
//!
//! ## Example
//!
//! ```rust,no_run
//! use zonesync::config::Config;
//! use zonesync::controller::{run, Mode, RunOptions};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(Path::new("records.yml"))?;
//! let report = run(&config, &RunOptions::new(Mode::Check)).await?;
//! for summary in report.summaries() {
//!     println!("{summary}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod constants;
pub mod controller;
pub mod diff;
pub mod errors;
pub mod records;
pub mod snapshot;
pub mod transmit;
pub mod transport;
pub mod tsig;
