// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mode controller.
//!
//! Drives the pipeline for each configured zone:
//!
//! ```text
//! desired state -> snapshot -> diff -> batches -> sign -> transmit
//! ```
//!
//! [`Mode::Check`] stops after planning: nothing is sent, so the zone is never
//! modified. [`Mode::Apply`] sends the batches one at a time and stops the zone at
//! the first failing batch. Zones are processed sequentially, each with its own
//! snapshot and connections.

use hickory_client::rr::Name;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::batch::{plan_batches, BatchSize};
use crate::config::Config;
use crate::diff::compute_diff;
use crate::errors::{ConfigError, ReconcileError};
use crate::records::{normalize_name, DesiredState};
use crate::snapshot::fetch_snapshot_from_any;
use crate::transmit::Transmitter;
use crate::tsig::{sign, Authenticator};

/// What a run does once the diff is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Validate, fetch and diff; never transmit
    Check,
    /// Transmit the planned batches
    #[serde(rename = "insert")]
    Apply,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check => f.write_str("check"),
            Self::Apply => f.write_str("insert"),
        }
    }
}

/// Options for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Check or apply
    pub mode: Mode,
    /// Maximum operations per transaction
    pub batch_size: BatchSize,
    /// Restrict the run to this zone
    pub zone: Option<String>,
    /// Stop after the first failing zone
    pub exit_error: bool,
}

impl RunOptions {
    /// Options for `mode` with every other setting at its default.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            batch_size: BatchSize::Unbounded,
            zone: None,
            exit_error: false,
        }
    }
}

/// Everything that is fixed for a run: where to send, how long to wait, how to sign.
#[derive(Debug)]
pub struct Reconciler {
    servers: Vec<String>,
    timeout: Duration,
    authenticator: Option<Authenticator>,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(servers: Vec<String>, timeout: Duration, authenticator: Option<Authenticator>) -> Self {
        Self {
            servers,
            timeout,
            authenticator,
        }
    }

    /// Build a reconciler from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::AuthConfig`] if the key material is unusable.
    pub fn from_config(config: &Config) -> Result<Self, ReconcileError> {
        let authenticator = config.tsig.as_ref().map(Authenticator::new).transpose()?;
        Ok(Self::new(
            config.servers.clone(),
            config.timeout(),
            authenticator,
        ))
    }

    /// Reconcile one zone in the given mode.
    ///
    /// Never returns early with an error: the outcome, including any failure and
    /// the number of acknowledged batches, is recorded in the report.
    pub async fn reconcile_zone(
        &self,
        desired: &DesiredState,
        mode: Mode,
        batch_size: BatchSize,
    ) -> ZoneReport {
        let mut report = ZoneReport::new(desired.zone().to_string(), mode);
        if let Err(e) = self.run_zone(desired, mode, batch_size, &mut report).await {
            error!(
                zone = %report.zone,
                stage = e.stage(),
                reason = e.reason(),
                batches_acknowledged = report.batches_acknowledged,
                error = %e,
                "Zone reconciliation failed"
            );
            report.error = Some(e);
        }
        report
    }

    async fn run_zone(
        &self,
        desired: &DesiredState,
        mode: Mode,
        batch_size: BatchSize,
        report: &mut ZoneReport,
    ) -> Result<(), ReconcileError> {
        let zone = desired.zone();
        let (snapshot, server) = fetch_snapshot_from_any(
            desired.reserved(),
            &self.servers,
            self.timeout,
            self.authenticator.as_ref(),
        )
        .await?;
        report.server = Some(server);
        report.serial = Some(snapshot.serial());

        let diff = compute_diff(&snapshot, desired);
        let batches = plan_batches(&diff, batch_size);
        report.operations = diff.len();
        report.additions = diff.additions();
        report.removals = diff.removals();
        report.batches = batches.len();

        info!(
            zone = %zone,
            mode = %mode,
            live = snapshot.len(),
            desired = desired.len(),
            operations = diff.len(),
            batches = batches.len(),
            batch_size = %batch_size,
            "Planned reconciliation"
        );

        if mode == Mode::Check {
            for operation in diff.operations() {
                info!(zone = %zone, change = %operation, "Pending change");
            }
            return Ok(());
        }

        let transmitter = Transmitter::new(self.servers.clone(), self.timeout);
        for batch in &batches {
            let mut transaction = sign(batch, zone, self.authenticator.as_ref())?;
            transmitter.send(&mut transaction).await?;
            report.batches_acknowledged += 1;
        }

        if !diff.is_empty() {
            info!(
                zone = %zone,
                operations = diff.len(),
                batches = report.batches_acknowledged,
                "Zone converged"
            );
        }
        Ok(())
    }
}

/// Outcome of one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneReport {
    /// Zone apex
    pub zone: String,
    /// Mode the zone ran in
    pub mode: Mode,
    /// Server the snapshot came from
    pub server: Option<String>,
    /// SOA serial of the snapshot
    pub serial: Option<u32>,
    /// Operations in the diff
    pub operations: usize,
    /// Additions in the diff
    pub additions: usize,
    /// Removals in the diff
    pub removals: usize,
    /// Planned batches
    pub batches: usize,
    /// Batches the server acknowledged
    pub batches_acknowledged: usize,
    /// Failure, if any
    pub error: Option<ReconcileError>,
}

impl ZoneReport {
    fn new(zone: String, mode: Mode) -> Self {
        Self {
            zone,
            mode,
            server: None,
            serial: None,
            operations: 0,
            additions: 0,
            removals: 0,
            batches: 0,
            batches_acknowledged: 0,
            error: None,
        }
    }

    /// Returns true if the zone completed without error
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Exit status contribution of this zone (0 on success)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, ReconcileError::exit_code)
    }

    /// Serializable summary
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            zone: self.zone.clone(),
            mode: self.mode,
            server: self.server.clone(),
            serial: self.serial,
            operations: self.operations,
            additions: self.additions,
            removals: self.removals,
            batches: self.batches,
            batches_acknowledged: (self.mode == Mode::Apply).then_some(self.batches_acknowledged),
            success: self.is_success(),
            stage: self.error.as_ref().map(ReconcileError::stage),
            reason: self.error.as_ref().map(ReconcileError::reason),
            failed_batch: self.error.as_ref().and_then(ReconcileError::failed_batch),
            transient: self.error.as_ref().map(ReconcileError::is_transient),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Per-zone summary printed at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Zone apex
    pub zone: String,
    /// Mode the zone ran in
    pub mode: Mode,
    /// Server the snapshot came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// SOA serial of the snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,
    /// Operations in the diff
    pub operations: usize,
    /// Additions in the diff
    pub additions: usize,
    /// Removals in the diff
    pub removals: usize,
    /// Planned batches
    pub batches: usize,
    /// Acknowledged batches (insert mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batches_acknowledged: Option<usize>,
    /// Whether the zone completed
    pub success: bool,
    /// Failing stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    /// Failure reason code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Index of the first failing batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_batch: Option<usize>,
    /// Whether a full re-run may succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} operations ({} additions, {} removals) in {} batches",
            self.zone, self.mode, self.operations, self.additions, self.removals, self.batches
        )?;
        if let Some(acknowledged) = self.batches_acknowledged {
            write!(f, ", {acknowledged} acknowledged")?;
        }
        if let Some(error) = &self.error {
            write!(f, "; failed at {}", self.stage.unwrap_or("unknown"))?;
            if let Some(batch) = self.failed_batch {
                write!(f, " (batch {batch})")?;
            }
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// One report per processed zone, in processing order
    pub zones: Vec<ZoneReport>,
}

impl RunReport {
    /// Exit status of the first failing zone, or 0.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.zones
            .iter()
            .map(ZoneReport::exit_code)
            .find(|code| *code != 0)
            .unwrap_or(0)
    }

    /// Summaries of every processed zone
    #[must_use]
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.zones.iter().map(ZoneReport::summary).collect()
    }
}

/// Select the zones a run covers.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if `filter` names a zone that is not configured.
pub fn select_zones(
    desired: Vec<DesiredState>,
    filter: Option<&str>,
) -> Result<Vec<DesiredState>, ConfigError> {
    let Some(filter) = filter else {
        return Ok(desired);
    };
    let wanted = Name::from_str(filter)
        .map(|name| normalize_name(&name))
        .map_err(|e| ConfigError::Invalid {
            reason: format!("zone '{filter}' is not a valid domain name: {e}"),
        })?;
    let selected: Vec<DesiredState> = desired
        .into_iter()
        .filter(|state| *state.zone() == wanted)
        .collect();
    if selected.is_empty() {
        return Err(ConfigError::Invalid {
            reason: format!("zone '{filter}' is not configured"),
        });
    }
    Ok(selected)
}

/// Run every selected zone of a validated configuration.
///
/// # Errors
///
/// Returns [`ReconcileError`] for failures that affect every zone: invalid
/// desired state, unknown zone filter, or unusable key material. Per-zone
/// failures are reported in the [`RunReport`].
pub async fn run(config: &Config, options: &RunOptions) -> Result<RunReport, ReconcileError> {
    let desired = select_zones(config.desired_states()?, options.zone.as_deref())?;
    let reconciler = Reconciler::from_config(config)?;
    if reconciler.authenticator.is_none() {
        warn!("No TSIG key configured, transactions will be unsigned");
    }

    let mut report = RunReport::default();
    for state in &desired {
        info!(zone = %state.zone(), mode = %options.mode, "Reconciling zone");
        let zone_report = reconciler
            .reconcile_zone(state, options.mode, options.batch_size)
            .await;
        let failed = !zone_report.is_success();
        report.zones.push(zone_report);
        if failed && options.exit_error {
            warn!("Stopping after the first failing zone");
            break;
        }
    }
    Ok(report)
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
