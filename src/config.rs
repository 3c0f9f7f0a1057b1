// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired-state configuration.
//!
//! The configuration is a YAML document listing the servers to talk to, an
//! optional TSIG key and, per zone, the records each owner name should carry:
//!
//! ```yaml
//! servers: ["192.0.2.53"]
//! tsig:
//!   name: admin-tsig-key.example.com
//!   algorithm: hmac-sha256
//!   secret: "bTueCg5wgjWkFsoX6n+p8WWUg5/tfyoBQEhnAjNx7RI="
//! zones:
//!   example.com:
//!     ttl: 3600
//!     records:
//!       www:
//!         host: [192.0.2.1, "2001:db8::1"]
//!       alias:
//!         cname: www
//! ```
//!
//! Unknown keys are rejected. Environment variables can add servers and supply
//! key material so that secrets stay out of the file (see [`Config::apply_env`]).
//!
//! Owner names are relative to their zone. Targets (CNAME, MX exchange, SRV
//! target) are always absolute: `mx1.example.net` means `mx1.example.net.`.

use hickory_client::rr::Name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::constants::{
    APEX_LABEL, DEFAULT_IGNORE_NAMES, DEFAULT_RECORD_TTL_SECS, DEFAULT_TIMEOUT_SECS,
    ENV_DNS_SERVERS, ENV_TSIG_ALGORITHM, ENV_TSIG_NAME, ENV_TSIG_SECRET,
};
use crate::errors::ConfigError;
use crate::records::{absolute, qualify, DesiredState, RecordData, ReservedNames, ResourceRecord};
use crate::tsig::TsigKey;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Servers tried in order, as `host` or `host:port`
    #[serde(default)]
    pub servers: Vec<String>,

    /// Network timeout in seconds for each transfer and each transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Key used to sign transactions; unsigned when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsig: Option<TsigKey>,

    /// Owner names (relative to each zone) never reconciled, besides the apex.
    /// Defaults to `["ns"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_names: Option<Vec<String>>,

    /// Zones by name
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneConfig>,
}

/// Records of one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    /// Default ttl for records in this zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Records by owner name, relative to the zone
    #[serde(default)]
    pub records: BTreeMap<String, RecordConfig>,
}

/// Records at one owner name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordConfig {
    /// Ttl for every record at this name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Addresses; IPv4 become A records, IPv6 become AAAA records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<IpAddr>,

    /// TXT records, each a string or a list of strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub txt: Vec<TxtConfig>,

    /// Mail exchangers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mx: Vec<MxConfig>,

    /// Service locators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub srv: Vec<SrvConfig>,

    /// Alias target; excludes every other type at this name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
}

/// One TXT record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxtConfig {
    /// A single character string
    Single(String),
    /// Several character strings, kept in order
    Strings(Vec<String>),
}

impl TxtConfig {
    fn strings(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Strings(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

/// One MX record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MxConfig {
    /// Preference (lower is preferred)
    pub preference: u16,
    /// Mail exchanger host
    pub mx: String,
}

/// One SRV record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SrvConfig {
    /// Priority (lower is tried first)
    pub priority: u16,
    /// Relative weight
    pub weight: u16,
    /// Service port
    pub port: u16,
    /// Target host
    pub target: String,
}

impl Config {
    /// Read, parse, apply environment overrides and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path_display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path_display.clone(),
            reason: e.to_string(),
        })?;

        let mut config = Self::parse(&contents, &path_display)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        debug!(
            path = %path_display,
            servers = config.servers.len(),
            zones = config.zones.len(),
            signed = config.tsig.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse a YAML document without validating it. An empty document is an
    /// empty configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] on syntax errors or unknown keys.
    pub fn parse(yaml: &str, source: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Malformed {
            path: source.to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// - `DNS_SERVERS`: newline-separated servers appended to `servers`
    /// - `TSIG_NAME`: creates or renames the key
    /// - `TSIG_ALGORITHM`, `TSIG_SECRET`: override the key's fields
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(servers) = lookup(ENV_DNS_SERVERS) {
            self.servers.extend(
                servers
                    .lines()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string),
            );
        }

        if let Some(name) = lookup(ENV_TSIG_NAME).filter(|n| !n.is_empty()) {
            let key = self.tsig.get_or_insert_with(|| TsigKey {
                name: String::new(),
                algorithm: crate::tsig::TsigAlgorithmName::HmacSha256.as_str().to_string(),
                secret: String::new(),
            });
            key.name = name;
        }
        if let Some(key) = self.tsig.as_mut() {
            if let Some(algorithm) = lookup(ENV_TSIG_ALGORITHM).filter(|a| !a.is_empty()) {
                key.algorithm = algorithm;
            }
            if let Some(secret) = lookup(ENV_TSIG_SECRET).filter(|s| !s.is_empty()) {
                key.secret = secret;
            }
        }
    }

    /// Check the configuration and every record in it.
    ///
    /// Key material is only checked for presence here; its format is checked
    /// when the signer is built.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "servers must not be empty".to_string(),
            });
        }
        if self.zones.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "zones must not be empty".to_string(),
            });
        }
        if self.timeout == Some(0) {
            return Err(ConfigError::Invalid {
                reason: "timeout must be at least one second".to_string(),
            });
        }
        if let Some(key) = &self.tsig {
            if key.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "tsig name must not be empty".to_string(),
                });
            }
            if key.secret.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("tsig secret for key '{}' must not be empty", key.name),
                });
            }
        }
        self.desired_states().map(|_| ())
    }

    /// Network timeout for transfers and transactions
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Owner names reserved in every zone besides the apex
    #[must_use]
    pub fn ignore_names(&self) -> Vec<String> {
        self.ignore_names.clone().unwrap_or_else(|| {
            DEFAULT_IGNORE_NAMES
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }

    /// Build the desired state of every zone, in zone name order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in any zone.
    pub fn desired_states(&self) -> Result<Vec<DesiredState>, ConfigError> {
        let ignore = self.ignore_names();
        self.zones
            .iter()
            .map(|(name, zone)| zone.desired_state(name, &ignore))
            .collect()
    }
}

impl ZoneConfig {
    /// Build the desired state for this zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the zone name is invalid, the zone has no
    /// records, or any record is invalid.
    pub fn desired_state(
        &self,
        zone_name: &str,
        ignore_names: &[String],
    ) -> Result<DesiredState, ConfigError> {
        let apex = Name::from_str(zone_name)
            .map(|mut name| {
                name.set_fqdn(true);
                name
            })
            .map_err(|e| ConfigError::Invalid {
                reason: format!("zone name '{zone_name}' is not a valid domain name: {e}"),
            })?;
        if self.records.is_empty() {
            return Err(ConfigError::Invalid {
                reason: format!("zone '{zone_name}' has no records"),
            });
        }

        let reserved = ReservedNames::new(&apex, ignore_names)?;
        let zone_ttl = self.ttl.unwrap_or(DEFAULT_RECORD_TTL_SECS);
        let mut desired = DesiredState::new(reserved);

        for (name, record) in &self.records {
            let invalid = |reason: String| ConfigError::InvalidRecord {
                zone: zone_name.to_string(),
                name: name.clone(),
                reason,
            };
            if name == APEX_LABEL {
                return Err(ConfigError::ReservedName {
                    zone: zone_name.to_string(),
                    name: name.clone(),
                });
            }
            let owner = qualify(name, &apex).map_err(|e| invalid(e.to_string()))?;
            let ttl = record.ttl.unwrap_or(zone_ttl);

            for data in record.record_data().map_err(invalid)? {
                desired.insert(ResourceRecord::new(&owner, ttl, data))?;
            }
        }
        Ok(desired)
    }
}

impl RecordConfig {
    /// Number of record types configured at this name
    #[must_use]
    pub fn type_count(&self) -> usize {
        [
            self.host.iter().any(IpAddr::is_ipv4),
            self.host.iter().any(IpAddr::is_ipv6),
            !self.txt.is_empty(),
            !self.mx.is_empty(),
            !self.srv.is_empty(),
            self.cname.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// Convert into record data. Targets are absolute whether or not they end in a dot.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed entry.
    pub fn record_data(&self) -> Result<Vec<RecordData>, String> {
        let count = self.type_count();
        if count == 0 {
            return Err("must specify at least one record type".to_string());
        }
        if self.cname.is_some() && count > 1 {
            return Err("cannot have other records with CNAME".to_string());
        }

        let target = |value: &str, what: &str| -> Result<Name, String> {
            if value.trim().is_empty() {
                return Err(format!("{what} must not be empty"));
            }
            absolute(value.trim()).map_err(|e| e.to_string())
        };

        let mut data = Vec::new();
        for ip in &self.host {
            data.push(match ip {
                IpAddr::V4(v4) => RecordData::A(*v4),
                IpAddr::V6(v6) => RecordData::Aaaa(*v6),
            });
        }
        for txt in &self.txt {
            let strings = txt.strings();
            if strings.is_empty() {
                return Err("TXT must not be empty".to_string());
            }
            if let Some(long) = strings.iter().find(|s| s.len() > 255) {
                return Err(format!(
                    "TXT string of {} bytes exceeds the 255 byte limit",
                    long.len()
                ));
            }
            data.push(RecordData::txt(&strings));
        }
        for mx in &self.mx {
            data.push(RecordData::mx(mx.preference, &target(&mx.mx, "MX exchange")?));
        }
        for srv in &self.srv {
            data.push(RecordData::srv(
                srv.priority,
                srv.weight,
                srv.port,
                &target(&srv.target, "SRV target")?,
            ));
        }
        if let Some(cname) = &self.cname {
            data.push(RecordData::cname(&target(cname, "CNAME target")?));
        }
        Ok(data)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
