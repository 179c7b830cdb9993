// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Channel Catalog
//!
//! A channel is the unit of mutual exclusion for path locks. Each
//! [`ChannelConfig`] row declares whether a station-to-station hop needs a
//! lock; [`ChannelCatalog`] resolves those rows into channels:
//!
//! - an ungrouped, non-directional hop uses one key for both travel
//!   directions (`S005<->S006`) so head-on traffic contends for the same lock
//! - an ungrouped, directional hop is keyed per direction (`S005->S006`)
//! - rows sharing a `group` collapse into a single named channel
//!
//! Inactive rows and rows with `lock_required: false` contribute nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Default lock lease when a row does not specify one.
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a single hop. Non-directional hops are normalised so that both
    /// travel directions map to the same key.
    pub fn for_segment(from: &str, to: &str, directional: bool) -> Self {
        if directional {
            Self(format!("{from}->{to}"))
        } else if from <= to {
            Self(format!("{from}<->{to}"))
        } else {
            Self(format!("{to}<->{from}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How concurrent holders of one channel are arbitrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSharing {
    /// At most one approved holder at a time.
    #[default]
    Exclusive,
    /// Several holders travelling with the same heading; opposite headings conflict.
    SameDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub from_station: String,
    pub to_station: String,
    #[serde(default = "default_true")]
    pub lock_required: bool,
    /// Lease length; the catalog default applies when absent.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub directional: bool,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub sharing: ChannelSharing,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ChannelConfig {
    pub fn new(from_station: impl Into<String>, to_station: impl Into<String>) -> Self {
        Self {
            from_station: from_station.into(),
            to_station: to_station.into(),
            lock_required: true,
            timeout_minutes: None,
            priority: None,
            active: true,
            directional: false,
            group: None,
            sharing: ChannelSharing::Exclusive,
            reason: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn directional(mut self) -> Self {
        self.directional = true;
        self
    }

    pub fn with_sharing(mut self, sharing: ChannelSharing) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    pub fn channel_key(&self) -> ChannelKey {
        match &self.group {
            Some(group) => ChannelKey::new(group.clone()),
            None => ChannelKey::for_segment(&self.from_station, &self.to_station, self.directional),
        }
    }
}

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub key: ChannelKey,
    pub timeout_minutes: u32,
    pub priority: Option<i32>,
    pub directional: bool,
    pub sharing: ChannelSharing,
    pub segments: Vec<(String, String)>,
    pub reason: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("hop {from}->{to} is claimed by channels '{existing}' and '{conflicting}'")]
    ConflictingHop {
        from: String,
        to: String,
        existing: ChannelKey,
        conflicting: ChannelKey,
    },

    #[error("channel group '{0}' mixes directional or sharing settings")]
    InconsistentGroup(ChannelKey),

    #[error("channel config {from}->{to} has a zero timeout")]
    ZeroTimeout { from: String, to: String },

    #[error("hop {from}->{to} references channel '{key}', which is not in the catalog")]
    MissingChannel { from: String, to: String, key: ChannelKey },
}

#[derive(Debug, Clone, Default)]
pub struct ChannelCatalog {
    hops: HashMap<(String, String), ChannelKey>,
    channels: BTreeMap<ChannelKey, Channel>,
}

impl ChannelCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[ChannelConfig]) -> Result<Self, CatalogError> {
        Self::from_configs_with_default(configs, DEFAULT_TIMEOUT_MINUTES)
    }

    pub fn from_configs_with_default(
        configs: &[ChannelConfig],
        default_timeout_minutes: u32,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();

        for config in configs.iter().filter(|c| c.active && c.lock_required) {
            let timeout_minutes = config.timeout_minutes.unwrap_or(default_timeout_minutes);
            if timeout_minutes == 0 {
                return Err(CatalogError::ZeroTimeout {
                    from: config.from_station.clone(),
                    to: config.to_station.clone(),
                });
            }

            let key = config.channel_key();
            catalog.register_hop(&config.from_station, &config.to_station, &key)?;
            if !config.directional {
                catalog.register_hop(&config.to_station, &config.from_station, &key)?;
            }

            match catalog.channels.get_mut(&key) {
                Some(channel) => {
                    if channel.directional != config.directional || channel.sharing != config.sharing {
                        return Err(CatalogError::InconsistentGroup(key));
                    }
                    channel.timeout_minutes = channel.timeout_minutes.max(timeout_minutes);
                    channel.priority = match (channel.priority, config.priority) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    channel
                        .segments
                        .push((config.from_station.clone(), config.to_station.clone()));
                    if channel.reason.is_none() {
                        channel.reason = config.reason.clone();
                    }
                }
                None => {
                    catalog.channels.insert(
                        key.clone(),
                        Channel {
                            key,
                            timeout_minutes,
                            priority: config.priority,
                            directional: config.directional,
                            sharing: config.sharing,
                            segments: vec![(config.from_station.clone(), config.to_station.clone())],
                            reason: config.reason.clone(),
                        },
                    );
                }
            }
        }

        Ok(catalog)
    }

    fn register_hop(&mut self, from: &str, to: &str, key: &ChannelKey) -> Result<(), CatalogError> {
        let hop = (from.to_string(), to.to_string());
        match self.hops.get(&hop) {
            Some(existing) if existing != key => Err(CatalogError::ConflictingHop {
                from: hop.0,
                to: hop.1,
                existing: existing.clone(),
                conflicting: key.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.hops.insert(hop, key.clone());
                Ok(())
            }
        }
    }

    /// The lock-protected channel covering a directed hop. `Ok(None)` means
    /// the hop needs no lock; a hop bound to a key with no channel is an error.
    pub fn channel_for_hop(&self, from: &str, to: &str) -> Result<Option<&Channel>, CatalogError> {
        let Some(key) = self.hops.get(&(from.to_string(), to.to_string())) else {
            return Ok(None);
        };
        self.channels
            .get(key)
            .map(Some)
            .ok_or_else(|| CatalogError::MissingChannel {
                from: from.to_string(),
                to: to.to_string(),
                key: key.clone(),
            })
    }

    /// Drop a channel while leaving its hops bound.
    #[cfg(test)]
    pub(crate) fn remove_channel_only(&mut self, key: &ChannelKey) {
        self.channels.remove(key);
    }

    pub fn channel(&self, key: &ChannelKey) -> Option<&Channel> {
        self.channels.get(key)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_directional_hop_shares_key_both_ways() {
        let catalog = ChannelCatalog::from_configs(&[ChannelConfig::new("S005", "S006")]).unwrap();

        let forward = catalog.channel_for_hop("S005", "S006").unwrap().unwrap();
        let reverse = catalog.channel_for_hop("S006", "S005").unwrap().unwrap();
        assert_eq!(forward.key, reverse.key);
        assert_eq!(forward.key.as_str(), "S005<->S006");
    }

    #[test]
    fn test_directional_hop_is_keyed_per_direction() {
        let catalog =
            ChannelCatalog::from_configs(&[ChannelConfig::new("S005", "S006").directional()]).unwrap();

        assert!(catalog.channel_for_hop("S005", "S006").unwrap().is_some());
        assert!(catalog.channel_for_hop("S006", "S005").unwrap().is_none());
    }

    #[test]
    fn test_grouped_hops_collapse_into_one_channel() {
        let catalog = ChannelCatalog::from_configs(&[
            ChannelConfig::new("S401", "S402").in_group("workshop-north").with_timeout_minutes(5),
            ChannelConfig::new("S402", "S403").in_group("workshop-north").with_timeout_minutes(15),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 1);
        let channel = catalog.channel_for_hop("S403", "S402").unwrap().unwrap();
        assert_eq!(channel.key.as_str(), "workshop-north");
        assert_eq!(channel.timeout_minutes, 15);
        assert_eq!(channel.segments.len(), 2);
    }

    #[test]
    fn test_missing_timeout_uses_catalog_default() {
        let catalog =
            ChannelCatalog::from_configs_with_default(&[ChannelConfig::new("S001", "S002")], 4).unwrap();
        assert_eq!(catalog.channel_for_hop("S001", "S002").unwrap().unwrap().timeout_minutes, 4);

        let err = ChannelCatalog::from_configs_with_default(&[ChannelConfig::new("S001", "S002")], 0)
            .unwrap_err();
        assert!(matches!(err, CatalogError::ZeroTimeout { .. }));
    }

    #[test]
    fn test_inactive_and_unlocked_rows_are_ignored() {
        let mut inactive = ChannelConfig::new("S001", "S002");
        inactive.active = false;
        let mut unlocked = ChannelConfig::new("S002", "S003");
        unlocked.lock_required = false;

        let catalog = ChannelCatalog::from_configs(&[inactive, unlocked]).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.channel_for_hop("S001", "S002").unwrap().is_none());
    }

    #[test]
    fn test_group_with_mixed_sharing_is_rejected() {
        let err = ChannelCatalog::from_configs(&[
            ChannelConfig::new("S401", "S402").in_group("corridor"),
            ChannelConfig::new("S402", "S403")
                .in_group("corridor")
                .with_sharing(ChannelSharing::SameDirection),
        ])
        .unwrap_err();

        assert_eq!(err, CatalogError::InconsistentGroup(ChannelKey::new("corridor")));
    }

    #[test]
    fn test_hop_claimed_by_two_channels_is_rejected() {
        let err = ChannelCatalog::from_configs(&[
            ChannelConfig::new("S001", "S002").in_group("a"),
            ChannelConfig::new("S001", "S002").in_group("b"),
        ])
        .unwrap_err();

        assert!(matches!(err, CatalogError::ConflictingHop { .. }));
    }

    #[test]
    fn test_hop_bound_to_missing_channel_is_an_error() {
        let mut catalog = ChannelCatalog::from_configs(&[ChannelConfig::new("S005", "S006")]).unwrap();
        let key = catalog.channel_for_hop("S005", "S006").unwrap().unwrap().key.clone();
        catalog.remove_channel_only(&key);

        let err = catalog.channel_for_hop("S005", "S006").unwrap_err();
        assert!(matches!(err, CatalogError::MissingChannel { .. }));
        assert!(catalog.channel_for_hop("S001", "S002").unwrap().is_none());
    }
}
