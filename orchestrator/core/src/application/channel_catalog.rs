// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cached channel catalog shared by the route planner and the lock manager.
//!
//! Channel rows change rarely, so they are resolved once into an immutable
//! [`ChannelCatalog`] snapshot. `reload` swaps in a new snapshot atomically;
//! readers holding the previous `Arc` keep a consistent view.

use crate::domain::channel::ChannelCatalog;
use crate::domain::errors::DispatchError;
use crate::domain::repository::ChannelConfigRepository;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

pub struct ChannelCatalogStore {
    repository: Arc<dyn ChannelConfigRepository>,
    default_timeout_minutes: u32,
    snapshot: RwLock<Arc<ChannelCatalog>>,
}

impl ChannelCatalogStore {
    /// Create the store and load the first snapshot
    pub async fn load(
        repository: Arc<dyn ChannelConfigRepository>,
        default_timeout_minutes: u32,
    ) -> Result<Self, DispatchError> {
        let store = Self {
            repository,
            default_timeout_minutes,
            snapshot: RwLock::new(Arc::new(ChannelCatalog::empty())),
        };
        store.reload().await?;
        Ok(store)
    }

    /// Rebuild the snapshot from the repository. On error the previous
    /// snapshot stays in place.
    pub async fn reload(&self) -> Result<usize, DispatchError> {
        let configs = self.repository.list_all().await?;
        let catalog = ChannelCatalog::from_configs_with_default(&configs, self.default_timeout_minutes)?;
        let channel_count = catalog.len();
        *self.snapshot.write() = Arc::new(catalog);
        info!(channel_count, rows = configs.len(), "Channel catalog loaded");
        Ok(channel_count)
    }

    pub fn snapshot(&self) -> Arc<ChannelCatalog> {
        self.snapshot.read().clone()
    }
}
