pub mod dlq;
pub mod ingest;
pub mod integration;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use inquest_core::config::InquestConfig;
use inquest_core::queue::QueueDb;
use inquest_core::store::Store;

/// Open the configured store and queue databases.
pub fn open_databases(config_path: &Path) -> anyhow::Result<(InquestConfig, Arc<Store>, Arc<QueueDb>)> {
    let cfg = InquestConfig::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    if let Some(parent) = cfg.store_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = cfg.queue_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(Store::open(&cfg.store_path).context("opening store")?);
    let queue = Arc::new(QueueDb::open(&cfg.queue_path).context("opening queue")?);
    Ok((cfg, store, queue))
}
