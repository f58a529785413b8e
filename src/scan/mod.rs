#![forbid(unsafe_code)]

pub mod api;
pub mod model;
pub mod poller;
pub mod render;
pub mod store;
pub mod validate;

use crate::config::Config;

/// Store handle configured from `[store]`.
pub fn open_store(cfg: &Config) -> anyhow::Result<store::TaskStore> {
    let path = crate::config::expand_path(&cfg.store.path)?;
    Ok(store::TaskStore::new(path)
        .with_max_tasks(cfg.store.max_tasks)
        .with_quota(cfg.store.quota_bytes))
}
