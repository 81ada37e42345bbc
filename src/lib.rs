pub mod error;
pub mod utils;
pub mod stats;
pub mod models;
pub mod db;
pub mod pipeline;
pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use db::ledger::LedgerSet;
use utils::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub started_at: std::time::Instant,
    pub config: Arc<Config>,
    pub registry_path: PathBuf,
    pub ledgers: LedgerSet,
    pub stats: Arc<stats::CaptureStats>,
}

impl AppState {
    /// `ledgers` should be the same set handed to the capture loop when both
    /// run in one process, so overrides and captures share write locks.
    pub fn new(config: Config, ledgers: LedgerSet, stats: Arc<stats::CaptureStats>) -> Self {
        Self {
            started_at: std::time::Instant::now(),
            registry_path: config.registry_path(),
            config: Arc::new(config),
            ledgers,
            stats,
        }
    }
}
