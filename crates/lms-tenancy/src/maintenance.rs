//! Background cleanup
//!
//! Purges expired cache entries, ended rate windows and audit records past
//! retention. Every delete is scoped by an expiry or age predicate, so a run
//! can overlap live traffic or another run without harm.

use crate::audit::ExecutionContext;
use crate::config::MaintenanceConfig;
use crate::Governance;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What one maintenance pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub cache_entries: usize,
    pub rate_windows: usize,
    pub audit_records: usize,
}

/// Periodic cleanup task
pub struct MaintenanceTask {
    gov: Governance,
    interval: Duration,
}

impl MaintenanceTask {
    pub fn new(gov: Governance, config: &MaintenanceConfig) -> Self {
        Self {
            gov,
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    /// Run a single pass
    pub async fn run_once(&self) -> MaintenanceReport {
        let cache_entries = self.gov.cache.sweep_expired().await;
        let rate_windows = self.gov.limiter.purge_stale().await;

        let audit_records = match self
            .gov
            .audit
            .purge_older_than(&ExecutionContext::System, self.gov.audit.retention())
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                error!(error = %e, "Audit retention purge failed");
                0
            }
        };

        let report = MaintenanceReport {
            cache_entries,
            rate_windows,
            audit_records,
        };
        debug!(?report, "Maintenance pass complete");
        report
    }

    /// Run forever on a fixed interval
    pub fn spawn(self) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "Starting maintenance task");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}
