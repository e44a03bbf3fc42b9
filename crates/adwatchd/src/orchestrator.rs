//! The capture loop
//!
//! Owns the in-memory watermark for one domain. Each cycle re-reads the
//! range `uSNChanged >= watermark + 1`, persists what changed, and only
//! then advances the watermark, so a crash mid-cycle re-reads the same
//! range on the next pass. Re-reading is safe: identical re-observations
//! write nothing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use adwatch_directory::{Directory, EntryParser, Filter};
use adwatch_store::{create_snapshot, Snapshot, VersionStore, VersioningService};

/// Tunables for the capture loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sleep between cycles
    pub poll_interval: Duration,
    /// Deadline for one batch transaction
    pub batch_timeout: Duration,
    /// Watermark to resume from (the domain row's last committed USN)
    pub initial_watermark: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_timeout: Duration::from_secs(30),
            initial_watermark: 0,
        }
    }
}

/// Counters from one capture cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    /// Entries returned by the directory
    pub entries: usize,
    /// Entries that parsed into objects
    pub parsed: usize,
    /// Snapshots handed to the versioning service
    pub snapshots: usize,
    /// Watermark after the cycle committed
    pub watermark: i64,
}

/// Drives fetch, parse, snapshot, persist and watermark advancement.
pub struct Orchestrator {
    directory: Directory,
    parser: EntryParser,
    versioning: VersioningService,
    store: Arc<dyn VersionStore>,
    domain_id: Uuid,
    watermark: i64,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        directory: Directory,
        parser: EntryParser,
        versioning: VersioningService,
        store: Arc<dyn VersionStore>,
        domain_id: Uuid,
        config: OrchestratorConfig,
    ) -> Self {
        let watermark = config.initial_watermark;
        Self {
            directory,
            parser,
            versioning,
            store,
            domain_id,
            watermark,
            config,
        }
    }

    /// Current watermark.
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Run cycles until the shutdown channel fires.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            domain_id = %self.domain_id,
            watermark = self.watermark,
            "capture loop starting"
        );
        loop {
            match self.run_cycle().await {
                Ok(stats) => {
                    if stats.entries > 0 {
                        info!(
                            entries = stats.entries,
                            parsed = stats.parsed,
                            snapshots = stats.snapshots,
                            watermark = stats.watermark,
                            "cycle complete"
                        );
                    }
                }
                // The watermark was not advanced; the next tick re-reads
                // the same range.
                Err(e) => warn!(error = %e, "capture cycle failed"),
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("capture loop stopping");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// One capture cycle.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleStats> {
        let filter = Filter::and([
            Filter::or([
                Filter::eq("objectCategory", "*"),
                Filter::eq("isDeleted", "TRUE"),
            ]),
            Filter::ge("uSNChanged", self.watermark + 1),
        ])
        .to_string();

        let entries = self
            .directory
            .collect_changes(&filter)
            .await
            .context("change drain failed")?;

        let mut snapshots: Vec<Snapshot> = Vec::with_capacity(entries.len());
        let mut parsed = 0usize;
        for result in self.parser.parse_entries(&entries) {
            let object = match result {
                Ok(object) => object,
                Err(e) => {
                    warn!(error = %e, "dropping unparseable entry");
                    continue;
                }
            };
            parsed += 1;
            match create_snapshot(&object) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(error = %e, "dropping object without snapshot"),
            }
        }

        let snapshot_count = snapshots.len();
        timeout(
            self.config.batch_timeout,
            self.versioning.process_snapshots(&snapshots),
        )
        .await
        .map_err(|_| anyhow!("batch deadline exceeded, transaction abandoned"))?
        .context("batch persist failed")?;

        // Only a committed batch may move the watermark. The new value is
        // the controller's own high mark rather than the maximum USN seen
        // in this batch.
        let highest = self
            .directory
            .highest_committed_usn()
            .await
            .context("Root DSE read failed")?;
        self.watermark = highest;
        self.store
            .set_domain_usns(self.domain_id, highest, self.watermark)
            .await
            .context("domain watermark update failed")?;

        Ok(CycleStats {
            entries: entries.len(),
            parsed,
            snapshots: snapshot_count,
            watermark: self.watermark,
        })
    }
}
