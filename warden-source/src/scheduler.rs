//! # Sync Scheduler — Periodic, self-coalescing source-history worker
//!
//! A single long-lived task: a startup delay, an initial run, then a ticker.
//! At most one sync cycle runs at a time process-wide; if a cycle is still
//! going when the next tick fires, the tick is skipped with a warning. Per-
//! repository failures are caught and logged so one bad repo never stops the
//! rest of the cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use warden_core::store::StoreGateway;

use crate::monitor::SourceMonitor;

/// Delay before the first run, giving the store time to come online.
const STARTUP_DELAY_SECS: u64 = 10;

pub struct SyncScheduler {
    monitor: Arc<SourceMonitor>,
    store: Arc<dyn StoreGateway>,
    interval_min: u64,
    /// Cycle mutual exclusion; independent of the loop's alive flag.
    is_running: AtomicBool,
    active: Arc<AtomicBool>,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
}

impl SyncScheduler {
    pub fn new(monitor: Arc<SourceMonitor>, store: Arc<dyn StoreGateway>, interval_min: u64) -> Self {
        Self {
            monitor,
            store,
            interval_min: interval_min.clamp(1, 60),
            is_running: AtomicBool::new(false),
            active: Arc::new(AtomicBool::new(false)),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
        }
    }

    /// Spawn the scheduler loop.
    pub fn start(self: &Arc<Self>) {
        self.active.store(true, Ordering::Relaxed);
        let scheduler = self.clone();
        let active = self.active.clone();

        info!(interval_min = scheduler.interval_min, "Sync scheduler starting");
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(STARTUP_DELAY_SECS)).await;
            if active.load(Ordering::Relaxed) {
                scheduler.run_sync().await;
            }
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                scheduler.interval_min * 60,
            ));
            ticker.tick().await; // first tick completes immediately
            while active.load(Ordering::Relaxed) {
                ticker.tick().await;
                if !active.load(Ordering::Relaxed) {
                    break;
                }
                scheduler.run_sync().await;
            }
            info!("Sync scheduler stopped");
        });
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Run one cycle now, unless a cycle is already in flight. Returns
    /// whether the cycle ran.
    pub async fn run_sync(&self) -> bool {
        if !self.try_begin_cycle() {
            warn!("Sync cycle still running, skipping this tick");
            self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.cycle().await;
        self.end_cycle();
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn cycle(&self) {
        let records = self.store.list_registered_source_analyses();
        if records.is_empty() {
            return;
        }
        info!(repos = records.len(), "Sync cycle starting");

        // Sequential on purpose: the remote API rate limit is shared.
        let mut syncable = 0usize;
        for record in &records {
            match self.monitor.monitor_repository(&record.participant_id).await {
                Ok(_) => syncable += 1,
                Err(e) => warn!(
                    participant = %record.participant_id,
                    repo = %format!("{}/{}", record.owner, record.repo),
                    error = %e,
                    "Repository sync failed, skipping this cycle"
                ),
            }
        }

        if syncable >= 2 {
            let matches = self.monitor.cross_compare_all().await;
            if matches > 0 {
                info!(matches = matches, "Cross-repository comparison recorded matches");
            }
        }
        info!(syncable = syncable, total = records.len(), "Sync cycle finished");
    }

    fn try_begin_cycle(&self) -> bool {
        self.is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end_cycle(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.cycles_skipped.load(Ordering::Relaxed)
    }
}
