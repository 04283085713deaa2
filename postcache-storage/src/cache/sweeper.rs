//! Eviction Sweeper Background Task
//!
//! Bounds cache growth when reachability-based reclamation is slow or absent.
//! On a fixed period the sweeper:
//!
//! 1. Applies pending reclamation notices
//! 2. Snapshots the keys of all live entries
//! 3. Picks the single oldest key (minimum `created_at`, ties by ascending id)
//! 4. Removes that exact entry
//!
//! A key that disappears between the snapshot and the removal is counted as a
//! race and skipped; it is never an error.
//!
//! # Lifecycle
//!
//! `Idle → Running → Idle` on every tick, `Stopped` once the task exits.
//! [`SweeperHandle::stop`] never blocks: it flips a watch channel, and the
//! task exits after the sweep in flight (if any) completes. Sweeps are
//! synchronous and bounded by the snapshot size.
//!
//! # Example
//!
//! ```ignore
//! let table = WeakCacheTable::<Post>::new();
//! let handle = SweeperHandle::spawn(table.clone(), SweeperConfig::default())?;
//!
//! // Later
//! let metrics = handle.shutdown().await;
//! println!("evicted {}", metrics.evictions);
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use postcache_core::{PostCacheResult, PostId, SweeperConfig, SweeperError, Timestamp};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::key::CacheKey;
use super::weak_table::WeakCacheTable;

// ============================================================================
// STATE
// ============================================================================

/// Observable state of the sweeper task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SweeperState {
    /// Waiting for the next tick.
    Idle = 0,
    /// A sweep is in progress.
    Running = 1,
    /// The task has exited.
    Stopped = 2,
}

impl SweeperState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweeper activity.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Total sweeps completed
    pub sweeps: AtomicU64,

    /// Entries removed by sweeps
    pub evictions: AtomicU64,

    /// Sweeps that found the table empty
    pub empty_sweeps: AtomicU64,

    /// Selected keys that were already gone at removal time
    pub eviction_races: AtomicU64,

    /// Reclamation notices applied at the start of sweeps
    pub reclaimed: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            empty_sweeps: self.empty_sweeps.load(Ordering::Relaxed),
            eviction_races: self.eviction_races.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &SweepReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.reclaimed
            .fetch_add(report.reclaimed as u64, Ordering::Relaxed);
        let counter = match report.outcome {
            SweepOutcome::Evicted { .. } => &self.evictions,
            SweepOutcome::Empty => &self.empty_sweeps,
            SweepOutcome::Raced { .. } => &self.eviction_races,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub sweeps: u64,
    pub evictions: u64,
    pub empty_sweeps: u64,
    pub eviction_races: u64,
    pub reclaimed: u64,
}

// ============================================================================
// SINGLE SWEEP
// ============================================================================

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The oldest entry was removed.
    Evicted { id: PostId, created_at: Timestamp },
    /// Nothing to evict.
    Empty,
    /// The selected entry vanished (or was replaced) before removal.
    Raced { id: PostId },
}

/// Result of [`sweep_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub outcome: SweepOutcome,
    /// Entries dropped by pending reclamation notices during this sweep.
    pub reclaimed: usize,
}

/// Oldest key by `created_at`, ascending id on ties.
pub fn select_oldest(keys: &[CacheKey]) -> Option<&CacheKey> {
    keys.iter().min_by_key(|key| key.eviction_order())
}

/// Run one sweep against `table`.
pub fn sweep_once<V>(table: &WeakCacheTable<V>) -> SweepReport {
    let reclaimed = table.drain_reclaimed();
    let keys = table.keys();
    let outcome = evict_oldest(table, &keys);
    SweepReport { outcome, reclaimed }
}

/// Evict the oldest of `keys` from `table`.
///
/// `keys` may be stale. If the chosen entry has since been removed or
/// replaced by another instance, nothing is touched and `Raced` is reported.
fn evict_oldest<V>(table: &WeakCacheTable<V>, keys: &[CacheKey]) -> SweepOutcome {
    match select_oldest(keys) {
        None => SweepOutcome::Empty,
        Some(oldest) => {
            if table.remove_exact(oldest) {
                SweepOutcome::Evicted {
                    id: oldest.id(),
                    created_at: oldest.created_at(),
                }
            } else {
                SweepOutcome::Raced { id: oldest.id() }
            }
        }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Handle to a running sweeper task.
///
/// Dropping the handle requests a stop without waiting for the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
    metrics: Arc<SweeperMetrics>,
}

impl SweeperHandle {
    /// Spawn a sweeper over `table` on the current tokio runtime.
    ///
    /// Fails if `config` is invalid or no runtime is available. The
    /// `enabled` flag is the caller's concern; this always spawns.
    pub fn spawn<V>(table: WeakCacheTable<V>, config: SweeperConfig) -> PostCacheResult<Self>
    where
        V: Send + Sync + 'static,
    {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SweeperError::RuntimeUnavailable)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(SweeperState::Idle as u8));
        let metrics = Arc::new(SweeperMetrics::new());

        let task = runtime.spawn(sweeper_task(
            table,
            config,
            shutdown_rx,
            Arc::clone(&state),
            Arc::clone(&metrics),
        ));

        Ok(Self {
            shutdown_tx,
            task: Some(task),
            state,
            metrics,
        })
    }

    /// Request the task to stop. Safe from any thread; never waits.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Stop the task and wait for it to exit, returning final metrics.
    ///
    /// Waits at most for the sweep currently in flight.
    pub async fn shutdown(mut self) -> SweeperSnapshot {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Eviction sweeper task failed");
                self.state
                    .store(SweeperState::Stopped as u8, Ordering::Release);
            }
        }
        self.metrics.snapshot()
    }

    pub fn state(&self) -> SweeperState {
        SweeperState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> SweeperSnapshot {
        self.metrics.snapshot()
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_task<V>(
    table: WeakCacheTable<V>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<AtomicU8>,
    metrics: Arc<SweeperMetrics>,
) where
    V: Send + Sync + 'static,
{
    let mut ticker = interval_at(Instant::now() + config.initial_delay, config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        period_ms = config.period.as_millis() as u64,
        initial_delay_ms = config.initial_delay.as_millis() as u64,
        "Eviction sweeper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means nobody can stop us later.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Eviction sweeper shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                state.store(SweeperState::Running as u8, Ordering::Release);
                let report = sweep_once(&table);
                metrics.record(&report);
                log_sweep(&report, &config);
                state.store(SweeperState::Idle as u8, Ordering::Release);
            }
        }
    }

    state.store(SweeperState::Stopped as u8, Ordering::Release);

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        evictions = snapshot.evictions,
        empty_sweeps = snapshot.empty_sweeps,
        eviction_races = snapshot.eviction_races,
        reclaimed = snapshot.reclaimed,
        "Eviction sweeper stopped"
    );
}

fn log_sweep(report: &SweepReport, config: &SweeperConfig) {
    match report.outcome {
        SweepOutcome::Evicted { id, created_at } => {
            if config.log_evictions {
                tracing::info!(post_id = %id, created_at = %created_at, "Evicted oldest cache entry");
            } else {
                tracing::debug!(post_id = %id, created_at = %created_at, "Evicted oldest cache entry");
            }
        }
        SweepOutcome::Raced { id } => {
            tracing::debug!(post_id = %id, "Oldest entry already gone, skipping");
        }
        SweepOutcome::Empty => {
            tracing::trace!(reclaimed = report.reclaimed, "Sweep found no entries");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
