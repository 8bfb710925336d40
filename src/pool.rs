//! Virtual-user pool: keeps the number of live VU tasks tracking the ramp
//! schedule.
//!
//! The pool reconciles on a fixed tick. When the target rises it spawns new
//! VU tasks; when it falls it flags the youngest VUs for retirement and they
//! exit after finishing their current iteration. Nothing is ever killed
//! mid-request: the run deadline cancels cooperatively, and only VUs still
//! stuck past the grace period are abandoned (and reported as aborted
//! iterations).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::Collector;
use crate::scenario::{Context, Scenario, SetupResult};
use crate::schedule::{RampSchedule, Target};

/// How often the pool compares live count against the scheduled target.
const RECONCILE_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct PoolState {
    /// Retire flags of live (non-retiring) VUs, keyed by VU id. A retired
    /// VU leaves the map immediately; the task exits after its current
    /// iteration.
    live: BTreeMap<u64, Arc<AtomicBool>>,
    next_id: u64,
    spawned: u64,
    peak: usize,
}

/// Totals the pool hands back to the runner for the report.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// VUs created over the whole run (ids are never reused).
    pub spawned: u64,
    /// Highest live count observed at any reconcile tick.
    pub peak: usize,
    /// VUs abandoned mid-iteration past the grace period.
    pub abandoned: usize,
}

/// Spawns and retires VU tasks so the live count follows the schedule.
pub struct VuPool {
    scenario: Arc<dyn Scenario>,
    client: Client,
    base_url: String,
    collector: Arc<Collector>,
    setup: Arc<SetupResult>,
    state: Mutex<PoolState>,
}

impl VuPool {
    pub fn new(
        scenario: Arc<dyn Scenario>,
        client: Client,
        base_url: impl Into<String>,
        collector: Arc<Collector>,
        setup: Arc<SetupResult>,
    ) -> Self {
        Self {
            scenario,
            client,
            base_url: base_url.into(),
            collector,
            setup,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Live VUs right now (retiring VUs are already excluded).
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Drive the pool until the schedule completes or `cancel` fires, then
    /// retire everything and wait up to `grace` for in-flight iterations.
    pub async fn run(
        &self,
        schedule: RampSchedule,
        cancel: CancellationToken,
        grace: Duration,
    ) -> PoolStats {
        let start = Instant::now();
        let mut tasks = JoinSet::new();
        let mut tick = tokio::time::interval(RECONCILE_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            match schedule.target_at(start.elapsed()) {
                Target::Complete => {
                    info!(elapsed = ?start.elapsed(), "schedule complete, ramping down");
                    break;
                }
                Target::Active(target) => self.reconcile(target as usize, &cancel, &mut tasks),
            }

            tokio::select! {
                _ = tick.tick() => {}
                _ = cancel.cancelled() => {
                    warn!("run cancelled, retiring all VUs");
                    break;
                }
            }
        }

        self.retire_all();
        let abandoned = drain(&mut tasks, grace).await;
        for _ in 0..abandoned {
            self.collector.record_aborted_iteration();
        }

        let state = self.state.lock();
        PoolStats {
            spawned: state.spawned,
            peak: state.peak,
            abandoned,
        }
    }

    fn reconcile(&self, target: usize, cancel: &CancellationToken, tasks: &mut JoinSet<()>) {
        let mut state = self.state.lock();
        let live = state.live.len();

        if live < target {
            for _ in 0..target - live {
                state.next_id += 1;
                state.spawned += 1;
                let id = state.next_id;
                let retire = Arc::new(AtomicBool::new(false));
                state.live.insert(id, Arc::clone(&retire));
                tasks.spawn(vu_loop(
                    id,
                    Arc::clone(&self.scenario),
                    Context::new(
                        id,
                        self.scenario.name(),
                        self.client.clone(),
                        self.base_url.clone(),
                        Arc::clone(&self.collector),
                        Arc::clone(&self.setup),
                    ),
                    retire,
                    cancel.clone(),
                    Arc::clone(&self.collector),
                ));
            }
        } else if live > target {
            // Retire the youngest VUs first; they finish the iteration in
            // flight and then stop.
            for _ in 0..live - target {
                if let Some((id, retire)) = state.live.pop_last() {
                    debug!(vu = id, "retiring VU");
                    retire.store(true, Ordering::Relaxed);
                }
            }
        }

        state.peak = state.peak.max(state.live.len());
    }

    fn retire_all(&self) {
        let mut state = self.state.lock();
        for retire in state.live.values() {
            retire.store(true, Ordering::Relaxed);
        }
        state.live.clear();
    }
}

/// One VU: run scenario iterations back to back until retired or cancelled.
async fn vu_loop(
    id: u64,
    scenario: Arc<dyn Scenario>,
    ctx: Context,
    retire: Arc<AtomicBool>,
    cancel: CancellationToken,
    collector: Arc<Collector>,
) {
    debug!(vu = id, "VU started");
    while !retire.load(Ordering::Relaxed) && !cancel.is_cancelled() {
        match scenario.run(&ctx).await {
            Ok(()) => collector.record_iteration(true),
            Err(e) => {
                debug!(vu = id, error = %e, "scenario iteration failed");
                collector.record_iteration(false);
            }
        }
    }
    debug!(vu = id, "VU stopped");
}

/// Wait up to `grace` for all tasks; abort and count whatever is left.
async fn drain(tasks: &mut JoinSet<()>, grace: Duration) -> usize {
    let all_done = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    match all_done {
        Ok(()) => 0,
        Err(_) => {
            let stuck = tasks.len();
            warn!(stuck, "VUs still in flight past grace period, abandoning");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            stuck
        }
    }
}
