use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::core::clock::Clock;
use crate::core::matcher::MatchingEngine;
use crate::models::{AutoMatchOutcome, RunSummary};

/// Default auto-match period
pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;

/// Upper bound for the auto-match period (one day)
pub const MAX_INTERVAL_MINUTES: u64 = 24 * 60;

/// Error a completion subscriber may report
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn(&AutoMatchOutcome) -> Result<(), SubscriberError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("interval must be between 1 and 1440 minutes, got {0}")]
    InvalidInterval(u64),

    #[error("a matching run is already in progress")]
    Busy,
}

/// Periodic driver for the matching engine
///
/// At most one engine run is in flight at a time across the timer and every
/// manual trigger. A trigger arriving while a run is executing is dropped.
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct AutoMatchScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    engine: Arc<MatchingEngine>,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
    interval_minutes: AtomicU64,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_subscriber_id: AtomicU64,
    // Some while the timer loop is running; sending `true` ends it
    stop_signal: Mutex<Option<watch::Sender<bool>>>,
    // Runtime the timer loop lives on, captured at construction
    runtime: Option<Handle>,
}

/// Handle returned by [`AutoMatchScheduler::on_complete`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut subscribers = lock(&shared.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}

/// Clears the in-flight flag when the run ends, including by panic
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AutoMatchScheduler {
    pub fn new(engine: Arc<MatchingEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                clock,
                in_flight: AtomicBool::new(false),
                interval_minutes: AtomicU64::new(DEFAULT_INTERVAL_MINUTES),
                last_run_at: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
                stop_signal: Mutex::new(None),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.shared.engine
    }

    /// Start the timer. No-op when already running.
    ///
    /// The timer loop is spawned on the runtime the scheduler was created on,
    /// whichever thread calls `start`. A scheduler built outside a runtime
    /// uses the caller's runtime instead.
    pub fn start(&self) {
        let mut stop_signal = lock(&self.shared.stop_signal);
        if stop_signal.as_ref().is_some_and(|tx| !tx.is_closed()) {
            tracing::debug!("Auto-matching already running");
            return;
        }

        let runtime = match self.shared.runtime.clone().map_or_else(Handle::try_current, Ok) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Cannot start auto-matching outside a tokio runtime: {}", e);
                return;
            }
        };

        let (tx, rx) = watch::channel(false);
        runtime.spawn(tick_loop(Arc::downgrade(&self.shared), rx));
        *stop_signal = Some(tx);

        tracing::info!(
            "Auto-matching started, every {} min",
            self.shared.interval_minutes.load(Ordering::Acquire)
        );
    }

    /// Cancel future ticks. A run already executing finishes normally.
    pub fn stop(&self) {
        if let Some(tx) = lock(&self.shared.stop_signal).take() {
            let _ = tx.send(true);
            tracing::info!("Auto-matching stopped");
        }
    }

    /// False once stopped, or once the timer loop's runtime has gone away
    pub fn is_running(&self) -> bool {
        lock(&self.shared.stop_signal)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Change the period. Applies from the next scheduled tick on; a timer
    /// already waiting keeps its original deadline.
    pub fn set_interval(&self, minutes: u64) -> Result<(), SchedulerError> {
        if minutes == 0 || minutes > MAX_INTERVAL_MINUTES {
            return Err(SchedulerError::InvalidInterval(minutes));
        }
        self.shared.interval_minutes.store(minutes, Ordering::Release);
        tracing::info!("Auto-match interval set to {} min", minutes);
        Ok(())
    }

    pub fn interval_minutes(&self) -> u64 {
        self.shared.interval_minutes.load(Ordering::Acquire)
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.last_run_at)
    }

    /// Manual full run. Returns zero new matches immediately if a run is in flight.
    pub fn run_now(&self) -> AutoMatchOutcome {
        match self.shared.run_guarded(None) {
            Some(summary) => AutoMatchOutcome {
                new_matches: summary.new_matches,
            },
            None => {
                tracing::debug!("Manual auto-match dropped: a run is already in flight");
                AutoMatchOutcome::default()
            }
        }
    }

    /// Manual run, optionally scoped to one demand, under the same guard
    pub fn run_scoped(&self, demand_id: Option<&str>) -> Result<RunSummary, SchedulerError> {
        self.shared.run_guarded(demand_id).ok_or(SchedulerError::Busy)
    }

    /// Register a completion callback
    ///
    /// Callbacks run after every completed run, in registration order. An error
    /// or panic in one callback is logged and does not reach the others.
    pub fn on_complete<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AutoMatchOutcome) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(callback);
        lock(&self.shared.subscribers).push((id, callback));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }
}

impl Shared {
    fn run_guarded(&self, scope: Option<&str>) -> Option<RunSummary> {
        let _guard = InFlight::acquire(&self.in_flight)?;

        let summary = self.engine.run(scope);
        *lock(&self.last_run_at) = Some(self.clock.now());

        self.notify(&AutoMatchOutcome {
            new_matches: summary.new_matches,
        });
        Some(summary)
    }

    fn notify(&self, outcome: &AutoMatchOutcome) {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
        let subscribers: Vec<(u64, Callback)> = lock(&self.subscribers).clone();

        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(outcome))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Auto-match subscriber {} failed: {}", id, e),
                Err(_) => tracing::warn!("Auto-match subscriber {} panicked", id),
            }
        }
    }
}

async fn tick_loop(shared: Weak<Shared>, mut stop: watch::Receiver<bool>) {
    loop {
        // Interval is read per cycle, so a change lands on the next tick
        let period = match shared.upgrade() {
            Some(s) => Duration::from_secs(s.interval_minutes.load(Ordering::Acquire) * 60),
            None => break,
        };

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }

        if *stop.borrow() {
            break;
        }
        let Some(shared) = shared.upgrade() else { break };

        // The engine pass is CPU-bound; keep it off the timer's runtime threads
        match tokio::task::spawn_blocking(move || shared.run_guarded(None)).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::debug!("Auto-match tick dropped: a run is already in flight"),
            Err(e) => tracing::error!("Auto-match run failed: {}; next tick stays scheduled", e),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
