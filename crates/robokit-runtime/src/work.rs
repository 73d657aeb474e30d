//! `Every` / `After` work scheduling.
//!
//! A [`Scheduler`] spawns periodic ([`WorkKind::Every`]) and one-shot
//! ([`WorkKind::After`]) tasks, records each in a [`WorkRegistry`] under a
//! UUID, and keeps one [`TaskTracker`] per kind so an owner can wait for
//! either group to drain.
//!
//! Cancellation is cooperative. Cancelling a handle (or the context token it
//! was created under) stops further invocations and removes the handle from
//! the registry immediately; an invocation that is already running finishes.
//! `Every` ticks that are missed because the callback ran long are skipped
//! rather than replayed.
//!
//! Every task is spawned on the ambient Tokio runtime, so the scheduling
//! functions must be called from within one.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use robokit_types::BotError;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Every,
    After,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every => f.write_str("every"),
            Self::After => f.write_str("after"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Handle to one scheduled piece of work.
#[derive(Clone)]
pub struct RobotWork {
    id: Uuid,
    kind: WorkKind,
    duration: Duration,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
    ticker: Option<watch::Receiver<u64>>,
    registry: Weak<WorkRegistry>,
}

impl RobotWork {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Number of times the callback has been invoked so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Watch channel carrying the tick count after every `Every` invocation.
    /// `None` for `After` work.
    pub fn ticker(&self) -> Option<watch::Receiver<u64>> {
        self.ticker.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop further invocations and drop the handle from its registry.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}

impl fmt::Debug for RobotWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobotWork")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("duration", &self.duration)
            .field("ticks", &self.tick_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl fmt::Display for RobotWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} ({}) ticks={}",
            self.kind,
            self.duration,
            self.id,
            self.tick_count()
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// Live work handles keyed by id.
#[derive(Debug, Default)]
pub struct WorkRegistry {
    work: RwLock<HashMap<Uuid, RobotWork>>,
}

impl WorkRegistry {
    pub fn get(&self, id: &Uuid) -> Option<RobotWork> {
        self.work.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.work.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.work.read().is_empty()
    }

    /// Snapshot of every live handle.
    pub fn all(&self) -> Vec<RobotWork> {
        self.work.read().values().cloned().collect()
    }

    fn insert(&self, work: RobotWork) {
        self.work.write().insert(work.id, work);
    }

    fn remove(&self, id: &Uuid) -> Option<RobotWork> {
        self.work.write().remove(id)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler
// ────────────────────────────────────────────────────────────────────────────

/// Spawns and tracks `Every`/`After` work.
#[derive(Debug, Default)]
pub struct Scheduler {
    registry: Arc<WorkRegistry>,
    every_group: TaskTracker,
    after_group: TaskTracker,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &WorkRegistry {
        &self.registry
    }

    fn handle(
        &self,
        ctx: &CancellationToken,
        kind: WorkKind,
        duration: Duration,
        ticker: Option<watch::Receiver<u64>>,
    ) -> RobotWork {
        let work = RobotWork {
            id: Uuid::new_v4(),
            kind,
            duration,
            token: ctx.child_token(),
            ticks: Arc::new(AtomicU64::new(0)),
            ticker,
            registry: Arc::downgrade(&self.registry),
        };
        self.registry.insert(work.clone());
        work
    }

    /// Run `f` every `period` until `ctx` or the returned handle is cancelled.
    /// The first invocation happens one period after the call.
    ///
    /// # Errors
    ///
    /// [`BotError::InvalidArgument`] for a zero period.
    pub fn every<F>(
        &self,
        ctx: &CancellationToken,
        period: Duration,
        mut f: F,
    ) -> Result<RobotWork, BotError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(BotError::InvalidArgument(
                "every: period must be non-zero".into(),
            ));
        }
        let (tick_tx, tick_rx) = watch::channel(0);
        let work = self.handle(ctx, WorkKind::Every, period, Some(tick_rx));

        let id = work.id;
        let token = work.token.clone();
        let ticks = Arc::clone(&work.ticks);
        let registry = Arc::clone(&self.registry);
        self.every_group.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }
                let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                if panic::catch_unwind(AssertUnwindSafe(&mut f)).is_err() {
                    warn!(%id, tick = n, "every callback panicked");
                }
                tick_tx.send_replace(n);
            }
            registry.remove(&id);
            debug!(%id, "every work stopped");
        });
        Ok(work)
    }

    /// Run `f` once after `delay` unless `ctx` or the handle is cancelled first.
    pub fn after<F>(&self, ctx: &CancellationToken, delay: Duration, f: F) -> RobotWork
    where
        F: FnOnce() + Send + 'static,
    {
        let work = self.handle(ctx, WorkKind::After, delay, None);

        let id = work.id;
        let token = work.token.clone();
        let ticks = Arc::clone(&work.ticks);
        let registry = Arc::clone(&self.registry);
        self.after_group.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    registry.remove(&id);
                }
                _ = tokio::time::sleep(delay) => {
                    registry.remove(&id);
                    ticks.store(1, Ordering::SeqCst);
                    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                        warn!(%id, "after callback panicked");
                    }
                }
            }
        });
        work
    }

    /// Wait until every `Every` task spawned so far has stopped.
    pub async fn wait_every(&self) {
        drain(&self.every_group).await;
    }

    /// Wait until every `After` task spawned so far has fired or been cancelled.
    pub async fn wait_after(&self) {
        drain(&self.after_group).await;
    }

    /// Number of live tasks in the `Every` and `After` groups.
    pub fn pending(&self) -> (usize, usize) {
        (self.every_group.len(), self.after_group.len())
    }
}

async fn drain(group: &TaskTracker) {
    group.close();
    group.wait().await;
    group.reopen();
}

// ────────────────────────────────────────────────────────────────────────────
// Process-wide scheduling
// ────────────────────────────────────────────────────────────────────────────

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// The process-wide scheduler, created on first use.
pub fn global() -> &'static Scheduler {
    GLOBAL.get_or_init(Scheduler::new)
}

/// Run `f` every `period` on the process-wide scheduler until `ctx` is
/// cancelled.
pub fn every_with<F>(
    ctx: &CancellationToken,
    period: Duration,
    f: F,
) -> Result<RobotWork, BotError>
where
    F: FnMut() + Send + 'static,
{
    global().every(ctx, period, f)
}

/// Run `f` once after `delay` on the process-wide scheduler unless `ctx` is
/// cancelled first.
pub fn after_with<F>(ctx: &CancellationToken, delay: Duration, f: F) -> RobotWork
where
    F: FnOnce() + Send + 'static,
{
    global().after(ctx, delay, f)
}

/// Fire-and-forget periodic work that can never be cancelled.
#[deprecated(note = "use `every_with` and cancel through the token")]
pub fn every<F>(period: Duration, f: F) -> Result<(), BotError>
where
    F: FnMut() + Send + 'static,
{
    every_with(&CancellationToken::new(), period, f).map(drop)
}

/// Fire-and-forget one-shot work that can never be cancelled.
#[deprecated(note = "use `after_with` and cancel through the token")]
pub fn after<F>(delay: Duration, f: F)
where
    F: FnOnce() + Send + 'static,
{
    after_with(&CancellationToken::new(), delay, f);
}
