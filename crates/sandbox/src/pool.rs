//! Fixed-capacity pool of warm sandboxes for one language.
//!
//! The semaphore holds exactly one permit per idle handle, so waiters block on
//! the semaphore and never on the lock. The mutex only guards short
//! bookkeeping sections. Shutdown is a one-way flip of [`PoolState`] under
//! that lock, after which nothing is admitted to the idle set again.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

#[cfg(feature = "metrics")]
use std::time::Instant;

use {
    futures::future::join_all,
    serde::Serialize,
    tokio::sync::{OnceCell, Semaphore, watch},
    tokio_util::task::TaskTracker,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use runbox_metrics::{counter, gauge, histogram, labels, pool as pool_metrics};

use crate::{
    error::PoolError,
    language::LanguageSpec,
    runtime::{ContainerLimits, SandboxRuntime},
    types::{SandboxHandle, short_id},
};

/// Lifecycle of a pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PoolState {
    Running = 0,
    Draining = 1,
    Terminated = 2,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

/// Point-in-time view of a pool, as reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub language: String,
    pub image: String,
    pub capacity: usize,
    /// Live containers owned by the pool, idle or checked out.
    pub warm: usize,
    pub idle: usize,
    pub in_use: usize,
    pub state: PoolState,
}

/// Container settings and shutdown timings shared by every pool of an
/// executor.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub limits: ContainerLimits,
    /// How long `stop` waits before the runtime kills a container.
    pub stop_grace: Duration,
    /// How long cleanup waits for checked-out handles to come back.
    pub drain_timeout: Duration,
}

#[derive(Debug, Default)]
struct PoolInner {
    idle: VecDeque<SandboxHandle>,
    /// Ids of every live container the pool created.
    roster: HashSet<String>,
    checked_out: HashSet<String>,
}

pub struct ContainerPool {
    spec: Arc<LanguageSpec>,
    capacity: usize,
    runtime: Arc<dyn SandboxRuntime>,
    options: PoolOptions,
    state: AtomicU8,
    inner: Mutex<PoolInner>,
    available: Semaphore,
    in_use: watch::Sender<usize>,
    provisioning: TaskTracker,
    cleaned: OnceCell<()>,
}

impl std::fmt::Debug for ContainerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerPool")
            .field("language", &self.spec.name)
            .field("capacity", &self.capacity)
            .field("backend", &self.runtime.backend_name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContainerPool {
    /// Create an empty pool. Call [`warm_up`](Self::warm_up) to fill it.
    pub fn new(
        spec: Arc<LanguageSpec>,
        capacity: usize,
        runtime: Arc<dyn SandboxRuntime>,
        options: PoolOptions,
    ) -> Arc<Self> {
        let (in_use, _) = watch::channel(0);
        Arc::new(Self {
            spec,
            capacity,
            runtime,
            options,
            state: AtomicU8::new(PoolState::Running as u8),
            inner: Mutex::new(PoolInner::default()),
            available: Semaphore::new(0),
            in_use,
            provisioning: TaskTracker::new(),
            cleaned: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn spec(&self) -> &Arc<LanguageSpec> {
        &self.spec
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state() != PoolState::Running
    }

    /// Create the pool's containers one after another on a background task.
    ///
    /// Creation failures are logged and leave the slot empty.
    pub fn warm_up(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        self.provisioning.spawn(async move {
            for slot in 0..pool.capacity {
                if pool.is_shutting_down() {
                    debug!(language = %pool.spec.name, slot, "warm-up interrupted by shutdown");
                    break;
                }
                pool.provision().await;
            }
            info!(
                language = %pool.spec.name,
                warm = pool.lock().roster.len(),
                capacity = pool.capacity,
                "sandbox pool warmed up"
            );
        });
    }

    /// Take an idle sandbox, waiting up to `timeout` for one to free up.
    pub async fn acquire(&self, timeout: Duration) -> Result<SandboxHandle, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let permit = match tokio::time::timeout(timeout, self.available.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(PoolError::ShuttingDown),
            Err(_elapsed) => {
                #[cfg(feature = "metrics")]
                counter!(pool_metrics::ACQUIRE_TIMEOUTS_TOTAL, labels::LANGUAGE => self.spec.name.clone())
                    .increment(1);
                debug!(language = %self.spec.name, "no idle sandbox within acquire timeout");
                return Err(PoolError::Exhausted);
            },
        };
        // The permit stands for the idle handle we are about to take.
        permit.forget();

        let mut inner = self.lock();
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        let Some(handle) = inner.idle.pop_front() else {
            warn!(language = %self.spec.name, "permit granted with no idle sandbox");
            return Err(PoolError::Exhausted);
        };
        inner.checked_out.insert(handle.id().to_string());
        self.publish(&inner);
        drop(inner);

        #[cfg(feature = "metrics")]
        histogram!(pool_metrics::ACQUIRE_WAIT_SECONDS, labels::LANGUAGE => self.spec.name.clone())
            .record(start.elapsed().as_secs_f64());

        debug!(sandbox = %handle, "sandbox checked out");
        Ok(handle)
    }

    /// Return a checked-out sandbox to the idle set.
    ///
    /// While draining the handle is not re-admitted; cleanup destroys it.
    /// Handles that are not currently checked out are ignored.
    pub fn release(&self, handle: SandboxHandle) {
        let mut inner = self.lock();
        if !inner.checked_out.remove(handle.id()) {
            warn!(sandbox = %handle, "ignoring release of a sandbox that is not checked out");
            return;
        }
        if self.is_shutting_down() {
            self.publish(&inner);
            debug!(sandbox = %handle, "pool draining, sandbox left for cleanup");
            return;
        }
        debug!(sandbox = %handle, "sandbox returned to pool");
        inner.idle.push_back(handle);
        self.available.add_permits(1);
        self.publish(&inner);
    }

    /// Destroy a checked-out sandbox and provision a replacement in the
    /// background unless the pool is draining.
    ///
    /// The id leaves the roster before the container is destroyed, so a
    /// forced teardown never destroys it a second time. A sandbox that
    /// teardown already swept is only forgotten.
    pub async fn retire(self: &Arc<Self>, handle: SandboxHandle) {
        let owned = {
            let mut inner = self.lock();
            if !inner.checked_out.contains(handle.id()) {
                warn!(sandbox = %handle, "ignoring retire of a sandbox that is not checked out");
                return;
            }
            inner.roster.remove(handle.id())
        };

        if owned {
            info!(sandbox = %handle, "retiring sandbox");
            self.destroy(handle.id()).await;
        } else {
            debug!(sandbox = %handle, "sandbox already torn down by cleanup");
        }

        let mut inner = self.lock();
        inner.checked_out.remove(handle.id());
        // Spawn under the lock so a concurrent cleanup either sees the
        // replacement task or has already flipped the state.
        if !self.is_shutting_down() {
            let pool = Arc::clone(self);
            self.provisioning.spawn(async move { pool.provision().await });
        }
        self.publish(&inner);
    }

    /// Tear the pool down. Idempotent; concurrent callers await the same
    /// sweep.
    pub async fn cleanup(&self) {
        self.cleaned.get_or_init(|| self.sweep()).await;
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = self.lock();
        PoolStatus {
            language: self.spec.name.clone(),
            image: self.spec.image.clone(),
            capacity: self.capacity,
            warm: inner.roster.len(),
            idle: inner.idle.len(),
            in_use: inner.checked_out.len(),
            state: self.state(),
        }
    }

    async fn sweep(&self) {
        {
            let mut inner = self.lock();
            self.transition(PoolState::Running, PoolState::Draining);
            inner.idle.clear();
            self.publish(&inner);
        }
        self.available.close();
        info!(language = %self.spec.name, "draining sandbox pool");

        // No task is spawned once the state left Running.
        self.provisioning.close();
        self.provisioning.wait().await;

        // The wait_for guard must not outlive this statement: publish() below
        // takes the watch's write lock.
        let mut in_use = self.in_use.subscribe();
        let drained =
            tokio::time::timeout(self.options.drain_timeout, in_use.wait_for(|n| *n == 0))
                .await
                .is_ok();
        if !drained {
            let still_in_use = *in_use.borrow();
            warn!(
                language = %self.spec.name,
                in_use = still_in_use,
                timeout_secs = self.options.drain_timeout.as_secs(),
                "executions still running after drain timeout, forcing teardown"
            );
        }

        let ids: Vec<String> = self.lock().roster.drain().collect();
        let outcomes = join_all(ids.iter().map(|id| self.destroy(id))).await;
        let destroyed = outcomes.iter().filter(|ok| **ok).count();

        {
            let inner = self.lock();
            self.transition(PoolState::Draining, PoolState::Terminated);
            self.publish(&inner);
        }
        info!(
            language = %self.spec.name,
            destroyed,
            failed = ids.len() - destroyed,
            "sandbox pool terminated"
        );
    }

    /// Create one container and admit it to the idle set.
    async fn provision(&self) {
        let id = match self
            .runtime
            .create(&self.spec.image, &self.options.limits)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(pool_metrics::PROVISION_ERRORS_TOTAL, labels::LANGUAGE => self.spec.name.clone())
                    .increment(1);
                warn!(
                    language = %self.spec.name,
                    image = %self.spec.image,
                    error = %e,
                    "failed to create sandbox"
                );
                return;
            },
        };

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::CONTAINERS_CREATED_TOTAL, labels::LANGUAGE => self.spec.name.clone())
            .increment(1);

        let handle = SandboxHandle::new(id, self.spec.name.clone());
        let rejected = {
            let mut inner = self.lock();
            if self.is_shutting_down() || inner.roster.len() >= self.capacity {
                Some(handle)
            } else {
                inner.roster.insert(handle.id().to_string());
                debug!(sandbox = %handle, "sandbox ready");
                inner.idle.push_back(handle);
                self.available.add_permits(1);
                self.publish(&inner);
                None
            }
        };

        if let Some(handle) = rejected {
            debug!(sandbox = %handle, "sandbox created after shutdown or over capacity, destroying");
            self.destroy(handle.id()).await;
        }
    }

    /// Stop, kill if stopping failed, then force-remove. Returns whether the
    /// container is gone.
    async fn destroy(&self, id: &str) -> bool {
        let language = self.spec.name.as_str();
        if let Err(e) = self.runtime.stop(id, self.options.stop_grace).await {
            warn!(language, id = short_id(id), error = %e, "failed to stop sandbox, killing");
            if let Err(e) = self.runtime.kill(id).await {
                warn!(language, id = short_id(id), error = %e, "failed to kill sandbox");
            }
        }
        match self.runtime.remove(id, true).await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!(pool_metrics::CONTAINERS_DESTROYED_TOTAL, labels::LANGUAGE => language.to_string())
                    .increment(1);
                debug!(language, id = short_id(id), "sandbox destroyed");
                true
            },
            Err(e) => {
                warn!(language, id = short_id(id), error = %e, "failed to remove sandbox");
                false
            },
        }
    }

    fn transition(&self, from: PoolState, to: PoolState) {
        let _ = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Publish the checked-out count for cleanup and the gauges.
    fn publish(&self, inner: &PoolInner) {
        self.in_use.send_replace(inner.checked_out.len());

        #[cfg(feature = "metrics")]
        {
            gauge!(pool_metrics::IDLE, labels::LANGUAGE => self.spec.name.clone())
                .set(inner.idle.len() as f64);
            gauge!(pool_metrics::IN_USE, labels::LANGUAGE => self.spec.name.clone())
                .set(inner.checked_out.len() as f64);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
