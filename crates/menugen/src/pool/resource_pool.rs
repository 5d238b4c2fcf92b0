use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PoolConfig;

use super::error::PoolError;
use super::handle::PooledHandle;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Creates, destroys and health-checks the resources held by a pool.
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    async fn destroy(&self, resource: Self::Resource) -> Result<(), Self::Error>;

    async fn validate(&self, resource: &Self::Resource) -> bool;
}

/// Point-in-time view of the pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub max: usize,
}

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<PooledHandle<T>>,
}

struct PoolState<T> {
    idle: VecDeque<PooledHandle<T>>,
    in_use: HashSet<u64>,
    waiters: VecDeque<Waiter<T>>,
    /// Slots reserved by in-progress `create` calls.
    creating: usize,
    /// Part of `creating` started on behalf of queued waiters.
    serving: usize,
    /// Slots held by the evictor while it validates or destroys handles.
    evicting: usize,
    closed: bool,
}

impl<T> PoolState<T> {
    fn occupied(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.creating + self.evicting
    }

    /// Hands the handle to the longest waiting caller, or parks it as idle.
    fn check_in(&mut self, mut handle: PooledHandle<T>) {
        while let Some(waiter) = self.waiters.pop_front() {
            let id = handle.id();
            self.in_use.insert(id);
            match waiter.tx.send(handle) {
                Ok(()) => {
                    debug!("Handed pooled handle {} to waiter {}", id, waiter.id);
                    return;
                }
                Err(returned) => {
                    // Waiter gave up between timing out and deregistering.
                    self.in_use.remove(&id);
                    handle = returned;
                }
            }
        }
        self.idle.push_back(handle);
    }
}

struct PoolInner<M: ResourceManager> {
    id: u64,
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Resource>>,
    next_handle_id: AtomicU64,
    next_waiter_id: AtomicU64,
}

impl<M: ResourceManager> PoolInner<M> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<M::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_handle(&self, resource: M::Resource) -> PooledHandle<M::Resource> {
        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        PooledHandle::new(self.id, id, resource)
    }

    async fn destroy_resource(&self, resource: M::Resource) {
        if let Err(e) = self.manager.destroy(resource).await {
            warn!("Failed to destroy pooled resource: {}", e);
        }
    }

    /// Creates a handle for a caller that already reserved a slot.
    async fn create_reserved(self: &Arc<Self>) -> Result<PooledHandle<M::Resource>, PoolError> {
        let created = self.manager.create().await;

        let handle = {
            let mut state = self.lock_state();
            state.creating -= 1;
            match created {
                Ok(resource) => {
                    let handle = self.new_handle(resource);
                    if state.closed {
                        Err(handle)
                    } else {
                        state.in_use.insert(handle.id());
                        Ok(handle)
                    }
                }
                Err(e) => {
                    drop(state);
                    self.serve_waiters();
                    return Err(PoolError::Create(Box::new(e)));
                }
            }
        };

        match handle {
            Ok(handle) => {
                debug!("Created pooled handle {}", handle.id());
                Ok(handle)
            }
            Err(orphan) => {
                self.destroy_resource(orphan.into_resource()).await;
                Err(PoolError::Closed)
            }
        }
    }

    /// Starts one `create` per queued waiter that no release or pending
    /// creation will serve, as far as free slots allow. Call after anything
    /// that frees a slot.
    fn serve_waiters(self: &Arc<Self>) {
        let reserved = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            let unserved = state.waiters.len().saturating_sub(state.serving);
            let free = self
                .config
                .max_connections
                .saturating_sub(state.occupied());
            let reserved = unserved.min(free);
            state.creating += reserved;
            state.serving += reserved;
            reserved
        };

        for _ in 0..reserved {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let created = inner.manager.create().await;
                let orphan = {
                    let mut state = inner.lock_state();
                    state.creating -= 1;
                    state.serving -= 1;
                    match created {
                        Ok(resource) => {
                            let handle = inner.new_handle(resource);
                            if state.closed {
                                Some(handle)
                            } else {
                                state.check_in(handle);
                                None
                            }
                        }
                        Err(e) => {
                            // Waiters keep waiting for a release or their timeout.
                            warn!("Failed to create pooled resource for a waiter: {}", e);
                            None
                        }
                    }
                };
                if let Some(handle) = orphan {
                    inner.destroy_resource(handle.into_resource()).await;
                }
            });
        }
    }

    /// Tops the pool up to `min_connections` idle handles.
    async fn ensure_minimum(self: &Arc<Self>) -> Result<(), PoolError> {
        loop {
            {
                let mut state = self.lock_state();
                if state.closed || state.occupied() >= self.config.min_connections {
                    return Ok(());
                }
                state.creating += 1;
            }

            let created = self.manager.create().await;

            let orphan = {
                let mut state = self.lock_state();
                state.creating -= 1;
                let handle = match created {
                    Ok(resource) => self.new_handle(resource),
                    Err(e) => {
                        drop(state);
                        self.serve_waiters();
                        return Err(PoolError::Create(Box::new(e)));
                    }
                };
                if state.closed {
                    Some(handle)
                } else {
                    state.check_in(handle);
                    None
                }
            };

            if let Some(handle) = orphan {
                self.destroy_resource(handle.into_resource()).await;
                return Ok(());
            }
        }
    }

    /// One eviction pass over the idle handles.
    async fn evict_idle(self: &Arc<Self>) {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();

        let (expired, to_validate) = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }

            let total = state.idle.len() + state.in_use.len();
            let mut removable = total.saturating_sub(self.config.min_connections);
            let mut expired = Vec::new();
            let mut to_validate = Vec::new();

            for handle in state.idle.drain(..) {
                if removable > 0 && handle.idle_for(now) > idle_timeout {
                    removable -= 1;
                    expired.push(handle);
                } else {
                    to_validate.push(handle);
                }
            }
            state.evicting = expired.len() + to_validate.len();
            (expired, to_validate)
        };

        let evicted = expired.len();
        for handle in expired {
            debug!("Evicting idle pooled handle {}", handle.id());
            self.destroy_resource(handle.into_resource()).await;
            self.lock_state().evicting -= 1;
            self.serve_waiters();
        }

        let mut invalid = 0;
        for handle in to_validate {
            let healthy = self.manager.validate(handle.resource()).await;
            let rejected = {
                let mut state = self.lock_state();
                state.evicting -= 1;
                if healthy && !state.closed {
                    state.check_in(handle);
                    None
                } else {
                    Some(handle)
                }
            };
            if let Some(handle) = rejected {
                invalid += 1;
                debug!("Destroying unhealthy pooled handle {}", handle.id());
                self.destroy_resource(handle.into_resource()).await;
                self.serve_waiters();
            }
        }

        if evicted > 0 || invalid > 0 {
            info!(
                "Pool eviction removed {} idle and {} unhealthy handles",
                evicted, invalid
            );
        }

        if let Err(e) = self.ensure_minimum().await {
            warn!("Failed to replenish pool to minimum size: {}", e);
        }
    }
}

/// A bounded pool of resources produced by a [`ResourceManager`].
///
/// Idle handles are reused in FIFO order; callers beyond `max_connections`
/// queue up and are served in arrival order as handles come back.
pub struct ResourcePool<M: ResourceManager> {
    inner: Arc<PoolInner<M>>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl<M: ResourceManager> ResourcePool<M> {
    /// Creates the pool, pre-creates `min_connections` handles and starts
    /// background eviction.
    ///
    /// # Panics
    /// Panics if `max_connections` is 0 or below `min_connections`.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        assert!(config.max_connections > 0, "max_connections must be > 0");
        assert!(
            config.min_connections <= config.max_connections,
            "min_connections must not exceed max_connections"
        );

        let eviction_interval = config.eviction_interval();
        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            manager,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                in_use: HashSet::new(),
                waiters: VecDeque::new(),
                creating: 0,
                serving: 0,
                evicting: 0,
                closed: false,
            }),
            next_handle_id: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(1),
        });

        inner.ensure_minimum().await?;

        let evictor = spawn_evictor(Arc::downgrade(&inner), eviction_interval);

        info!(
            "Started resource pool {} (min: {}, max: {})",
            inner.id, inner.config.min_connections, inner.config.max_connections
        );

        Ok(Self {
            inner,
            evictor: Mutex::new(Some(evictor)),
        })
    }

    /// Borrows a handle, creating one if the pool has room or waiting for a
    /// release otherwise.
    pub async fn acquire(&self) -> Result<PooledHandle<M::Resource>, PoolError> {
        let pending = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(mut handle) = state.idle.pop_front() {
                handle.touch();
                state.in_use.insert(handle.id());
                return Ok(handle);
            }

            if state.occupied() < self.inner.config.max_connections {
                state.creating += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                state.waiters.push_back(Waiter { id, tx });
                Some((id, rx))
            }
        };

        match pending {
            None => self.inner.create_reserved().await,
            Some((waiter_id, rx)) => self.wait_for_release(waiter_id, rx).await,
        }
    }

    async fn wait_for_release(
        &self,
        waiter_id: u64,
        mut rx: oneshot::Receiver<PooledHandle<M::Resource>>,
    ) -> Result<PooledHandle<M::Resource>, PoolError> {
        let timeout = self.inner.config.acquire_timeout();

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(mut handle)) => {
                handle.touch();
                Ok(handle)
            }
            // Sender dropped: the pool was closed while we waited.
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                self.inner
                    .lock_state()
                    .waiters
                    .retain(|waiter| waiter.id != waiter_id);

                // A release may have handed us a handle right before we deregistered.
                match rx.try_recv() {
                    Ok(mut handle) => {
                        handle.touch();
                        Ok(handle)
                    }
                    Err(_) => {
                        debug!("Waiter {} timed out after {:?}", waiter_id, timeout);
                        Err(PoolError::AcquireTimeout(timeout))
                    }
                }
            }
        }
    }

    /// Returns a handle to the pool.
    ///
    /// Handles this pool does not own, and handles returned after `close`,
    /// are destroyed instead of pooled.
    pub async fn release(&self, mut handle: PooledHandle<M::Resource>) {
        let rejected = {
            let mut state = self.inner.lock_state();
            let owned =
                handle.pool_id() == self.inner.id && state.in_use.remove(&handle.id());
            if !owned {
                warn!(
                    "Released handle {} is not owned by pool {}, destroying it",
                    handle.id(),
                    self.inner.id
                );
                Some(handle)
            } else if state.closed {
                Some(handle)
            } else {
                handle.touch();
                state.check_in(handle);
                None
            }
        };

        if let Some(handle) = rejected {
            self.inner.destroy_resource(handle.into_resource()).await;
        }
    }

    /// Runs `f` with a pooled resource, releasing it afterwards whatever
    /// `f` returns.
    pub async fn execute<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut M::Resource) -> BoxFuture<'a, Result<R, E>>,
        E: From<PoolError>,
    {
        let mut handle = self.acquire().await?;
        let outcome = f(handle.resource_mut()).await;
        self.release(handle).await;
        outcome
    }

    /// Fails pending waiters, destroys idle handles and stops eviction.
    /// Handles still on loan are destroyed when they are released.
    pub async fn close(&self) {
        if let Some(evictor) = self
            .evictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            evictor.abort();
        }

        let idle: Vec<_> = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders wakes every waiter with `PoolError::Closed`.
            state.waiters.clear();
            state.idle.drain(..).collect()
        };

        for handle in idle {
            self.inner.destroy_resource(handle.into_resource()).await;
        }

        info!("Closed resource pool {}", self.inner.id);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        let available = state.idle.len();
        let in_use = state.in_use.len();
        PoolStats {
            total: available + in_use,
            available,
            in_use,
            waiting: state.waiters.len(),
            max: self.inner.config.max_connections,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ResourceManager> Drop for ResourcePool<M> {
    fn drop(&mut self) {
        if let Some(evictor) = self
            .evictor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            evictor.abort();
        }
    }
}

fn spawn_evictor<M: ResourceManager>(
    pool: Weak<PoolInner<M>>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // skip immediate first tick

        loop {
            timer.tick().await;
            let Some(inner) = pool.upgrade() else {
                break;
            };
            if inner.lock_state().closed {
                break;
            }
            inner.evict_idle().await;
        }
    })
}
