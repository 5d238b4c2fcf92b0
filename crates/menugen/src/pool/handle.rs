use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

/// A pooled resource on loan from a [`ResourcePool`](super::ResourcePool).
///
/// Handles must be given back with `ResourcePool::release`; a handle that is
/// dropped instead keeps its slot occupied.
#[derive(Debug)]
pub struct PooledHandle<T> {
    id: u64,
    pool_id: u64,
    resource: T,
    created_at: Instant,
    last_used_at: Instant,
}

impl<T> PooledHandle<T> {
    pub(crate) fn new(pool_id: u64, id: u64, resource: T) -> Self {
        let now = Instant::now();
        Self {
            id,
            pool_id,
            resource,
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut T {
        &mut self.resource
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn into_resource(self) -> T {
        self.resource
    }
}

impl<T> Deref for PooledHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> DerefMut for PooledHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}
