//! Bounded caches of opened layer resources with two-phase disposal.
//!
//! A cached resource is dropped only after two independent signals fired: the
//! cache evicted it and every lease handed out on it was released. Either one
//! alone leaves it usable, the other one finishes the job.

use crate::error::{GeoLayerError, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The two events that together close a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The last outstanding lease was released.
    Released,
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeState {
    Live,
    /// One signal has fired, the other is still outstanding.
    PendingClose(Signal),
    Closed,
}

#[derive(Debug)]
struct Slot<T> {
    leases: usize,
    released: bool,
    evicted: bool,
    value: Option<Arc<T>>,
}

impl<T> Slot<T> {
    fn close_if_done(&mut self) -> bool {
        if self.evicted && self.leases == 0 {
            self.value = None;
        }
        self.value.is_none()
    }
}

/// A resource shared between a cache and its users.
#[derive(Debug)]
pub struct Disposable<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Disposable<T> {
    pub fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(Slot {
                leases: 0,
                released: false,
                evicted: false,
                value: Some(Arc::new(value)),
            }),
        }
    }

    pub fn state(&self) -> DisposeState {
        let slot = self.slot.lock();
        match (slot.value.is_some(), slot.evicted, slot.released && slot.leases == 0) {
            (false, _, _) => DisposeState::Closed,
            (true, true, _) => DisposeState::PendingClose(Signal::Evicted),
            (true, false, true) => DisposeState::PendingClose(Signal::Released),
            (true, false, false) => DisposeState::Live,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == DisposeState::Closed
    }

    /// Number of leases not yet released.
    pub fn leases(&self) -> usize {
        self.slot.lock().leases
    }

    pub fn get(&self) -> Result<Arc<T>> {
        self.slot
            .lock()
            .value
            .clone()
            .ok_or(GeoLayerError::ResourceClosed)
    }

    /// Hand out a lease that keeps the resource open until it is released.
    pub fn acquire(self: &Arc<Self>) -> Result<Lease<T>> {
        let mut slot = self.slot.lock();
        if slot.value.is_none() {
            return Err(GeoLayerError::ResourceClosed);
        }
        slot.leases += 1;
        Ok(Lease {
            resource: Arc::clone(self),
            released: AtomicBool::new(false),
        })
    }

    /// The cache dropped the resource. Returns whether it is now closed.
    pub fn evict(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.evicted = true;
        slot.close_if_done()
    }

    fn release_lease(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.leases = slot.leases.saturating_sub(1);
        slot.released = true;
        slot.close_if_done()
    }
}

/// One holder's claim on a [`Disposable`]. Released explicitly or on drop,
/// at most once.
#[derive(Debug)]
pub struct Lease<T> {
    resource: Arc<Disposable<T>>,
    released: AtomicBool,
}

impl<T> Lease<T> {
    pub fn get(&self) -> Result<Arc<T>> {
        self.resource.get()
    }

    pub fn resource(&self) -> &Arc<Disposable<T>> {
        &self.resource
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Give the lease back. Returns whether the resource is now closed.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return self.resource.is_closed();
        }
        self.resource.release_lease()
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Least-recently-used map with a fixed capacity.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: FxHashMap<K, (u64, V)>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.0 = tick;
            &entry.1
        })
    }

    /// Insert `value`, returning the entry pushed out to make room.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.tick += 1;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.0 = self.tick;
            let old = std::mem::replace(&mut entry.1, value);
            return Some((key, old));
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries
                .iter()
                .min_by_key(|(_, (tick, _))| *tick)
                .map(|(k, _)| k.clone())
                .and_then(|oldest| self.entries.remove_entry(&oldest))
                .map(|(k, (_, v))| (k, v))
        } else {
            None
        };

        self.entries.insert(key, (self.tick, value));
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries.drain().map(|(k, (_, v))| (k, v))
    }
}

/// Per-bucket LRU caches of disposable resources.
#[derive(Debug)]
pub struct ResourceCache<B, K, T> {
    capacity: usize,
    buckets: FxHashMap<B, LruCache<K, Arc<Disposable<T>>>>,
}

impl<B: Hash + Eq, K: Hash + Eq + Clone, T> ResourceCache<B, K, T> {
    pub fn new(capacity_per_bucket: usize) -> Self {
        Self {
            capacity: capacity_per_bucket.max(1),
            buckets: FxHashMap::default(),
        }
    }

    /// A cached resource that has not been closed yet.
    pub fn get(&mut self, bucket: &B, key: &K) -> Option<Arc<Disposable<T>>> {
        let lru = self.buckets.get_mut(bucket)?;
        let found = lru.get(key).cloned()?;
        if found.is_closed() {
            lru.remove(key);
            return None;
        }
        Some(found)
    }

    pub fn insert(&mut self, bucket: B, key: K, resource: Arc<Disposable<T>>) {
        let capacity = self.capacity;
        let lru = self
            .buckets
            .entry(bucket)
            .or_insert_with(|| LruCache::new(capacity));
        if let Some((_, evicted)) = lru.insert(key, resource) {
            evicted.evict();
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(LruCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict everything.
    pub fn clear(&mut self) {
        for lru in self.buckets.values_mut() {
            for (_, resource) in lru.drain() {
                resource.evict();
            }
        }
        self.buckets.clear();
    }
}

impl<B, K, T> Drop for ResourceCache<B, K, T> {
    fn drop(&mut self) {
        for lru in self.buckets.values() {
            for (_, resource) in lru.entries.values() {
                resource.evict();
            }
        }
    }
}
