//! Object pooling for allocation-heavy short-lived objects
//!
//! Buffers, commands, clients and rooms are leased from pools instead of
//! allocated per message. Pools track usage state so a double lease or a
//! double release is reported as a hard error instead of corrupting state.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::error::{Result, RustyRoomsError};

/// Atomic in-use marker carried by pooled objects that support usage checking
#[derive(Debug, Default)]
pub struct UsageFlag {
    used: AtomicBool,
}

impl UsageFlag {
    pub fn new() -> Self {
        Self {
            used: AtomicBool::new(false),
        }
    }

    /// Whether the object is currently leased out
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    /// Mark the object as leased; fails if it is already in use
    pub fn set_used(&self) -> Result<()> {
        self.used
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RustyRoomsError::PoolState("object is already in use".to_string()))?;
        Ok(())
    }

    /// Mark the object as returned; fails if it is already free
    pub fn set_free(&self) -> Result<()> {
        self.used
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RustyRoomsError::PoolState("object is already free".to_string()))?;
        Ok(())
    }
}

/// Capability of living inside a [`Pool`]
///
/// Objects that can detect double-use expose their [`UsageFlag`]; plain
/// buffers do not and keep the default.
pub trait Reusable {
    fn usage_flag(&self) -> Option<&UsageFlag> {
        None
    }
}

/// Monotonic pool counters
#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    get_calls: AtomicU64,
    free_calls: AtomicU64,
    in_use: AtomicI64,
}

/// Snapshot of a pool's statistics at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects ever constructed by the factory
    pub created: u64,
    /// Calls to [`Pool::get`]
    pub get_calls: u64,
    /// Calls to [`Pool::free`]
    pub free_calls: u64,
    /// Objects currently resting in the pool
    pub pooled: u64,
    /// Objects currently leased out
    pub in_use: u64,
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Recycler<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Generic reusable-object cache
///
/// `get` hands out a previously freed instance when one exists and falls
/// back to the injected factory otherwise. `free` returns the instance for
/// later reuse. Both are safe to call concurrently from many connections;
/// the internal queue is lock-free and reuse order is unspecified.
pub struct Pool<T: Reusable> {
    items: SegQueue<T>,
    factory: Factory<T>,
    recycler: Option<Recycler<T>>,
    counters: PoolCounters,
}

impl<T: Reusable> Pool<T> {
    /// Create an empty pool around a factory
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            items: SegQueue::new(),
            factory: Box::new(factory),
            recycler: None,
            counters: PoolCounters::default(),
        }
    }

    /// Create a pool pre-warmed with `count` instances
    pub fn with_prewarm<F>(factory: F, count: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let pool = Self::new(factory);
        pool.prewarm(count);
        pool
    }

    /// Create a pre-warmed pool whose items are scrubbed on release
    ///
    /// The recycler runs on every `free` before the object is re-pooled;
    /// the command pool uses it to clear stale fields in place.
    pub fn with_recycler<F, R>(factory: F, count: usize, recycler: R) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        let mut pool = Self::new(factory);
        pool.recycler = Some(Box::new(recycler));
        pool.prewarm(count);
        pool
    }

    fn prewarm(&self, count: usize) {
        for _ in 0..count {
            let item = (self.factory)();
            self.counters.created.fetch_add(1, Ordering::Relaxed);
            self.items.push(item);
        }
    }

    /// Lease an object, constructing a fresh one when the pool is dry
    pub fn get(&self) -> Result<T> {
        self.counters.get_calls.fetch_add(1, Ordering::Relaxed);

        let item = match self.items.pop() {
            Some(item) => item,
            None => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        };

        if let Some(flag) = item.usage_flag() {
            flag.set_used()?;
        }

        self.counters.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(item)
    }

    /// Return a leased object to the pool
    pub fn free(&self, mut item: T) -> Result<()> {
        if let Some(flag) = item.usage_flag() {
            flag.set_free()?;
        }

        if let Some(recycler) = &self.recycler {
            recycler(&mut item);
        }

        self.counters.free_calls.fetch_add(1, Ordering::Relaxed);
        self.counters.in_use.fetch_sub(1, Ordering::Relaxed);
        self.items.push(item);
        Ok(())
    }

    /// Number of objects currently resting in the pool
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            get_calls: self.counters.get_calls.load(Ordering::Relaxed),
            free_calls: self.counters.free_calls.load(Ordering::Relaxed),
            pooled: self.items.len() as u64,
            in_use: self.counters.in_use.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}
