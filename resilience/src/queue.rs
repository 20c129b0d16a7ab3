//! Bounded queues with overflow strategies and watermark callbacks
//!
//! [`BoundedQueue`] is the synchronous core: fixed capacity, an overflow
//! strategy, counters and optional drop/watermark hooks. [`AsyncBoundedQueue`]
//! wraps it for producer/consumer use where consumers may block until an item
//! arrives. [`PriorityQueue`] is the priority-ordered variant.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};

use crate::error::{ResilienceError, ResilienceResult};

/// What to do with an enqueue once the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Refuse the new item with a queue-full error
    Reject,
    /// Evict the oldest item to make room
    DropOldest,
    /// Discard the new item silently (reported via the drop counter)
    DropNewest,
}

/// Lifetime counters for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub rejected: u64,
}

type ItemHook<T> = Box<dyn FnMut(&T) + Send>;
type LevelHook = Box<dyn FnMut(usize) + Send>;

const HIGH_WATER_RATIO: f64 = 0.8;
const LOW_WATER_RATIO: f64 = 0.2;

/// Fixed-capacity FIFO queue with overflow handling
///
/// Watermark callbacks fire once per crossing: the high-water hook when the
/// fill level first reaches 80% of capacity, the low-water hook when it then
/// drains back to 20%. Between the two marks nothing re-fires, so a level
/// hovering near one mark cannot spam the hooks.
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    strategy: OverflowStrategy,
    counters: QueueCounters,
    high_mark: usize,
    low_mark: usize,
    above_high: bool,
    on_drop: Option<ItemHook<T>>,
    on_high_water: Option<LevelHook>,
    on_low_water: Option<LevelHook>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            strategy,
            counters: QueueCounters::default(),
            high_mark: ((capacity as f64) * HIGH_WATER_RATIO).ceil() as usize,
            low_mark: ((capacity as f64) * LOW_WATER_RATIO).floor() as usize,
            above_high: false,
            on_drop: None,
            on_high_water: None,
            on_low_water: None,
        }
    }

    /// Observe every item discarded by an overflow strategy
    pub fn with_drop_hook(mut self, hook: impl FnMut(&T) + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    /// Observe the fill level reaching the high-water mark
    pub fn with_high_water_hook(mut self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        self.on_high_water = Some(Box::new(hook));
        self
    }

    /// Observe the fill level draining back to the low-water mark
    pub fn with_low_water_hook(mut self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        self.on_low_water = Some(Box::new(hook));
        self
    }

    /// Add an item, applying the overflow strategy when full
    ///
    /// Returns `Ok(true)` when the item was admitted, `Ok(false)` when the
    /// drop-newest strategy discarded it, and a queue-full error under the
    /// reject strategy.
    pub fn enqueue(&mut self, item: T) -> ResilienceResult<bool> {
        if self.items.len() >= self.capacity {
            match self.strategy {
                OverflowStrategy::Reject => {
                    self.counters.rejected += 1;
                    return Err(ResilienceError::QueueFull {
                        capacity: self.capacity,
                    });
                }
                OverflowStrategy::DropOldest => {
                    if let Some(evicted) = self.items.pop_front() {
                        self.counters.dropped += 1;
                        if let Some(hook) = &mut self.on_drop {
                            hook(&evicted);
                        }
                    }
                }
                OverflowStrategy::DropNewest => {
                    self.counters.dropped += 1;
                    if let Some(hook) = &mut self.on_drop {
                        hook(&item);
                    }
                    return Ok(false);
                }
            }
        }

        self.items.push_back(item);
        self.counters.enqueued += 1;
        self.check_watermarks();
        Ok(true)
    }

    pub fn dequeue(&mut self) -> Option<T> {
        let item = self.items.pop_front();
        if item.is_some() {
            self.counters.dequeued += 1;
            self.check_watermarks();
        }
        item
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn counters(&self) -> QueueCounters {
        self.counters
    }

    /// Count an item that bypassed storage by being handed straight to a
    /// waiting consumer
    pub(crate) fn record_passthrough(&mut self) {
        self.counters.enqueued += 1;
        self.counters.dequeued += 1;
    }

    fn check_watermarks(&mut self) {
        let level = self.items.len();
        if !self.above_high && level >= self.high_mark {
            self.above_high = true;
            if let Some(hook) = &mut self.on_high_water {
                hook(level);
            }
        } else if self.above_high && level <= self.low_mark {
            self.above_high = false;
            if let Some(hook) = &mut self.on_low_water {
                hook(level);
            }
        }
    }
}

struct AsyncInner<T> {
    queue: BoundedQueue<T>,
    waiters: VecDeque<(u64, oneshot::Sender<T>)>,
    next_waiter_id: u64,
}

/// Concurrent bounded queue whose consumers can block for the next item
///
/// An enqueue satisfies a waiting consumer directly before touching the
/// queue's storage; counters still record the item as enqueued and dequeued.
pub struct AsyncBoundedQueue<T> {
    inner: Mutex<AsyncInner<T>>,
}

impl<T: Send> AsyncBoundedQueue<T> {
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        Self {
            inner: Mutex::new(AsyncInner {
                queue: BoundedQueue::new(capacity, strategy),
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
        }
    }

    /// Add an item, preferring a blocked consumer over queue storage
    pub async fn enqueue(&self, item: T) -> ResilienceResult<bool> {
        let mut inner = self.inner.lock().await;
        let mut item = item;
        while let Some((_, waiter)) = inner.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => {
                    inner.queue.record_passthrough();
                    return Ok(true);
                }
                // Consumer gave up while queued; try the next one
                Err(returned) => item = returned,
            }
        }
        inner.queue.enqueue(item)
    }

    /// Take the next item if one is stored, without waiting
    pub async fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().await.queue.dequeue()
    }

    /// Wait until an item is available
    pub async fn dequeue(&self) -> T {
        loop {
            let receiver = {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.queue.dequeue() {
                    return item;
                }
                let id = inner.next_waiter_id;
                inner.next_waiter_id += 1;
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back((id, tx));
                rx
            };

            if let Ok(item) = receiver.await {
                return item;
            }
        }
    }

    /// Wait up to `limit` for an item
    pub async fn dequeue_timeout(&self, limit: Duration) -> Option<T> {
        let (id, mut receiver) = {
            let mut inner = self.inner.lock().await;
            if let Some(item) = inner.queue.dequeue() {
                return Some(item);
            }
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back((id, tx));
            (id, rx)
        };

        match tokio::time::timeout(limit, &mut receiver).await {
            Ok(Ok(item)) => Some(item),
            Ok(Err(_)) => None,
            Err(_) => {
                // Deregister under the lock; if our sender is already gone an
                // enqueue consumed it, and the item is sitting in the channel
                let mut inner = self.inner.lock().await;
                let was_waiting = inner.waiters.iter().any(|(wid, _)| *wid == id);
                inner.waiters.retain(|(wid, _)| *wid != id);
                drop(inner);
                if was_waiting {
                    None
                } else {
                    receiver.try_recv().ok()
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    pub async fn counters(&self) -> QueueCounters {
        self.inner.lock().await.queue.counters()
    }
}

struct PriorityEntry<T> {
    priority: u32,
    seq: u64,
    item: T,
}

/// Bounded queue that dequeues the lowest priority value first
///
/// Items with equal priority keep their insertion order. Under the
/// drop-oldest strategy the entry that has been queued longest is evicted,
/// regardless of its priority.
pub struct PriorityQueue<T> {
    entries: Vec<PriorityEntry<T>>,
    capacity: usize,
    strategy: OverflowStrategy,
    counters: QueueCounters,
    next_seq: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            strategy,
            counters: QueueCounters::default(),
            next_seq: 0,
        }
    }

    pub fn enqueue(&mut self, item: T, priority: u32) -> ResilienceResult<bool> {
        if self.entries.len() >= self.capacity {
            match self.strategy {
                OverflowStrategy::Reject => {
                    self.counters.rejected += 1;
                    return Err(ResilienceError::QueueFull {
                        capacity: self.capacity,
                    });
                }
                OverflowStrategy::DropOldest => {
                    if let Some(oldest) = self
                        .entries
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.seq)
                        .map(|(idx, _)| idx)
                    {
                        self.entries.remove(oldest);
                        self.counters.dropped += 1;
                    }
                }
                OverflowStrategy::DropNewest => {
                    self.counters.dropped += 1;
                    return Ok(false);
                }
            }
        }

        let entry = PriorityEntry {
            priority,
            seq: self.next_seq,
            item,
        };
        self.next_seq += 1;

        let position = self
            .entries
            .partition_point(|e| (e.priority, e.seq) <= (entry.priority, entry.seq));
        self.entries.insert(position, entry);
        self.counters.enqueued += 1;
        Ok(true)
    }

    pub fn dequeue(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = self.entries.remove(0);
        self.counters.dequeued += 1;
        Some(entry.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.entries.first().map(|e| &e.item)
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

    pub fn counters(&self) -> QueueCounters {
        self.counters
    }
}
