//! Growable circular work queue used to hand items from producers to a consumer thread.
//!
//! The queue keeps its items in a ring of `Option<T>` slots. When the ring is full it
//! doubles and linearises its contents; when a dequeue leaves it less than one eighth
//! occupied (and it is larger than both [`MIN_SHRINK_SIZE`] and the suggested size it was
//! created with) it halves again.
//!
//! # Example
//!
//! ```
//! use prometheus_invoker::core::WorkQueue;
//!
//! let queue = WorkQueue::new();
//! queue.append(1);
//! queue.append(2);
//! queue.append(3);
//!
//! assert_eq!(queue.get(), 1);
//! assert_eq!(queue.get(), 2);
//! assert_eq!(queue.get(), 3);
//! assert_eq!(queue.get_non_blocking(), None);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Capacity at or below which a queue never shrinks.
pub const MIN_SHRINK_SIZE: usize = 1024;

/// Suggested capacity used by [`WorkQueue::new`].
pub const DEFAULT_SUGGESTED_SIZE: usize = 4;

/// Ring buffer state, only ever touched with the queue lock held.
struct Ring<T> {
    items: Vec<Option<T>>,
    count: usize,
    start: usize,
    end: usize,
    suggested_size: usize,
}

impl<T> Ring<T> {
    fn new(suggested_size: usize) -> Self {
        Self {
            items: empty_slots(suggested_size),
            count: 0,
            start: 0,
            end: 0,
            suggested_size,
        }
    }

    fn size(&self) -> usize {
        self.items.len()
    }

    fn push_back(&mut self, item: T) {
        if self.count == self.size() {
            self.grow();
        }
        self.items[self.end] = Some(item);
        self.end = (self.end + 1) % self.size();
        self.count += 1;
    }

    fn push_front(&mut self, item: T) {
        if self.count == self.size() {
            self.grow();
        }
        self.start = if self.start == 0 { self.size() - 1 } else { self.start - 1 };
        self.items[self.start] = Some(item);
        self.count += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.items[self.start].take();
        self.start = (self.start + 1) % self.size();
        self.count -= 1;

        let size = self.size();
        if size > MIN_SHRINK_SIZE && size > self.suggested_size && self.count < (size >> 3) {
            self.shrink();
        }
        item
    }

    /// Doubles the capacity, copying the live window to the front of the new ring.
    fn grow(&mut self) {
        let new_size = self.size() * 2;
        self.relocate(new_size);
    }

    /// Halves the capacity. Handles the window wrapping past the end of the ring.
    fn shrink(&mut self) {
        let new_size = self.size() / 2;
        self.relocate(new_size);
    }

    fn relocate(&mut self, new_size: usize) {
        debug_assert!(new_size >= self.count);
        let size = self.size();
        let mut items = empty_slots(new_size);
        for (offset, slot) in items.iter_mut().take(self.count).enumerate() {
            *slot = self.items[(self.start + offset) % size].take();
        }
        self.items = items;
        self.start = 0;
        self.end = self.count % new_size;
    }

    fn reset(&mut self) {
        self.items = empty_slots(self.suggested_size);
        self.count = 0;
        self.start = 0;
        self.end = 0;
    }
}

fn empty_slots<T>(size: usize) -> Vec<Option<T>> {
    let mut items = Vec::with_capacity(size);
    items.resize_with(size, || None);
    items
}

/// Thread-safe FIFO queue with blocking and non-blocking dequeue.
///
/// All state sits behind a single `parking_lot::Mutex`; consumers wait on a `Condvar`
/// and always re-check the item count after waking, so spurious wake-ups are harmless.
///
/// [`append`](Self::append) only wakes a waiter when the queue was empty, which is the
/// right policy for a single consumer. With several consumers, use
/// [`append_loud`](Self::append_loud) so that every item wakes one of them.
pub struct WorkQueue<T> {
    ring: Mutex<Ring<T>>,
    available: Condvar,
}

impl<T> WorkQueue<T> {
    /// Creates a queue with the default suggested capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUGGESTED_SIZE)
    }

    /// Creates a queue whose initial (and minimum after shrinking) capacity is
    /// `suggested_size`. A zero size is bumped to one.
    #[must_use]
    pub fn with_capacity(suggested_size: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::new(suggested_size.max(1))),
            available: Condvar::new(),
        }
    }

    /// Appends an item, waking a consumer if and only if the queue was empty.
    pub fn append(&self, item: T) {
        let mut ring = self.ring.lock();
        let was_empty = ring.count == 0;
        ring.push_back(item);
        if was_empty {
            self.available.notify_one();
        }
    }

    /// Appends an item without waking anyone. Useful for appending a batch of items
    /// followed by a final [`append_loud`](Self::append_loud).
    pub fn append_silent(&self, item: T) {
        self.ring.lock().push_back(item);
    }

    /// Appends an item and wakes one waiter regardless of the previous queue length.
    pub fn append_loud(&self, item: T) {
        self.ring.lock().push_back(item);
        self.available.notify_one();
    }

    /// Inserts an item at the head of the queue so it is dequeued next.
    pub fn prepend(&self, item: T) {
        let mut ring = self.ring.lock();
        ring.push_front(item);
        if ring.count == 1 {
            self.available.notify_one();
        }
    }

    /// Removes and returns the head item, blocking until one is available.
    pub fn get(&self) -> T {
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = ring.pop_front() {
                return item;
            }
            self.available.wait(&mut ring);
        }
    }

    /// Removes and returns the head item, waiting at most `max_wait` for one to arrive.
    ///
    /// Returns `None` if the queue is still empty when the wait runs out. A zero
    /// duration behaves like [`get_non_blocking`](Self::get_non_blocking).
    pub fn get_timeout(&self, max_wait: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(max_wait);
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = ring.pop_front() {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    self.available.wait_until(&mut ring, deadline);
                }
                // too far in the future to represent, so wait without a bound
                None => self.available.wait(&mut ring),
            }
        }
    }

    /// Removes and returns the head item, or `None` if the queue is empty.
    pub fn get_non_blocking(&self) -> Option<T> {
        self.ring.lock().pop_front()
    }

    /// Blocks until the queue holds at least one item, without removing it.
    pub fn wait_for_item(&self) {
        let mut ring = self.ring.lock();
        while ring.count == 0 {
            self.available.wait(&mut ring);
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    /// Returns true if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot capacity of the ring.
    pub fn capacity(&self) -> usize {
        self.ring.lock().size()
    }

    /// Drops all queued items and restores the suggested capacity.
    pub fn clear(&self) {
        self.ring.lock().reset();
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        let size = ring.size();
        let elements: Vec<_> = (0..ring.count)
            .filter_map(|offset| ring.items[(ring.start + offset) % size].as_ref())
            .collect();
        f.debug_struct("WorkQueue")
            .field("count", &ring.count)
            .field("size", &size)
            .field("start", &ring.start)
            .field("end", &ring.end)
            .field("elements", &elements)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn drain<T>(queue: &WorkQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| queue.get_non_blocking()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        for i in 0..3 {
            queue.append(i);
        }
        assert_eq!(queue.get(), 0);
        assert_eq!(queue.get(), 1);
        assert_eq!(queue.get(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_grows_when_full() {
        let queue = WorkQueue::new();
        for i in 0..5 {
            queue.append(i);
        }
        assert_eq!(queue.capacity(), 8);
        assert_eq!(drain(&queue), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_grow_while_wrapped() {
        let queue = WorkQueue::new();
        // move the window forward so the next appends wrap around the ring
        for i in 0..3 {
            queue.append(i);
        }
        for _ in 0..3 {
            queue.get();
        }
        for i in 3..9 {
            queue.append(i);
        }
        assert_eq!(drain(&queue), (3..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_prepend_jumps_queue() {
        let queue = WorkQueue::new();
        queue.append(1);
        queue.append(2);
        queue.prepend(0);
        assert_eq!(drain(&queue), vec![0, 1, 2]);
    }

    #[test]
    fn test_prepend_into_empty_and_full() {
        let queue = WorkQueue::with_capacity(2);
        queue.prepend(2);
        queue.prepend(1);
        queue.prepend(0);
        assert_eq!(queue.capacity(), 4);
        assert_eq!(drain(&queue), vec![0, 1, 2]);
    }

    #[test]
    fn test_shrinks_after_draining() {
        let queue = WorkQueue::new();
        for i in 0..4096 {
            queue.append(i);
        }
        assert_eq!(queue.capacity(), 4096);
        let drained = drain(&queue);
        assert_eq!(drained, (0..4096).collect::<Vec<_>>());
        assert!(queue.capacity() <= MIN_SHRINK_SIZE);
    }

    #[test]
    fn test_shrink_with_wrapped_window() {
        let mut ring = Ring::new(4);
        ring.items = empty_slots(2048);
        ring.start = 1900;
        ring.end = 1900;
        for i in 0..256 {
            ring.push_back(i);
        }
        assert!(ring.start > ring.end);

        // dropping to 255 of 2048 slots crosses the one-eighth mark
        assert_eq!(ring.pop_front(), Some(0));
        assert_eq!(ring.size(), 1024);
        let rest: Vec<_> = std::iter::from_fn(|| ring.pop_front()).collect();
        assert_eq!(rest, (1..256).collect::<Vec<_>>());
    }

    #[test]
    fn test_get_timeout_returns_none_when_empty() {
        let queue = WorkQueue::<u32>::new();
        let started = Instant::now();
        assert_eq!(queue.get_timeout(Duration::from_millis(20)), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_get_timeout_zero_is_a_poll() {
        let queue = WorkQueue::new();
        assert_eq!(queue.get_timeout(Duration::ZERO), None);
        queue.append(7);
        assert_eq!(queue.get_timeout(Duration::ZERO), Some(7));
    }

    #[test]
    fn test_blocking_get_wakes_on_append() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get())
        };
        thread::sleep(Duration::from_millis(20));
        queue.append("hello");
        assert_eq!(consumer.join().unwrap(), "hello");
    }

    #[test]
    fn test_append_loud_wakes_each_consumer() {
        let queue = Arc::new(WorkQueue::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.get())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        for i in 0..3 {
            queue.append_loud(i);
        }
        let mut got: Vec<_> = consumers.into_iter().map(|h| h.join().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[test]
    fn test_clear_restores_suggested_capacity() {
        let queue = WorkQueue::with_capacity(2);
        for i in 0..10 {
            queue.append_silent(i);
        }
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn test_debug_lists_elements_in_order() {
        let queue = WorkQueue::new();
        queue.append(1);
        queue.append(2);
        let rendered = format!("{queue:?}");
        assert!(rendered.contains("count: 2"));
        assert!(rendered.contains("elements: [1, 2]"));
    }
}
