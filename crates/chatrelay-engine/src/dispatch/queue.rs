use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard};

use chatrelay_core::error::Result;

/// Outcome of one `drain_and_apply` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.applied + self.failed
    }
}

/// Many-producer / single-consumer FIFO.
///
/// Producers (listener tasks on any thread) only take the lock to push.
/// The consumer swaps the whole queue out under the lock and applies outside
/// it, so a slow apply never stalls a producer.
///
/// The queue can be closed: `close()` discards what is queued and makes every
/// later `enqueue` a no-op until `open()`. The open flag lives under the same
/// lock as the items, so a producer can never slip an item in behind a close.
pub struct QueueDispatcher<T> {
    inner: Mutex<Slots<T>>,
}

struct Slots<T> {
    items: VecDeque<T>,
    open: bool,
}

impl<T> Default for QueueDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueDispatcher<T> {
    /// An open, empty queue.
    pub fn new() -> Self {
        Self::with_open(true)
    }

    /// A closed, empty queue; producers are ignored until `open()`.
    pub fn closed() -> Self {
        Self::with_open(false)
    }

    fn with_open(open: bool) -> Self {
        Self {
            inner: Mutex::new(Slots {
                items: VecDeque::new(),
                open,
            }),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Push `item` if the queue is open; returns whether it was queued.
    pub fn enqueue(&self, item: T) -> bool {
        let mut slots = self.lock();
        if !slots.open {
            return false;
        }
        slots.items.push_back(item);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Close and drop everything queued; returns how many items were discarded.
    pub fn close(&self) -> usize {
        let mut slots = self.lock();
        slots.open = false;
        std::mem::take(&mut slots.items).len()
    }

    /// Drop everything queued; returns how many items were discarded.
    pub fn clear(&self) -> usize {
        std::mem::take(&mut self.lock().items).len()
    }

    /// Apply every item queued at call time, in FIFO order.
    ///
    /// A failing or panicking item is logged and skipped.
    pub fn drain_and_apply<F>(&self, mut apply: F) -> DrainReport
    where
        F: FnMut(T) -> Result<()>,
    {
        let batch = std::mem::take(&mut self.lock().items);
        let mut report = DrainReport::default();

        for item in batch {
            match std::panic::catch_unwind(AssertUnwindSafe(|| apply(item))) {
                Ok(Ok(())) => report.applied += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(code = e.code().as_str(), error = %e, "apply failed; item skipped");
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!("apply panicked; item skipped");
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::error::RelayError;
    use std::sync::Arc;

    #[test]
    fn applies_in_enqueue_order() {
        let q = QueueDispatcher::new();
        for i in 0..5 {
            q.enqueue(i);
        }
        let mut seen = Vec::new();
        let report = q.drain_and_apply(|i| {
            seen.push(i);
            Ok(())
        });
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(report, DrainReport { applied: 5, failed: 0 });
        assert!(q.is_empty());
    }

    #[test]
    fn bad_items_do_not_block_later_ones() {
        let q = QueueDispatcher::new();
        for i in 0..4 {
            q.enqueue(i);
        }
        let mut seen = Vec::new();
        let report = q.drain_and_apply(|i| {
            if i == 1 {
                return Err(RelayError::Apply("host refused".into()));
            }
            if i == 2 {
                panic!("host exploded");
            }
            seen.push(i);
            Ok(())
        });
        assert_eq!(seen, vec![0, 3]);
        assert_eq!(report, DrainReport { applied: 2, failed: 2 });
    }

    #[test]
    fn per_producer_order_survives_concurrent_enqueue() {
        let q = Arc::new(QueueDispatcher::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for n in 0..250u32 {
                        q.enqueue((p, n));
                    }
                })
            })
            .collect();
        for h in producers {
            h.join().unwrap();
        }

        let mut applied = Vec::new();
        q.drain_and_apply(|item| {
            applied.push(item);
            Ok(())
        });
        assert_eq!(applied.len(), 1000);
        for p in 0..4u32 {
            let mine: Vec<u32> = applied.iter().filter(|(who, _)| *who == p).map(|(_, n)| *n).collect();
            assert_eq!(mine, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn items_enqueued_during_apply_wait_for_next_tick() {
        let q = QueueDispatcher::new();
        q.enqueue(1);
        let report = q.drain_and_apply(|i| {
            q.enqueue(i + 1);
            Ok(())
        });
        assert_eq!(report.total(), 1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.clear(), 1);
    }

    #[test]
    fn closed_queue_rejects_until_reopened() {
        let q = QueueDispatcher::closed();
        assert!(!q.enqueue(1));
        q.open();
        assert!(q.enqueue(2));
        assert!(q.enqueue(3));
        assert_eq!(q.close(), 2);
        assert!(!q.is_open());
        assert!(!q.enqueue(4));
        assert_eq!(q.drain_and_apply(|_| Ok(())).total(), 0);
    }

    #[test]
    fn close_racing_producers_leaves_nothing_behind() {
        for _ in 0..200 {
            let q = Arc::new(QueueDispatcher::new());
            let producer = {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut accepted_after_close = 0;
                    for n in 0..500u32 {
                        let closed_before = !q.is_open();
                        if q.enqueue(n) && closed_before {
                            accepted_after_close += 1;
                        }
                    }
                    accepted_after_close
                })
            };
            q.close();
            assert_eq!(producer.join().unwrap(), 0);
            assert!(q.is_empty());
        }
    }
}
