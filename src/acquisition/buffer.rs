//! Backpressure buffer between a network reader task and the pipeline.
//!
//! The reader pushes without blocking and then calls
//! [`FlowBuffer::wait_for_room`] before reading more from its socket. Once
//! the buffer grows past the pause mark the reader sleeps on a watchdog
//! timer until the consumer has drained it below the resume mark.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::defaults;

#[derive(Debug, Clone, Copy)]
pub struct FlowLimits {
    pub pause_above: usize,
    pub resume_below: usize,
    pub recheck: Duration,
}

impl FlowLimits {
    /// SeedLink and Winston.
    pub fn tcp() -> Self {
        Self {
            pause_above: defaults::SOURCE_PAUSE_ABOVE,
            resume_below: defaults::SOURCE_RESUME_BELOW,
            recheck: Duration::from_millis(defaults::SOURCE_RECHECK_MS),
        }
    }

    pub fn fdsn() -> Self {
        Self {
            recheck: Duration::from_millis(defaults::FDSN_RECHECK_MS),
            ..Self::tcp()
        }
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    finished: bool,
}

pub struct FlowBuffer<T> {
    inner: Mutex<Inner<T>>,
    ready: Notify,
    paused: AtomicBool,
    limits: FlowLimits,
}

impl<T> FlowBuffer<T> {
    pub fn new(limits: FlowLimits) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                finished: false,
            }),
            ready: Notify::new(),
            paused: AtomicBool::new(false),
            limits,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        // a poisoned lock only means another thread panicked mid-push
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn push(&self, item: T) {
        self.lock().queue.push_back(item);
        self.ready.notify_one();
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.lock().queue.extend(items);
        self.ready.notify_one();
    }

    /// Mark the end of the stream.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.ready.notify_one();
    }

    /// Block the producer while the buffer is above the pause mark.
    pub async fn wait_for_room(&self) {
        if self.len() <= self.limits.pause_above {
            return;
        }
        self.paused.store(true, Ordering::Relaxed);
        debug!(len = self.len(), "Source buffer full, pausing reads");
        loop {
            tokio::time::sleep(self.limits.recheck).await;
            if self.len() < self.limits.resume_below {
                break;
            }
        }
        self.paused.store(false, Ordering::Relaxed);
        debug!(len = self.len(), "Source buffer drained, resuming reads");
    }

    /// Next item, `None` at end of stream.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.queue.pop_front() {
                    return Some(item);
                }
                if inner.finished {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    /// Up to `max` items, an empty vector at end of stream.
    pub async fn pop_batch(&self, max: usize) -> Vec<T> {
        loop {
            {
                let mut inner = self.lock();
                if !inner.queue.is_empty() {
                    let n = inner.queue.len().min(max.max(1));
                    return inner.queue.drain(..n).collect();
                }
                if inner.finished {
                    return Vec::new();
                }
            }
            self.ready.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limits() -> FlowLimits {
        FlowLimits {
            pause_above: 10,
            resume_below: 4,
            recheck: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let buffer = Arc::new(FlowBuffer::new(limits()));
        let producer = Arc::clone(&buffer);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(7u32);
            producer.finish();
        });
        assert_eq!(buffer.pop().await, Some(7));
        assert_eq!(buffer.pop().await, None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_buffer_drains_before_ending() {
        let buffer = FlowBuffer::new(limits());
        buffer.extend([1, 2, 3]);
        buffer.finish();
        assert_eq!(buffer.pop_batch(2).await, vec![1, 2]);
        assert_eq!(buffer.pop_batch(2).await, vec![3]);
        assert!(buffer.pop_batch(2).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_hysteresis() {
        let buffer = Arc::new(FlowBuffer::new(limits()));
        buffer.extend(0..12);

        let producer = Arc::clone(&buffer);
        let waiter = tokio::spawn(async move { producer.wait_for_room().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(buffer.is_paused());
        assert!(!waiter.is_finished());

        // drain to 5: below pause mark but not below resume mark
        buffer.pop_batch(7).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(buffer.is_paused());
        assert!(!waiter.is_finished());

        // drain to 3: resumes on the next watchdog tick
        buffer.pop_batch(2).await;
        tokio::time::timeout(Duration::from_millis(150), waiter)
            .await
            .expect("producer should resume")
            .unwrap();
        assert!(!buffer.is_paused());
    }

    #[tokio::test]
    async fn test_no_pause_under_mark() {
        let buffer = FlowBuffer::new(limits());
        buffer.extend(0..10);
        tokio::time::timeout(Duration::from_millis(10), buffer.wait_for_room())
            .await
            .expect("should not block");
    }
}
