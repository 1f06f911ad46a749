//! Per-agent async inbox queue.
//!
//! [`AsyncMessageQueue`] is the suspension point of every agent: `Yield`
//! waits, cross-agent call replies, and meeting broadcasts all arrive
//! here.  The queue supports **selective receive** -- a `get` with a
//! predicate consumes only the first matching message and leaves every
//! non-matching message queued in its original order.
//!
//! The queue is bounded.  On overflow the oldest message is dropped (a
//! blocking producer could deadlock an agent that is both producer and
//! consumer via cross-agent calls); the drop counter is exposed through
//! [`QueueStats`].
//!
//! Cancellation safety: a message is removed from the queue synchronously,
//! inside the same poll that returns it, so a cancelled `get` can neither
//! drop nor duplicate a message.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{KernelError, Result};
use crate::message::Message;

/// Default bound on queued messages.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages currently queued.
    pub size: usize,
    /// Maximum queued messages before drop-oldest kicks in.
    pub capacity: usize,
    /// Messages accepted over the queue's lifetime.
    pub total_received: u64,
    /// Messages handed to consumers over the queue's lifetime.
    pub total_delivered: u64,
    /// Messages dropped due to overflow.
    pub dropped: u64,
    /// Whether the queue has been closed.
    pub closed: bool,
}

struct QueueInner {
    messages: VecDeque<Message>,
    closed: bool,
    total_received: u64,
    total_delivered: u64,
    dropped: u64,
}

/// Bounded async message queue with predicate-based selective receive.
pub struct AsyncMessageQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl Default for AsyncMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncMessageQueue {
    /// Create a queue with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a queue bounded at `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                messages: VecDeque::new(),
                closed: false,
                total_received: 0,
                total_delivered: 0,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append a message.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueClosed`] if the queue was closed.
    pub fn put(&self, message: Message) -> Result<()> {
        self.put_inner(message, false)
    }

    /// Insert a message at the front of the queue.
    pub fn put_priority(&self, message: Message) -> Result<()> {
        self.put_inner(message, true)
    }

    fn put_inner(&self, message: Message, priority: bool) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return Err(KernelError::QueueClosed);
            }
            if inner.messages.len() >= self.capacity {
                inner.messages.pop_front();
                inner.dropped += 1;
                tracing::warn!(
                    capacity = self.capacity,
                    dropped = inner.dropped,
                    "inbox overflow, dropped oldest message"
                );
            }
            if priority {
                inner.messages.push_front(message);
            } else {
                inner.messages.push_back(message);
            }
            inner.total_received += 1;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Await the next message, in arrival order.
    pub async fn get(&self) -> Result<Message> {
        self.get_where(|_| true, None).await
    }

    /// Await the first message satisfying `predicate`.
    ///
    /// Non-matching messages are not consumed; they remain queued in their
    /// original order.  With `timeout = None` this waits indefinitely.
    ///
    /// # Errors
    ///
    /// [`KernelError::ReceiveTimeout`] on expiry (queue state unchanged),
    /// [`KernelError::QueueClosed`] once the queue is closed and holds no
    /// matching message.
    pub async fn get_where<P>(&self, predicate: P, timeout: Option<Duration>) -> Result<Message>
    where
        P: Fn(&Message) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(pos) = inner.messages.iter().position(&predicate) {
                    let message = inner
                        .messages
                        .remove(pos)
                        .expect("position() returned a valid index");
                    inner.total_delivered += 1;
                    return Ok(message);
                }
                if inner.closed {
                    return Err(KernelError::QueueClosed);
                }
                // Register for wakeups before releasing the lock so a put
                // racing with this get cannot be missed.
                notified.as_mut().enable();
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        let waited_ms = timeout.unwrap_or_default().as_millis() as u64;
                        return Err(KernelError::ReceiveTimeout { waited_ms });
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Collect up to `max_messages` matching messages.
    ///
    /// Returns as soon as at least `min_messages` matches are available, or
    /// when `timeout` expires -- in which case whatever was collected so far
    /// (possibly nothing) is returned.
    pub async fn get_batch<P>(
        &self,
        predicate: P,
        max_messages: usize,
        min_messages: usize,
        timeout: Duration,
    ) -> Vec<Message>
    where
        P: Fn(&Message) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::new();

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                let mut index = 0;
                while index < inner.messages.len() && batch.len() < max_messages {
                    if predicate(&inner.messages[index]) {
                        let message = inner
                            .messages
                            .remove(index)
                            .expect("index bounds checked above");
                        inner.total_delivered += 1;
                        batch.push(message);
                    } else {
                        index += 1;
                    }
                }
                if batch.len() >= min_messages.min(max_messages) || inner.closed {
                    return batch;
                }
                notified.as_mut().enable();
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return batch;
            }
        }
    }

    /// Look at the next message without consuming it.
    pub fn peek(&self) -> Option<Message> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.messages.front().cloned()
    }

    /// Remove every queued message satisfying `predicate`.
    ///
    /// Returns the number of messages removed.
    pub fn remove<P>(&self, predicate: P) -> usize
    where
        P: Fn(&Message) -> bool,
    {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let before = inner.messages.len();
        inner.messages.retain(|m| !predicate(m));
        before - inner.messages.len()
    }

    /// Drop every queued message.  Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let count = inner.messages.len();
        inner.messages.clear();
        count
    }

    /// Close the queue.  Subsequent `put`s fail; pending `get`s complete as
    /// the remaining messages drain, then observe [`KernelError::QueueClosed`].
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Messages currently queued.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").messages.len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }

    /// Snapshot of queue counters.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock poisoned");
        QueueStats {
            size: inner.messages.len(),
            capacity: self.capacity,
            total_received: inner.total_received,
            total_delivered: inner.total_delivered,
            dropped: inner.dropped,
            closed: inner.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::message::Message;

    fn msg(content: &str, sender: &str) -> Message {
        Message::direct(sender, "TestAgent", "recipient", "TestAgent", content)
    }

    #[tokio::test]
    async fn basic_put_get() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("hello", "a")).expect("put");
        assert_eq!(queue.size(), 1);

        let received = queue.get().await.expect("get");
        assert_eq!(received.content, "hello");
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn predicate_leaves_non_matching_in_order() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("msg1", "agent1")).expect("put");
        queue.put(msg("msg2", "agent2")).expect("put");
        queue.put(msg("msg3", "agent1")).expect("put");

        let from_agent2 = queue
            .get_where(|m| m.sender_id == "agent2", None)
            .await
            .expect("get");
        assert_eq!(from_agent2.content, "msg2");
        assert_eq!(queue.size(), 2);

        // FIFO order preserved for the rest.
        let next = queue.get().await.expect("get");
        assert_eq!(next.content, "msg1");
    }

    #[tokio::test]
    async fn get_times_out_without_consuming() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("other", "x")).expect("put");

        let result = queue
            .get_where(|m| m.sender_id == "never", Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(KernelError::ReceiveTimeout { .. })));
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn batch_returns_immediately_when_min_available() {
        let queue = AsyncMessageQueue::new();
        for i in 0..5 {
            queue.put(msg(&format!("msg{i}"), "a")).expect("put");
        }

        let batch = queue
            .get_batch(|_| true, 3, 1, Duration::from_millis(100))
            .await;
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].content, "msg0");
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn batch_with_predicate_skips_non_matching() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("keep1", "target")).expect("put");
        queue.put(msg("skip1", "other")).expect("put");
        queue.put(msg("keep2", "target")).expect("put");

        let batch = queue
            .get_batch(
                |m| m.sender_id == "target",
                10,
                1,
                Duration::from_millis(50),
            )
            .await;
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn priority_message_comes_first() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("normal", "a")).expect("put");
        queue.put_priority(msg("urgent", "a")).expect("put");

        assert_eq!(queue.get().await.expect("get").content, "urgent");
        assert_eq!(queue.get().await.expect("get").content, "normal");
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("peeked", "a")).expect("put");

        assert_eq!(queue.peek().expect("peek").content, "peeked");
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("keep", "a")).expect("put");
        queue.put(msg("remove-me", "a")).expect("put");

        assert_eq!(queue.remove(|m| m.content.contains("remove")), 1);
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn close_fails_put_and_drains_gets() {
        let queue = AsyncMessageQueue::new();
        queue.put(msg("last", "a")).expect("put");
        queue.close();

        assert!(matches!(
            queue.put(msg("late", "a")),
            Err(KernelError::QueueClosed)
        ));
        // Remaining message still drains.
        assert_eq!(queue.get().await.expect("get").content, "last");
        assert!(matches!(queue.get().await, Err(KernelError::QueueClosed)));
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = AsyncMessageQueue::with_capacity(2);
        queue.put(msg("first", "a")).expect("put");
        queue.put(msg("second", "a")).expect("put");
        queue.put(msg("third", "a")).expect("put");

        assert_eq!(queue.size(), 2);
        assert_eq!(queue.stats().dropped, 1);
        assert_eq!(queue.get().await.expect("get").content, "second");
    }

    #[tokio::test]
    async fn waiting_get_wakes_on_put() {
        let queue = Arc::new(AsyncMessageQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put(msg("wake", "a")).expect("put");

        let received = waiter.await.expect("join").expect("get");
        assert_eq!(received.content, "wake");
    }

    #[tokio::test]
    async fn cancelled_get_neither_drops_nor_duplicates() {
        let queue = Arc::new(AsyncMessageQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        queue.put(msg("survives", "a")).expect("put");
        assert_eq!(queue.get().await.expect("get").content, "survives");
    }
}
