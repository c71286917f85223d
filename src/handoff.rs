//! Bounded single-producer/single-consumer FIFO that connects the block
//! producer to the persistence drain.
//!
//! The channel is the only backpressure point of the pipeline. A capacity of
//! `n > 0` lets the producer run `n` records ahead of the drain; a capacity of
//! zero turns every send into a rendezvous that only completes once the drain
//! has taken the record.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

struct HandoffState<T> {
    items: VecDeque<T>,
    sent: u64,
    taken: u64,
    sender_closed: bool,
    receiver_closed: bool,
}

struct Shared<T> {
    state: Mutex<HandoffState<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, HandoffState<T>> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of records that may sit in the buffer at once. A rendezvous
    /// channel still parks one record while the drain picks it up.
    fn slots(&self) -> usize {
        self.capacity.max(1)
    }
}

/// Returned when the receiving side has gone away before the record was queued.
pub struct HandoffClosed<T>(pub T);

impl<T> fmt::Debug for HandoffClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandoffClosed(..)")
    }
}

impl<T> fmt::Display for HandoffClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("handoff channel receiver dropped")
    }
}

impl<T> std::error::Error for HandoffClosed<T> {}

/// Creates a handoff channel with the given capacity (zero means rendezvous).
pub fn channel<T>(capacity: usize) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(HandoffState {
            items: VecDeque::with_capacity(capacity.max(1)),
            sent: 0,
            taken: 0,
            sender_closed: false,
            receiver_closed: false,
        }),
        notify: Notify::new(),
        capacity,
    });

    (
        HandoffSender {
            shared: shared.clone(),
        },
        HandoffReceiver { shared },
    )
}

/// Position of an enqueued item in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Producing half. Dropping it (or calling [`HandoffSender::close`]) lets the
/// receiver finish once the buffer is drained.
pub struct HandoffSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffSender<T> {
    /// Queues `item`, waiting while the buffer is full.
    ///
    /// For a zero-capacity channel the call additionally waits until the
    /// receiver has taken the item. Dropping the returned future before the
    /// item was queued drops the item.
    pub async fn send(&self, item: T) -> Result<(), HandoffClosed<T>> {
        let ticket = self.enqueue(item).await?;
        self.delivered(ticket).await;
        Ok(())
    }

    /// Places `item` in the buffer, waiting only for a free slot.
    ///
    /// Once this returns the item belongs to the receiver even if the caller
    /// never awaits [`HandoffSender::delivered`].
    pub async fn enqueue(&self, item: T) -> Result<Ticket, HandoffClosed<T>> {
        let mut pending = Some(item);
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if state.receiver_closed {
                    if let Some(item) = pending.take() {
                        return Err(HandoffClosed(item));
                    }
                }
                if state.items.len() < self.shared.slots() {
                    if let Some(item) = pending.take() {
                        state.items.push_back(item);
                        state.sent += 1;
                        let ticket = Ticket(state.sent);
                        drop(state);
                        self.shared.notify.notify_waiters();
                        return Ok(ticket);
                    }
                }
            }
            notified.await;
        }
    }

    /// Completes the rendezvous of a zero-capacity channel: waits until the
    /// receiver took the item behind `ticket` (or went away). Returns at once
    /// for buffered channels.
    pub async fn delivered(&self, ticket: Ticket) {
        if self.shared.capacity > 0 {
            return;
        }
        loop {
            let notified = self.shared.notify.notified();
            {
                let state = self.shared.lock();
                if state.taken >= ticket.0 || state.receiver_closed {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Marks the channel closed. Records already queued stay available to the receiver.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.sender_closed {
            return;
        }
        state.sender_closed = true;
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Number of records queued but not yet taken by the receiver.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consuming half.
pub struct HandoffReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffReceiver<T> {
    /// Returns the next record in send order, or `None` once the sender closed
    /// and every queued record has been taken.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if let Some(item) = state.items.pop_front() {
                    state.taken += 1;
                    drop(state);
                    self.shared.notify.notify_waiters();
                    return Some(item);
                }
                if state.sender_closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for HandoffReceiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receiver_closed = true;
        drop(state);
        self.shared.notify.notify_waiters();
    }
}
