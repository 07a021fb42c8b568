//! Bounded producer/consumer queue with explicit close.
//!
//! Two counting semaphores carry all the blocking: `slots` starts at the
//! capacity and is taken by producers, `filled` starts at zero and is taken
//! by consumers. The `VecDeque` itself sits behind a short mutex that is
//! never held across an `.await`.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::cancellable;
use crate::error::{CoordinationError, Result};

#[derive(Debug)]
struct Buffer<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// HandoffQueue: fixed-capacity FIFO between any number of producers and
/// consumers. Share it behind an `Arc`.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    capacity: usize,
    buffer: Mutex<Buffer<T>>,
    slots: Semaphore,
    filled: Semaphore,
    closed: CancellationToken,
}

impl<T> HandoffQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CoordinationError::invalid(
                "capacity",
                "buffer capacity must be greater than zero",
            ));
        }

        Ok(Self {
            capacity,
            buffer: Mutex::new(Buffer {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            slots: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            closed: CancellationToken::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_adding_completed(&self) -> bool {
        self.buffer.lock().closed
    }

    /// Waits for a free slot, then appends `item` at the tail.
    ///
    /// Fails with `QueueClosed` if the queue was closed before or while
    /// waiting; the item is dropped and no slot is consumed.
    pub async fn add(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        let slot = cancellable(cancel, self.slots.acquire())
            .await?
            .map_err(|_| CoordinationError::QueueClosed)?;

        let mut buffer = self.buffer.lock();
        if buffer.closed {
            // `slot` goes back to the semaphore on drop.
            return Err(CoordinationError::QueueClosed);
        }
        buffer.items.push_back(item);
        slot.forget();
        // Published under the lock so a consumer that sees the close also
        // sees every item pushed before it.
        self.filled.add_permits(1);
        debug!(backlog = buffer.items.len(), "item added");
        Ok(())
    }

    /// Waits for an item and removes it from the head.
    ///
    /// Once the queue is closed and empty this fails with `QueueDrained`
    /// instead of waiting forever.
    pub async fn take(&self, cancel: &CancellationToken) -> Result<T> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoordinationError::OperationCancelled),
            permit = self.filled.acquire() => permit.map_err(|_| CoordinationError::QueueDrained)?,
            _ = self.closed.cancelled() => match self.filled.try_acquire() {
                Ok(permit) => permit,
                Err(_) => return Err(CoordinationError::QueueDrained),
            },
        };
        permit.forget();
        self.pop_reserved()
    }

    /// Non-blocking take: `Ok(None)` when the queue is empty but still open.
    pub fn try_take(&self) -> Result<Option<T>> {
        // Read the flag first: once closed, every queued item already has
        // its permit published.
        let closed = self.is_adding_completed();
        match self.filled.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.pop_reserved().map(Some)
            }
            Err(_) if closed => Err(CoordinationError::QueueDrained),
            Err(_) => Ok(None),
        }
    }

    /// Closes the queue for adding. Calling it again does nothing.
    ///
    /// Items already queued stay available to `take`. Blocked consumers wake
    /// up and observe the close once the backlog is gone; blocked producers
    /// wake up with `QueueClosed`.
    pub fn complete_adding(&self) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.closed {
                return;
            }
            buffer.closed = true;
            debug!(backlog = buffer.items.len(), "adding completed");
        }
        self.slots.close();
        self.closed.cancel();
    }

    // The caller already holds a `filled` permit, so an item is guaranteed
    // to be queued for it.
    fn pop_reserved(&self) -> Result<T> {
        let item = {
            let mut buffer = self.buffer.lock();
            buffer.items.pop_front().ok_or(CoordinationError::QueueDrained)?
        };
        self.slots.add_permits(1);
        Ok(item)
    }
}
