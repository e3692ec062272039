//! Bounded worker slots for one listener.
//!
//! Every un-acknowledged message holds exactly one [`WorkerSlot`]. The slot
//! count is the listener's `max_concurrent_messages`; slot ids are handed out
//! round-robin so the same id is never held twice at once.
//!
//! A poll loop reserves slots before each receive. Only slots that were
//! [`occupied`](WorkerSlot::occupy) by a received message count as in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct SlotPool {
    semaphore: Arc<Semaphore>,
    free_ids: Mutex<VecDeque<usize>>,
    capacity: usize,
    occupied: AtomicUsize,
    peak: AtomicUsize,
}

impl SlotPool {
    fn claim(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> WorkerSlot {
        // Ids go back to the pool before their permit, so a permit always finds one
        let id = self
            .free_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();

        WorkerSlot {
            id,
            occupied: false,
            pool: Arc::clone(self),
            _permit: permit,
        }
    }
}

/// Counting pool of worker slots shared by a poll loop and its handler tasks
#[derive(Clone)]
pub struct WorkerSlots {
    pool: Arc<SlotPool>,
}

impl WorkerSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Arc::new(SlotPool {
                semaphore: Arc::new(Semaphore::new(capacity)),
                free_ids: Mutex::new((0..capacity).collect()),
                capacity,
                occupied: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot. Returns `None` only if the pool was closed.
    pub async fn acquire(&self) -> Option<WorkerSlot> {
        let permit = Arc::clone(&self.pool.semaphore)
            .acquire_owned()
            .await
            .ok()?;
        Some(self.pool.claim(permit))
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        let permit = Arc::clone(&self.pool.semaphore).try_acquire_owned().ok()?;
        Some(self.pool.claim(permit))
    }

    /// Wait for one slot, then take up to `max` without waiting further
    pub async fn acquire_up_to(&self, max: usize) -> Vec<WorkerSlot> {
        let Some(first) = self.acquire().await else {
            return Vec::new();
        };

        let mut slots = vec![first];
        while slots.len() < max {
            match self.try_acquire() {
                Some(slot) => slots.push(slot),
                None => break,
            }
        }

        slots
    }

    /// Wait until every slot has been returned
    pub async fn drain(&self) {
        let all = u32::try_from(self.pool.capacity).unwrap_or(u32::MAX);
        if let Ok(permits) = self.pool.semaphore.acquire_many(all).await {
            drop(permits);
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity
    }

    pub fn available(&self) -> usize {
        self.pool.semaphore.available_permits()
    }

    /// Slots reserved or occupied
    pub fn held(&self) -> usize {
        self.pool.capacity - self.available()
    }

    /// Slots carrying a received message
    pub fn in_flight(&self) -> usize {
        self.pool.occupied.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever occupied at once
    pub fn peak(&self) -> usize {
        self.pool.peak.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkerSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlots")
            .field("capacity", &self.capacity())
            .field("held", &self.held())
            .field("in_flight", &self.in_flight())
            .field("peak", &self.peak())
            .finish()
    }
}

/// A held worker slot. Dropping it returns the slot to the pool.
pub struct WorkerSlot {
    id: usize,
    occupied: bool,
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Mark the slot as carrying a message until it is dropped
    pub fn occupy(&mut self) {
        if self.occupied {
            return;
        }
        self.occupied = true;
        let now = self.pool.occupied.fetch_add(1, Ordering::SeqCst) + 1;
        self.pool.peak.fetch_max(now, Ordering::SeqCst);
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if self.occupied {
            self.pool.occupied.fetch_sub(1, Ordering::SeqCst);
        }
        self.pool
            .free_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(self.id);
    }
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("id", &self.id)
            .field("occupied", &self.occupied)
            .finish()
    }
}

#[cfg(test)]
#[path = "concurrency_tests.rs"]
mod tests;
