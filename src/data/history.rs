use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use chrono::{DateTime, Utc};

use crate::data::sample::Sample;

/// Fixed-capacity ring of recent samples with a retention window.
///
/// `append` overwrites the oldest entry once the ring is full, so memory stays
/// constant. Lookups additionally hide entries older than the TTL even while
/// they are still physically resident. A reconnecting subscriber uses
/// [`HistoryBuffer::query_since`] to backfill what it missed.
pub struct HistoryBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
    ttl: Duration,
}

struct Ring {
    slots: Vec<Sample>,
    // Next write position.
    head: usize,
    len: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ring: Mutex::new(Ring {
                slots: Vec::with_capacity(capacity),
                head: 0,
                len: 0,
            }),
            capacity,
            ttl,
        }
    }

    pub fn append(&self, sample: Sample) {
        if self.capacity == 0 {
            return;
        }

        let mut ring = self.lock();
        let head = ring.head;
        if ring.slots.len() < self.capacity {
            ring.slots.push(sample);
        } else {
            ring.slots[head] = sample;
        }
        ring.head = (head + 1) % self.capacity;
        if ring.len < self.capacity {
            ring.len += 1;
        }
    }

    /// Samples at or after `since` that are still within the TTL, oldest first.
    pub fn query_since(&self, since: DateTime<Utc>) -> Vec<Sample> {
        self.query_since_at(since, Utc::now())
    }

    pub fn query_since_at(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Sample> {
        let ring = self.lock();
        let mut result = Vec::with_capacity(ring.len);
        if ring.len == 0 {
            return result;
        }

        let start = (ring.head + self.capacity - ring.len) % self.capacity;

        for i in 0..ring.len {
            let sample = ring.slots[(start + i) % self.capacity];
            if sample.timestamp < since {
                continue;
            }
            // Negative ages (clock skew) count as fresh.
            if let Ok(age) = now.signed_duration_since(sample.timestamp).to_std() {
                if age > self.ttl {
                    continue;
                }
            }
            result.push(sample);
        }

        result
    }

    /// Number of physically resident samples, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
