use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use log::{debug, info, warn};

use crate::data::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Consumption side of one subscriber's delivery queue.
///
/// The registry keeps the only sender. Once the registry unregisters the
/// subscriber, `recv` drains whatever is still queued and then yields `None`.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<Sample>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next sample. `None` means the queue was closed.
    pub async fn recv(&mut self) -> Option<Sample> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Result<Sample, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

/// Outcome of one fan-out pass, for diagnostics only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Concurrent set of live subscribers with non-blocking fan-out.
///
/// Invariant: a subscriber present in the map has an open queue, and removal
/// from the map drops its sender, which closes the queue exactly once.
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Sample>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl SubscriberRegistry {
    /// `queue_capacity` is clamped to at least one slot.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn register(&self) -> Subscriber {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.lock().insert(id, tx);
        info!("--> registered [{}]", id);

        Subscriber { id, rx }
    }

    /// Removes the subscriber and closes its queue. Returns `false` if it was
    /// already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id);

        match removed {
            Some(tx) => {
                drop(tx);
                info!("<-- unregistered [{}]", id);
                true
            }
            None => false,
        }
    }

    /// Offers `sample` to every subscriber without waiting on any of them.
    ///
    /// Subscribers whose queue is full, or whose consumer has gone away, miss
    /// this sample and are unregistered once the enumeration lock is released.
    /// `unregister` takes the same lock, so eviction cannot happen inside the
    /// loop.
    pub fn broadcast(&self, sample: &Sample) -> BroadcastReport {
        let mut delivered = 0;
        let mut flagged = Vec::new();

        {
            let subscribers = self.lock();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(*sample) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("[!] dropping slow subscriber [{}]", id);
                        flagged.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Subscriber [{}] receiver already gone", id);
                        flagged.push(*id);
                    }
                }
            }
        }

        for id in &flagged {
            self.unregister(*id);
        }

        BroadcastReport {
            delivered,
            dropped: flagged.len(),
        }
    }

    /// Unregisters everyone. Used at shutdown so open streams terminate.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        drop(drained);

        if count > 0 {
            info!("Closed {} subscriber queues", count);
        }
        count
    }

    #[cfg(test)]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Sample>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    fn sample(price: f64) -> Sample {
        Sample::now(price)
    }

    /// Drains the queue and reports whether it ended closed rather than empty.
    fn drained_and_closed(subscriber: &mut Subscriber) -> bool {
        loop {
            match subscriber.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let registry = SubscriberRegistry::new(1);
        let a = registry.register();
        let b = registry.register();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string(), "subscriber-1");
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));
    }

    #[test]
    fn test_unregister_closes_queue_and_is_idempotent() {
        let registry = SubscriberRegistry::new(1);
        let mut subscriber = registry.register();

        assert!(registry.unregister(subscriber.id()));
        assert!(!registry.contains(subscriber.id()));
        assert!(drained_and_closed(&mut subscriber));

        assert!(!registry.unregister(subscriber.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_every_subscriber() {
        let registry = SubscriberRegistry::new(1);
        let mut first = registry.register();
        let mut second = registry.register();

        let update = sample(123.45);
        let report = registry.broadcast(&update);
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });

        for subscriber in [&mut first, &mut second] {
            let received = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
                .await
                .expect("subscriber did not receive broadcast");
            assert_eq!(received, Some(update));
        }
    }

    #[tokio::test]
    async fn test_broadcast_drops_slow_subscriber() {
        let registry = SubscriberRegistry::new(1);
        let mut slow = registry.register();
        let mut healthy = registry.register();

        // Fill both queues, then let only the healthy one catch up.
        registry.broadcast(&sample(1.0));
        assert!(healthy.try_recv().is_ok());

        let report = registry.broadcast(&sample(999.99));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert!(!registry.contains(slow.id()));
        assert!(registry.contains(healthy.id()));

        // The queued sample is still readable, then closure is observed.
        assert_eq!(slow.recv().await.map(|s| s.price), Some(1.0));
        let closed = tokio::time::timeout(Duration::from_secs(1), slow.recv())
            .await
            .expect("receive on dropped subscriber hung");
        assert_eq!(closed, None);
    }

    #[test]
    fn test_broadcast_evicts_subscriber_whose_consumer_is_gone() {
        let registry = SubscriberRegistry::new(4);
        let subscriber = registry.register();
        let id = subscriber.id();
        drop(subscriber);

        let report = registry.broadcast(&sample(1.0));
        assert_eq!(report.dropped, 1);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_close_all() {
        let registry = SubscriberRegistry::new(1);
        let mut subscribers: Vec<_> = (0..3).map(|_| registry.register()).collect();

        assert_eq!(registry.close_all(), 3);
        assert!(registry.is_empty());
        assert!(subscribers.iter_mut().all(drained_and_closed));
    }

    #[test]
    fn test_concurrent_register_unregister_broadcast() {
        let registry = Arc::new(SubscriberRegistry::new(1));
        let handles = Arc::new(Mutex::new(Vec::new()));

        let registrars: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let handles = handles.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let subscriber = registry.register();
                        handles.lock().unwrap().push(subscriber);
                    }
                })
            })
            .collect();

        let unregistrar = {
            let registry = registry.clone();
            thread::spawn(move || {
                for n in (1..=1000).step_by(3) {
                    registry.unregister(SubscriberId(n));
                }
            })
        };

        let broadcaster = {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    registry.broadcast(&sample(i as f64));
                }
            })
        };

        for handle in registrars {
            handle.join().unwrap();
        }
        unregistrar.join().unwrap();
        broadcaster.join().unwrap();

        let mut subscribers = handles.lock().unwrap();
        assert_eq!(subscribers.len(), 1000);
        for subscriber in subscribers.iter_mut() {
            let present = registry.contains(subscriber.id());
            assert_eq!(present, !drained_and_closed(subscriber), "{}", subscriber.id());
        }
    }
}
