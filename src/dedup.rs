//! In-flight call deduplication.
//!
//! When several tasks ask for the same keyed operation while it is still
//! running, only the first one starts it and everybody receives the outcome of
//! that single execution. Once it settles the key is free again; nothing is
//! cached past the in-flight window.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Registry entry for one running producer.
struct Flight {
    /// Distinguishes this execution from a later one registered under the same
    /// key after a `clear`.
    id: u64,
    /// A `broadcast::Sender<Result<T, E>>`, erased so one registry can hold
    /// calls of different result types.
    sender: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Registry {
    flights: Mutex<HashMap<String, Flight>>,
    next_id: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight>> {
        // The map holds no invariants a panicking holder could break halfway.
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only if it still belongs to execution `id`.
    fn settle(&self, key: &str, id: u64) {
        let mut flights = self.lock();
        if flights.get(key).is_some_and(|flight| flight.id == id) {
            flights.remove(key);
        }
    }
}

/// Removes the registry entry when the producer task finishes, including when
/// it unwinds.
struct FlightGuard {
    registry: Arc<Registry>,
    key: String,
    id: Option<u64>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.registry.settle(&self.key, id);
        }
    }
}

/// Collapses concurrent calls sharing a key into one execution.
///
/// Cloning is cheap and clones share the same registry. Build one per
/// application (or per test) with [`Deduplicator::new`].
#[derive(Clone, Default)]
pub struct Deduplicator {
    registry: Arc<Registry>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` unless a call for `key` is already in flight, in which
    /// case wait for that call's outcome instead.
    ///
    /// Registration happens here, not on first poll: the producer is invoked
    /// and spawned before this returns, so calls issued back to back without
    /// awaiting still share one execution. Dropping the returned future does
    /// not stop the producer.
    ///
    /// Outcomes are cloned to every waiter. Wrap values in `Arc` when callers
    /// need to observe the very same allocation.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime. If the producer panics,
    /// every waiter of that execution panics when polled.
    pub fn call<T, E, F, Fut>(
        &self,
        key: impl Into<String>,
        producer: F,
    ) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();

        let (mut receiver, launch) = {
            let mut flights = self.registry.lock();
            let joined = flights.get(&key).map(|flight| {
                flight
                    .sender
                    .downcast_ref::<broadcast::Sender<Result<T, E>>>()
                    .map(broadcast::Sender::subscribe)
            });

            match joined {
                Some(Some(receiver)) => {
                    tracing::trace!(key = %key, "joining in-flight call");
                    (receiver, None)
                }
                Some(None) => {
                    tracing::warn!(
                        key = %key,
                        "in-flight call has a different result type, running without deduplication"
                    );
                    let (sender, receiver) = broadcast::channel(1);
                    (receiver, Some((None, sender)))
                }
                None => {
                    let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
                    let (sender, receiver) = broadcast::channel(1);
                    flights.insert(
                        key.clone(),
                        Flight {
                            id,
                            sender: Box::new(sender.clone()),
                        },
                    );
                    tracing::debug!(key = %key, id, "starting call");
                    (receiver, Some((Some(id), sender)))
                }
            }
        };

        // The producer runs outside the lock so it may itself use the
        // deduplicator.
        if let Some((id, sender)) = launch {
            let guard = FlightGuard {
                registry: Arc::clone(&self.registry),
                key: key.clone(),
                id,
            };
            let work = producer();
            tokio::spawn(async move {
                let outcome = work.await;
                drop(guard);
                // No receivers left just means every caller lost interest.
                let _ = sender.send(outcome);
            });
        }

        async move {
            match receiver.recv().await {
                Ok(outcome) => outcome,
                Err(_) => panic!("call `{key}` ended without an outcome; its producer panicked"),
            }
        }
    }

    /// Forget the in-flight entry for `key`.
    ///
    /// Futures already returned still resolve with their producer's outcome;
    /// the next `call` for `key` starts a new execution.
    pub fn clear(&self, key: &str) {
        if self.registry.lock().remove(key).is_some() {
            tracing::debug!(key, "cleared in-flight call");
        }
    }

    /// [`clear`](Self::clear) for every key.
    pub fn clear_all(&self) {
        let mut flights = self.registry.lock();
        let count = flights.len();
        flights.clear();
        tracing::debug!(count, "cleared all in-flight calls");
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.registry.lock().contains_key(key)
    }
}
