//! Coalesce concurrent calls for the same key onto one in-flight future.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::state::lock;

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Map of in-flight operations keyed by `K`.
///
/// The first caller for a key starts the operation; callers arriving while
/// it runs await the same result.  Once it completes the key is free again.
pub struct SingleFlight<K, T>
where
    T: Clone,
{
    flights: Mutex<HashMap<K, (u64, Flight<T>)>>,
    generation: AtomicU64,
}

impl<K, T> Default for SingleFlight<K, T>
where
    T: Clone,
{
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key` unless a run is already in flight, in which
    /// case join it.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, flight) = {
            let mut flights = lock(&self.flights);
            match flights.get(&key) {
                Some((generation, flight)) => (*generation, flight.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let flight = start().boxed().shared();
                    flights.insert(key.clone(), (generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let output = flight.await;

        let mut flights = lock(&self.flights);
        if flights.get(&key).map_or(false, |(g, _)| *g == generation) {
            flights.remove(&key);
        }
        output
    }

    pub fn in_flight(&self, key: &K) -> bool {
        lock(&self.flights).contains_key(key)
    }
}
