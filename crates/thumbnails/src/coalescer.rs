use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

type Flight<V> = Shared<BoxFuture<'static, Option<V>>>;
type Registry<K, V> = Arc<Mutex<HashMap<K, (u64, Flight<V>)>>>;

/// At most one running task per key; later callers attach to the running one.
///
/// The work is spawned onto the runtime behind `handle`, so a caller that stops waiting does not cancel
/// it for the others. The registry entry is dropped when the task ends however it ends;
/// results are never remembered here.
pub struct RequestCoalescer<K, V> {
    in_flight: Registry<K, V>,
    seq: AtomicU64,
    handle: Handle,
}

/// Removes the entry it was created for, unless a newer flight replaced it.
struct Deregister<K: Eq + Hash, V> {
    registry: Registry<K, V>,
    key: Option<K>,
    id: u64,
}

impl<K: Eq + Hash, V> Drop for Deregister<K, V> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else { return };
        let mut map = self.registry.lock();
        if map.get(&key).map(|(id, _)| *id) == Some(self.id) {
            map.remove(&key);
        }
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(handle: Handle) -> Self {
        Self { in_flight: Arc::new(Mutex::new(HashMap::new())), seq: AtomicU64::new(0), handle }
    }

    /// Run `work` unless a task for `key` is already in flight, then wait for whichever
    /// task owns the key. `None` means that task panicked or was torn down.
    pub async fn run_exclusive<F>(&self, key: K, work: F) -> Option<V>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut map = self.in_flight.lock();
            match map.get(&key) {
                Some((_, existing)) => existing.clone(),
                None => {
                    let id = self.seq.fetch_add(1, Ordering::Relaxed);
                    let guard = Deregister { registry: self.in_flight.clone(), key: Some(key.clone()), id };
                    let handle = self.handle.spawn(async move {
                        let _guard = guard;
                        work.await
                    });
                    let flight = handle.map(|r| r.ok()).boxed().shared();
                    map.insert(key, (id, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    /// Forget every registration. Running tasks finish on their own.
    pub fn clear(&self) {
        self.in_flight.lock().clear();
    }

    pub fn in_flight(&self) -> usize { self.in_flight.lock().len() }

    pub fn is_in_flight(&self, key: &K) -> bool { self.in_flight.lock().contains_key(key) }
}
