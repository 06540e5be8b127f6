use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// How a caller enters an in-flight episode for a key.
#[derive(Debug)]
pub enum Admission<T, E> {
    /// First caller for this key: perform the operation, then
    /// [`InFlightTable::settle`] with its result.
    Lead,
    /// The key is already in flight: await the lead's shared result.
    Follow(oneshot::Receiver<Result<T, E>>),
}

/// At-most-one-in-flight registry.
///
/// Every caller for a key between a `Lead` admission and its `settle`
/// becomes a follower of that single operation. Settling removes the key
/// from the registry before any follower is woken, so a follower that
/// immediately re-requests the key starts a fresh episode instead of
/// observing stale in-flight state.
#[derive(Debug)]
pub struct InFlightTable<K, T, E> {
    waiters: Mutex<HashMap<K, Vec<oneshot::Sender<Result<T, E>>>>>,
}

impl<K, T, E> InFlightTable<K, T, E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T, E> Default for InFlightTable<K, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> InFlightTable<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone,
{
    pub fn admit(&self, key: &K) -> Admission<T, E> {
        let mut waiters = self.waiters.lock();
        match waiters.get_mut(key) {
            Some(list) => {
                let (tx, rx) = oneshot::channel();
                list.push(tx);
                Admission::Follow(rx)
            }
            None => {
                waiters.insert(key.clone(), Vec::new());
                Admission::Lead
            }
        }
    }

    /// Ends the key's episode and fans the result out to every follower.
    ///
    /// If the lead is dropped without settling, followers observe a closed
    /// channel instead of hanging.
    pub fn settle(&self, key: &K, result: &Result<T, E>) {
        let drained = self.waiters.lock().remove(key).unwrap_or_default();
        for tx in drained {
            let _ = tx.send(result.clone());
        }
    }

    /// Number of keys currently in flight.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.waiters.lock().len()
    }
}
