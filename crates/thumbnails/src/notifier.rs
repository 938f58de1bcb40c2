use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::key::MemoryCacheKey;

/// Fan-out of "this key is now cached". Every subscriber sees every key sent after it
/// subscribed; receivers that were dropped are pruned on the next send.
#[derive(Default)]
pub struct ReadyNotifier {
    subscribers: Mutex<Vec<Sender<MemoryCacheKey>>>,
}

impl ReadyNotifier {
    pub fn new() -> Self { Self::default() }

    pub fn subscribe(&self) -> Receiver<MemoryCacheKey> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn notify(&self, key: &MemoryCacheKey) {
        self.subscribers.lock().retain(|tx| tx.send(key.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize { self.subscribers.lock().len() }
}
