use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

type SlotKey = (Option<String>, String);

struct TailSlot {
    seq: u64,
    done: oneshot::Receiver<()>,
}

/// Per-key FIFO gate.
///
/// Each submission swaps its own completion channel in as the tail for its
/// `(tag, name)` slot and waits for the previous tail before running. The
/// slot is removed once its last submission finishes, so the map only holds
/// keys with in-flight operations.
#[derive(Default)]
pub(crate) struct KeyOrder {
    slots: Mutex<HashMap<SlotKey, TailSlot>>,
    next_seq: AtomicU64,
}

impl KeyOrder {
    pub async fn run<F, T>(&self, tag: Option<&str>, name: &str, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let key = (tag.map(str::to_string), name.to_string());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let prev = self.slots.lock().insert(key.clone(), TailSlot { seq, done: rx });
        if let Some(prev) = prev {
            // A dropped sender counts as completion, never as a stuck queue.
            let _ = prev.done.await;
        }

        let out = body.await;

        let _ = tx.send(());
        let mut slots = self.slots.lock();
        if slots.get(&key).is_some_and(|slot| slot.seq == seq) {
            slots.remove(&key);
        }
        out
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.slots.lock().len()
    }
}
