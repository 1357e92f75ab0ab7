//! Coalescing future: at most one operation in flight, late callers attach to it

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

/// Handle on an in-flight operation. Every clone resolves to the same outcome.
pub type Flight<T> = Shared<BoxFuture<'static, T>>;

struct Slot<T> {
    generation: u64,
    current: Option<Flight<T>>,
}

/// Guarded slot holding at most one in-flight operation.
pub struct SingleFlight<T: Clone> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                current: None,
            })),
        }
    }

    /// Returns the in-flight operation if there is one, otherwise starts the
    /// future built by `start`. The operation is driven on the tokio runtime,
    /// so it completes even if no caller awaits the handle.
    pub fn run<F, Fut>(&self, start: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(current) = slot.current.as_ref() {
            return current.clone();
        }

        slot.generation += 1;
        let generation = slot.generation;
        let slot_ref = self.slot.clone();
        let operation = start();
        let flight = async move {
            let outcome = operation.await;
            let mut slot = match slot_ref.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.generation == generation {
                slot.current = None;
            }
            outcome
        }
        .boxed()
        .shared();

        slot.current = Some(flight.clone());
        tokio::spawn(flight.clone());
        flight
    }

    /// Whether an operation is currently in flight
    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// Handle on the operation in flight, if any
    pub fn current(&self) -> Option<Flight<T>> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.current.clone())
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_outcome() {
        let flight = SingleFlight::<u32>::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let start = |runs: Arc<AtomicUsize>| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                runs.fetch_add(1, Ordering::SeqCst) as u32 + 7
            }
        };

        let first = flight.run(start(runs.clone()));
        let second = flight.run(start(runs.clone()));
        assert!(Shared::ptr_eq(&first, &second));
        assert!(flight.is_running());
        let current = flight.current().unwrap();
        assert!(Shared::ptr_eq(&first, &current));

        assert_eq!(first.await, 7);
        assert_eq!(second.await, 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_is_released_after_completion() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run(|| async { 1 }).await, 1);
        // let the spawned driver observe completion too
        tokio::task::yield_now().await;
        assert!(!flight.is_running());

        let next = flight.run(|| async { 2 });
        assert_eq!(next.await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_without_being_awaited() {
        let flight = SingleFlight::<()>::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let _ = flight.run(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.is_running());
    }
}
