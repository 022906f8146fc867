//! Live snapshots emulated by polling.
//!
//! Each subscription is one tokio task: check the stop flag, run the read,
//! deliver the result, sleep, repeat. A failed poll is reported and the loop
//! carries on. Unsubscribing only sets the flag, so a poll already in flight
//! still delivers its result; nothing after it starts. Dropping the handle
//! unsubscribes too.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::DocumentStore;
use crate::error::{AdapterError, Result};
use crate::query::{DocumentRef, DocumentSnapshot, Query, QuerySnapshot};

/// Stop handle for a polling subscription. Polling stops when
/// [`Unsubscribe::unsubscribe`] is called or the handle is dropped.
#[must_use = "dropping the handle stops the subscription immediately"]
pub struct Unsubscribe {
    id: Uuid,
    stopped: Arc<AtomicBool>,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(subscription_id = %self.id, "unsubscribe requested");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Poll `query` every `interval`, delivering each result.
///
/// Must be called from within a tokio runtime.
pub fn on_snapshot<S, N, E>(
    store: Arc<S>,
    query: Query,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> Unsubscribe
where
    S: DocumentStore + ?Sized + 'static,
    N: FnMut(QuerySnapshot) + Send + 'static,
    E: FnMut(AdapterError) + Send + 'static,
{
    let label = query.path().to_string();
    spawn_poller(
        label,
        interval,
        move || {
            let store = store.clone();
            let query = query.clone();
            async move { store.run_query(&query).await }
        },
        on_next,
        on_error,
    )
}

/// Poll one document every `interval`. A missing document is delivered as
/// the not-found snapshot, not as an error.
///
/// Must be called from within a tokio runtime.
pub fn on_doc_snapshot<S, N, E>(
    store: Arc<S>,
    doc: DocumentRef,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> Unsubscribe
where
    S: DocumentStore + ?Sized + 'static,
    N: FnMut(DocumentSnapshot) + Send + 'static,
    E: FnMut(AdapterError) + Send + 'static,
{
    let label = doc.path().to_string();
    spawn_poller(
        label,
        interval,
        move || {
            let store = store.clone();
            let doc = doc.clone();
            async move { store.get_doc(&doc).await }
        },
        on_next,
        on_error,
    )
}

fn spawn_poller<T, P, Fut, N, E>(
    label: String,
    interval: Duration,
    mut poll: P,
    mut on_next: N,
    mut on_error: E,
) -> Unsubscribe
where
    T: Send + 'static,
    P: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    N: FnMut(T) + Send + 'static,
    E: FnMut(AdapterError) + Send + 'static,
{
    let id = Uuid::new_v4();
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();

    tokio::spawn(async move {
        info!(subscription_id = %id, path = %label, interval_ms = interval.as_millis() as u64, "subscription started");
        while !flag.load(Ordering::SeqCst) {
            match poll().await {
                Ok(snapshot) => on_next(snapshot),
                Err(e) => {
                    debug!(subscription_id = %id, error = %e, "poll failed");
                    on_error(e);
                }
            }
            tokio::time::sleep(interval).await;
        }
        info!(subscription_id = %id, path = %label, "subscription stopped");
    });

    Unsubscribe { id, stopped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{collection, doc, CollectionRef};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicUsize;

    /// Store whose reads take `delay` and, optionally, fail on every even call.
    struct FakeStore {
        calls: AtomicUsize,
        delay: Duration,
        fail_even_calls: bool,
    }

    impl FakeStore {
        fn new(delay: Duration, fail_even_calls: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail_even_calls,
            })
        }

        async fn tick(&self) -> Result<usize> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail_even_calls && n % 2 == 0 {
                return Err(AdapterError::Network("connection reset".into()));
            }
            Ok(n)
        }
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn get_doc(&self, _doc: &DocumentRef) -> Result<DocumentSnapshot> {
            self.tick().await?;
            Ok(DocumentSnapshot::not_found())
        }

        async fn run_query(&self, _query: &Query) -> Result<QuerySnapshot> {
            let n = self.tick().await?;
            Ok(QuerySnapshot::new(vec![DocumentSnapshot::new(
                format!("doc-{n}"),
                Map::new(),
            )]))
        }

        async fn set_doc(&self, _doc: &DocumentRef, _data: Value, _merge: bool) -> Result<()> {
            Ok(())
        }

        async fn update_doc(&self, _doc: &DocumentRef, _data: Value) -> Result<()> {
            Ok(())
        }

        async fn delete_doc(&self, _doc: &DocumentRef) -> Result<()> {
            Ok(())
        }

        async fn add_doc(&self, collection: &CollectionRef, _data: Value) -> Result<DocumentRef> {
            Ok(collection.doc("generated"))
        }
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_polling() {
        let store = FakeStore::new(Duration::ZERO, true);
        let (next, errors) = (counter(), counter());
        let (n, e) = (next.clone(), errors.clone());

        let sub = on_snapshot(
            store.clone(),
            collection("products").query(),
            Duration::from_secs(2),
            move |snap| {
                assert_eq!(snap.len(), 1);
                n.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            },
        );

        // Polls at t=0s, 2s and 4s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(next.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_poll_still_delivers_after_unsubscribe() {
        let store = FakeStore::new(Duration::from_secs(1), false);
        let next = counter();
        let n = next.clone();

        let sub = on_snapshot(
            store.clone(),
            collection("sales").query(),
            Duration::from_secs(2),
            move |_| {
                n.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );

        // First poll is now in flight until t=1s.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(next.load(Ordering::SeqCst), 0);

        sub.unsubscribe();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(next.load(Ordering::SeqCst), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let store = FakeStore::new(Duration::ZERO, false);
        let sub = on_snapshot(
            store.clone(),
            collection("products").query(),
            Duration::from_secs(2),
            |_| {},
            |_| {},
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        drop(sub);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_never_overlap() {
        // Reads slower than the interval: the next poll waits for the
        // previous one plus the interval.
        let store = FakeStore::new(Duration::from_secs(3), false);
        let sub = on_snapshot(
            store.clone(),
            collection("products").query(),
            Duration::from_secs(2),
            |_| {},
            |_| {},
        );

        // Polls start at t=0s and t=5s.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        sub.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn doc_subscription_delivers_not_found_snapshots() {
        let store = FakeStore::new(Duration::ZERO, false);
        let missing = counter();
        let m = missing.clone();

        let sub = on_doc_snapshot(
            store.clone(),
            doc("staff/u1"),
            Duration::from_secs(2),
            move |snap| {
                if !snap.exists() {
                    m.fetch_add(1, Ordering::SeqCst);
                }
            },
            |_| {},
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        sub.unsubscribe();
        assert_eq!(missing.load(Ordering::SeqCst), 2);
    }
}
