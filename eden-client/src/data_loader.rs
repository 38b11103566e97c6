//! Same-tick request coalescing
//!
//! [`DataLoader::load`] queues a key and returns a [`LoadHandle`]. Keys
//! queued before the current task yields are grouped into batches, each
//! checked with [`BatchLoader::validate`]: a key that would make the current
//! batch invalid starts a new one. After one `yield_now` a flush task hands
//! every batch to [`BatchLoader::fetch`], which must answer with one value
//! per key, in key order.
//!
//! Dropping a handle (or calling [`LoadHandle::cancel`]) before the flush
//! removes its key from the batch; if every key of a batch was cancelled the
//! batch is not sent.

use eden_core::observable::lock;
use eden_core::Error;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// Fetches many keys in one call
pub trait BatchLoader<K, V>: Send + Sync + 'static {
    /// Whether `batch` may be sent as a single request
    fn validate(&self, _batch: &[K]) -> bool {
        true
    }

    /// Fetch `batch`, returning one value per key in the same order
    fn fetch(&self, batch: Vec<K>) -> BoxFuture<'static, Result<Vec<V>, Error>>;
}

struct PendingItem<K, V> {
    key: K,
    tx: oneshot::Sender<Result<V, Error>>,
    aborted: Arc<AtomicBool>,
}

struct LoaderState<K, V> {
    batches: Vec<Vec<PendingItem<K, V>>>,
    scheduled: bool,
}

/// Coalesces `load` calls into batches
pub struct DataLoader<K, V, L> {
    loader: Arc<L>,
    state: Arc<Mutex<LoaderState<K, V>>>,
}

impl<K, V, L> Clone for DataLoader<K, V, L> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            state: Arc::clone(&self.state),
        }
    }
}

impl<K, V, L> DataLoader<K, V, L>
where
    K: Clone + Send + 'static,
    V: Send + 'static,
    L: BatchLoader<K, V>,
{
    pub fn new(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            state: Arc::new(Mutex::new(LoaderState {
                batches: Vec::new(),
                scheduled: false,
            })),
        }
    }

    /// Queue `key` for the next flush
    ///
    /// Must be called inside a tokio runtime.
    pub fn load(&self, key: K) -> LoadHandle<V> {
        let (tx, rx) = oneshot::channel();
        let aborted = Arc::new(AtomicBool::new(false));
        let item = PendingItem {
            key,
            tx,
            aborted: Arc::clone(&aborted),
        };

        let mut state = lock(&self.state);
        let fits = state.batches.last().is_some_and(|batch| {
            let mut candidate: Vec<K> = batch.iter().map(|item| item.key.clone()).collect();
            candidate.push(item.key.clone());
            self.loader.validate(&candidate)
        });
        match state.batches.last_mut() {
            Some(batch) if fits => batch.push(item),
            _ => state.batches.push(vec![item]),
        }

        if !state.scheduled {
            state.scheduled = true;
            let this = self.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                this.flush();
            });
        }

        LoadHandle { rx, aborted }
    }

    fn flush(&self) {
        let batches = {
            let mut state = lock(&self.state);
            state.scheduled = false;
            std::mem::take(&mut state.batches)
        };

        for batch in batches {
            let items: Vec<PendingItem<K, V>> = batch
                .into_iter()
                .filter(|item| !item.aborted.load(Ordering::SeqCst))
                .collect();
            if items.is_empty() {
                continue;
            }
            debug!(size = items.len(), "Flushing batch");
            tokio::spawn(dispatch(Arc::clone(&self.loader), items));
        }
    }
}

async fn dispatch<K, V, L>(loader: Arc<L>, items: Vec<PendingItem<K, V>>)
where
    K: Clone,
    L: BatchLoader<K, V>,
{
    let keys: Vec<K> = items.iter().map(|item| item.key.clone()).collect();
    let expected = keys.len();

    match loader.fetch(keys).await {
        Ok(values) if values.len() == expected => {
            for (item, value) in items.into_iter().zip(values) {
                let _ = item.tx.send(Ok(value));
            }
        }
        Ok(values) => {
            let error = Error::Serialization(format!(
                "batch returned {} results for {} requests",
                values.len(),
                expected
            ));
            for item in items {
                let _ = item.tx.send(Err(error.clone()));
            }
        }
        Err(error) => {
            for item in items {
                let _ = item.tx.send(Err(error.clone()));
            }
        }
    }
}

/// Pending result of [`DataLoader::load`]
pub struct LoadHandle<V> {
    rx: oneshot::Receiver<Result<V, Error>>,
    aborted: Arc<AtomicBool>,
}

impl<V> LoadHandle<V> {
    /// Withdraw the key if its batch has not been sent yet
    pub fn cancel(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl<V> Future for LoadHandle<V> {
    type Output = Result<V, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Aborted)))
    }
}

impl<V> Drop for LoadHandle<V> {
    fn drop(&mut self) {
        self.cancel();
    }
}
