use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};

use crate::error::{Error, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bulk fetch behind a [`BatchLoader`]. Receives every distinct key queued during one
/// accumulation window together with the request that first asked for it. Keys
/// missing from the returned map resolve to `None`.
pub trait BatchFn<K, R, V>: Send + Sync + 'static {
    fn load(&self, batch: Vec<(K, R)>) -> BoxFuture<'static, Result<HashMap<K, V>>>;
}

impl<K, R, V, F> BatchFn<K, R, V> for F
where
    F: Fn(Vec<(K, R)>) -> BoxFuture<'static, Result<HashMap<K, V>>> + Send + Sync + 'static,
{
    fn load(&self, batch: Vec<(K, R)>) -> BoxFuture<'static, Result<HashMap<K, V>>> {
        self(batch)
    }
}

type Waiter<V> = oneshot::Sender<Result<Option<V>>>;

enum Slot<V> {
    Waiting(Vec<Waiter<V>>),
    Ready(Option<V>),
}

struct PendingBatch<K, R> {
    requests: Vec<(K, R)>,
    scheduled: bool,
}

impl<K, R> Default for PendingBatch<K, R> {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            scheduled: false,
        }
    }
}

struct LoaderState<K, R, V> {
    batch: PendingBatch<K, R>,
    slots: HashMap<K, Slot<V>>,
}

/// Coalesces `load` calls issued within one accumulation window into a single call
/// of its [`BatchFn`].
///
/// Calls sharing a key share one slot: the second caller attaches to the pending or
/// in-flight fetch. Resolved values stay cached for the loader's lifetime, which is
/// meant to be a single request.
pub struct BatchLoader<K, R, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    R: Send + 'static,
    V: Clone + Send + 'static,
{
    delay: Duration,
    batch_fn: Arc<dyn BatchFn<K, R, V>>,
    state: Arc<Mutex<LoaderState<K, R, V>>>,
}

impl<K, R, V> BatchLoader<K, R, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    R: Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(delay: Duration, batch_fn: impl BatchFn<K, R, V>) -> Self {
        Self {
            delay,
            batch_fn: Arc::new(batch_fn),
            state: Arc::new(Mutex::new(LoaderState {
                batch: PendingBatch::default(),
                slots: HashMap::new(),
            })),
        }
    }

    pub fn with_delay_ms(delay_ms: u64, batch_fn: impl BatchFn<K, R, V>) -> Self {
        Self::new(Duration::from_millis(delay_ms), batch_fn)
    }

    pub async fn load(&self, key: K, request: R) -> Result<Option<V>> {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;

            match state.slots.get_mut(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Waiting(waiters)) => waiters.push(tx),
                None => {
                    state.slots.insert(key.clone(), Slot::Waiting(vec![tx]));
                    state.batch.requests.push((key, request));

                    if !state.batch.scheduled {
                        state.batch.scheduled = true;
                        self.schedule();
                    }
                }
            }
        }

        rx.await.map_err(|_| Error::BatchAborted)?
    }

    pub async fn load_or_default(&self, key: K, request: R) -> Result<V>
    where
        V: Default,
    {
        Ok(self.load(key, request).await?.unwrap_or_default())
    }

    fn schedule(&self) {
        let state = self.state.clone();
        let batch_fn = self.batch_fn.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }

            let batch = {
                let mut s = state.lock().await;
                std::mem::take(&mut s.batch)
            };

            if batch.requests.is_empty() {
                return;
            }

            let keys: Vec<K> = batch.requests.iter().map(|(key, _)| key.clone()).collect();
            let started = Instant::now();
            let results = batch_fn.load(batch.requests).await;

            tracing::trace!(
                batch_size = keys.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = results.is_ok(),
                "batch loaded"
            );

            let mut s = state.lock().await;
            match results {
                Ok(mut values) => {
                    for key in keys {
                        let value = values.remove(&key);
                        if let Some(Slot::Waiting(waiters)) =
                            s.slots.insert(key, Slot::Ready(value.clone()))
                        {
                            for tx in waiters {
                                let _ = tx.send(Ok(value.clone()));
                            }
                        }
                    }
                }
                Err(err) => {
                    for key in keys {
                        if let Some(Slot::Waiting(waiters)) = s.slots.remove(&key) {
                            for tx in waiters {
                                let _ = tx.send(Err(err.clone()));
                            }
                        }
                    }
                }
            }
        });
    }
}

impl<K, R, V> Clone for BatchLoader<K, R, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    R: Send + 'static,
    V: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            batch_fn: self.batch_fn.clone(),
            state: self.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doubling_loader(
        calls: Arc<AtomicUsize>,
        batch_sizes: Arc<std::sync::Mutex<Vec<usize>>>,
    ) -> BatchLoader<i64, (), i64> {
        BatchLoader::with_delay_ms(10, move |batch: Vec<(i64, ())>| {
            let calls = calls.clone();
            let batch_sizes = batch_sizes.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                batch_sizes.lock().unwrap().push(batch.len());
                Ok(batch.into_iter().map(|(k, _)| (k, k * 2)).collect())
            }) as BoxFuture<'static, Result<HashMap<i64, i64>>>
        })
    }

    #[tokio::test]
    async fn test_batch_loader_batches_requests() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let loader = doubling_loader(call_count.clone(), sizes.clone());

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let l = loader.clone();
                tokio::spawn(async move { l.load(i, ()).await })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, Some(i as i64 * 2));
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(*sizes.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_batch_loader_dedupes_keys() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let loader = doubling_loader(call_count.clone(), sizes.clone());

        let (a, b, c) = tokio::join!(loader.load(4, ()), loader.load(4, ()), loader.load(5, ()));

        assert_eq!(a.unwrap(), Some(8));
        assert_eq!(b.unwrap(), Some(8));
        assert_eq!(c.unwrap(), Some(10));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(*sizes.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_batch_loader_caches_resolved_values() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let loader = doubling_loader(call_count.clone(), sizes);

        assert_eq!(loader.load(21, ()).await.unwrap(), Some(42));
        assert_eq!(loader.load(21, ()).await.unwrap(), Some(42));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_loader_missing_key() {
        let loader: BatchLoader<i64, (), String> =
            BatchLoader::with_delay_ms(5, |_batch: Vec<(i64, ())>| {
                Box::pin(async move { Ok(HashMap::new()) })
                    as BoxFuture<'static, Result<HashMap<i64, String>>>
            });

        let result = loader.load(1, ()).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(loader.load_or_default(1, ()).await.unwrap(), String::new());
    }

    #[tokio::test]
    async fn test_batch_loader_error_reaches_every_caller() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let loader: BatchLoader<i64, (), i64> =
            BatchLoader::with_delay_ms(5, move |_batch: Vec<(i64, ())>| {
                let cc = cc.clone();
                Box::pin(async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(Error::validation("boom"))
                }) as BoxFuture<'static, Result<HashMap<i64, i64>>>
            });

        let (a, b) = tokio::join!(loader.load(1, ()), loader.load(2, ()));
        assert!(matches!(a, Err(Error::Validation { ref message }) if message == "boom"));
        assert!(matches!(b, Err(Error::Validation { ref message }) if message == "boom"));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // failures are not cached
        assert!(loader.load(1, ()).await.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_delay_still_batches_within_a_tick() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let loader: BatchLoader<i64, (), i64> = BatchLoader::new(
            Duration::ZERO,
            move |batch: Vec<(i64, ())>| {
                let cc = cc.clone();
                Box::pin(async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Ok(batch.into_iter().map(|(k, _)| (k, k)).collect())
                }) as BoxFuture<'static, Result<HashMap<i64, i64>>>
            },
        );

        let results = futures::future::join_all((0..4).map(|i| loader.load(i, ()))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
