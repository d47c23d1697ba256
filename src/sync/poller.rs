use crate::errors::AppResult;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::Duration;

/// Fetches allowed in flight at once. Starting another aborts the oldest.
pub const MAX_IN_FLIGHT: usize = 4;

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send>>;
pub type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Owns a running poll loop. Stopping or dropping it aborts the timer and every
/// fetch still in flight.
#[derive(Debug)]
pub struct StopHandle {
    task: JoinHandle<()>,
}

impl StopHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Fetches immediately, then on a fixed-rate timer. Each fetch runs beside the
/// timer, so a slow source never delays the next tick. Results are delivered to
/// `on_update` only when newer than the last delivered one by initiation order;
/// failures are logged and dropped. Applying a result aborts every older fetch
/// still running, and at most [`MAX_IN_FLIGHT`] fetches run at once.
pub fn start_polling<T, U>(name: &'static str, fetch: FetchFn<T>, interval: Duration, on_update: U) -> StopHandle
where
    T: Send + 'static,
    U: Fn(T) + Send + Sync + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut in_flight: JoinSet<(u64, AppResult<T>)> = JoinSet::new();
        let mut pending: BTreeMap<u64, AbortHandle> = BTreeMap::new();
        let mut issued = 0u64;
        let mut applied = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if pending.len() >= MAX_IN_FLIGHT {
                        if let Some((oldest, handle)) = pending.pop_first() {
                            handle.abort();
                            tracing::debug!(source = name, seq = oldest, "too many polls in flight, aborting the oldest");
                        }
                    }
                    issued += 1;
                    let seq = issued;
                    let future = fetch();
                    pending.insert(seq, in_flight.spawn(async move { (seq, future.await) }));
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Ok((seq, _)) = &joined {
                        pending.remove(seq);
                    }
                    match joined {
                        Ok((seq, Ok(value))) => {
                            if seq > applied {
                                applied = seq;
                                let newer = pending.split_off(&seq);
                                for (stale, handle) in std::mem::replace(&mut pending, newer) {
                                    handle.abort();
                                    tracing::debug!(source = name, seq = stale, "aborting superseded poll");
                                }
                                on_update(value);
                            } else {
                                tracing::debug!(source = name, seq, applied, "discarding superseded poll result");
                            }
                        }
                        Ok((seq, Err(error))) => {
                            tracing::warn!(source = name, seq, error = %error, "poll failed, keeping previous snapshot");
                        }
                        Err(error) if error.is_cancelled() => {}
                        Err(error) => {
                            tracing::warn!(source = name, error = %error, "poll task panicked, keeping previous snapshot");
                        }
                    }
                }
            }
        }
    });

    StopHandle { task }
}

type PostProcess<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

struct Lifecycle {
    consumers: usize,
    started: bool,
    handle: Option<StopHandle>,
}

impl Lifecycle {
    fn held(&self) -> bool {
        self.started || self.consumers > 0
    }
}

/// Read-through cache over one data kind. Holds the latest successfully fetched
/// snapshot and replaces it wholesale on every successful poll.
pub struct Synchronizer<T> {
    name: &'static str,
    fetch: FetchFn<T>,
    interval: Duration,
    post_process: Option<PostProcess<T>>,
    snapshot: Arc<watch::Sender<Arc<T>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T> Synchronizer<T>
where
    T: Default + Send + Sync + 'static,
{
    pub fn new(name: &'static str, fetch: FetchFn<T>, interval: Duration) -> Self {
        let (sender, _) = watch::channel(Arc::new(T::default()));
        Self {
            name,
            fetch,
            interval,
            post_process: None,
            snapshot: Arc::new(sender),
            lifecycle: Mutex::new(Lifecycle {
                consumers: 0,
                started: false,
                handle: None,
            }),
        }
    }

    pub fn with_post_process(mut self, post_process: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.post_process = Some(Arc::new(post_process));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Holds polling on until [`stop`](Self::stop), independent of mounts. Must be
    /// called within a tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.started = true;
        if lifecycle.handle.is_none() {
            lifecycle.handle = Some(self.spawn());
            tracing::debug!(source = self.name, interval_ms = self.interval.as_millis() as u64, "polling started");
        }
    }

    /// Releases the hold taken by [`start`](Self::start). Polling stops unless
    /// mounts are still live, in which case the last unmount stops it.
    pub fn stop(&self) {
        let handle = {
            let mut lifecycle = self.lifecycle();
            lifecycle.started = false;
            if lifecycle.held() {
                None
            } else {
                lifecycle.handle.take()
            }
        };
        if let Some(handle) = handle {
            handle.stop();
            tracing::debug!(source = self.name, "polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().handle.is_some()
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.snapshot.subscribe()
    }

    /// Registers a consumer. The first mount starts polling and dropping the last
    /// mount stops it, unless [`start`](Self::start) is also holding it.
    pub fn mount(self: &Arc<Self>) -> Mount<T> {
        let mut lifecycle = self.lifecycle();
        lifecycle.consumers += 1;
        if lifecycle.handle.is_none() {
            lifecycle.handle = Some(self.spawn());
        }
        Mount {
            synchronizer: Arc::clone(self),
            receiver: self.snapshot.subscribe(),
        }
    }

    pub fn consumers(&self) -> usize {
        self.lifecycle().consumers
    }

    fn unmount(&self) {
        let handle = {
            let mut lifecycle = self.lifecycle();
            lifecycle.consumers = lifecycle.consumers.saturating_sub(1);
            if lifecycle.held() {
                None
            } else {
                lifecycle.handle.take()
            }
        };
        if let Some(handle) = handle {
            handle.stop();
            tracing::debug!(source = self.name, "last consumer unmounted, polling stopped");
        }
    }

    fn spawn(&self) -> StopHandle {
        let snapshot = Arc::clone(&self.snapshot);
        let post_process = self.post_process.clone();
        start_polling(self.name, Arc::clone(&self.fetch), self.interval, move |value: T| {
            let value = match post_process.as_ref() {
                Some(post_process) => post_process(value),
                None => value,
            };
            snapshot.send_replace(Arc::new(value));
        })
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Synchronizer<T> {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = lifecycle.handle.take() {
            handle.stop();
        }
    }
}

/// A mounted consumer's read-only view of a synchronizer.
pub struct Mount<T>
where
    T: Default + Send + Sync + 'static,
{
    synchronizer: Arc<Synchronizer<T>>,
    receiver: watch::Receiver<Arc<T>>,
}

impl<T> Mount<T>
where
    T: Default + Send + Sync + 'static,
{
    pub fn current(&self) -> Arc<T> {
        self.receiver.borrow().clone()
    }

    /// Waits for the next published snapshot. Returns `None` once the
    /// synchronizer is gone.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

impl<T> Drop for Mount<T>
where
    T: Default + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.synchronizer.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::{start_polling, FetchFn, FetchFuture, Synchronizer, MAX_IN_FLIGHT};
    use crate::errors::{AppError, AppResult};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::{advance, Duration};

    /// Fetch double: counts calls and replays scripted responses (delay, result).
    /// Once the script is exhausted it returns the call number. `live` counts
    /// scripted fetches still running and `completed` those that ran to the end.
    #[derive(Clone, Default)]
    struct ScriptedFetch {
        calls: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        completed: Arc<AtomicUsize>,
        script: Arc<Mutex<VecDeque<(u64, AppResult<Vec<usize>>)>>>,
    }

    struct LiveGuard(Arc<AtomicUsize>);

    impl LiveGuard {
        fn enter(live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(live))
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedFetch {
        fn push(&self, delay_ms: u64, result: AppResult<Vec<usize>>) {
            self.script.lock().expect("script lock").push_back((delay_ms, result));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fetch_fn(&self) -> FetchFn<Vec<usize>> {
            let this = self.clone();
            Arc::new(move || {
                let call = this.calls.fetch_add(1, Ordering::SeqCst) + 1;
                let next = this.script.lock().expect("script lock").pop_front();
                let live = Arc::clone(&this.live);
                let completed = Arc::clone(&this.completed);
                let future: FetchFuture<Vec<usize>> = Box::pin(async move {
                    match next {
                        Some((delay_ms, result)) => {
                            let _guard = LiveGuard::enter(&live);
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                            completed.fetch_add(1, Ordering::SeqCst);
                            result
                        }
                        None => Ok(vec![call]),
                    }
                });
                future
            })
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_on_start() {
        let fetch = ScriptedFetch::default();
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5));
        sync.start();
        settle().await;

        assert_eq!(fetch.calls(), 1);
        assert_eq!(*sync.snapshot(), vec![1]);
        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn issues_one_fetch_per_interval() {
        let fetch = ScriptedFetch::default();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let handle = start_polling("test", fetch.fetch_fn(), Duration::from_secs(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        for _ in 0..4 {
            advance(Duration::from_secs(5)).await;
            settle().await;
        }
        // alive for 20s at a 5s interval: floor(20 / 5) + 1
        assert_eq!(fetch.calls(), 5);
        assert_eq!(updates.load(Ordering::SeqCst), 5);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_retains_previous_snapshot() {
        let fetch = ScriptedFetch::default();
        fetch.push(0, Ok(vec![7, 8]));
        fetch.push(0, Err(AppError::Transport("503".to_string())));
        fetch.push(0, Err(AppError::Decode("not json".to_string())));
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5));
        sync.start();
        settle().await;
        let before = sync.snapshot();
        assert_eq!(*before, vec![7, 8]);

        advance(Duration::from_secs(5)).await;
        settle().await;
        advance(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(fetch.calls(), 3);
        assert!(Arc::ptr_eq(&before, &sync.snapshot()));
        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn no_fetch_or_update_after_stop() {
        let fetch = ScriptedFetch::default();
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5));
        sync.start();
        settle().await;
        sync.stop();
        assert!(!sync.is_running());
        let before = sync.snapshot();

        advance(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(fetch.calls(), 1);
        assert!(Arc::ptr_eq(&before, &sync.snapshot()));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_fetch_is_dropped_on_stop() {
        let fetch = ScriptedFetch::default();
        fetch.push(2_000, Ok(vec![99]));
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5));
        sync.start();
        settle().await;
        sync.stop();

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert!(sync.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_fetch_does_not_overwrite_newer_snapshot() {
        let fetch = ScriptedFetch::default();
        fetch.push(8_000, Ok(vec![1]));
        fetch.push(0, Ok(vec![2]));
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5));
        sync.start();
        settle().await;

        advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(*sync.snapshot(), vec![2]);

        // first fetch completes at t=8s, after the second one
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(*sync.snapshot(), vec![2]);
        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn post_process_runs_before_publication() {
        let fetch = ScriptedFetch::default();
        fetch.push(0, Ok(vec![1, 2, 3, 4]));
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5))
            .with_post_process(|mut values: Vec<usize>| {
                values.reverse();
                values.truncate(2);
                values
            });
        sync.start();
        settle().await;
        assert_eq!(*sync.snapshot(), vec![4, 3]);
        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn last_unmount_stops_polling() {
        let fetch = ScriptedFetch::default();
        let sync = Arc::new(Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5)));

        let first = sync.mount();
        settle().await;
        assert_eq!(fetch.calls(), 1);
        assert_eq!(*first.current(), vec![1]);

        let mut second = sync.mount();
        assert_eq!(sync.consumers(), 2);
        assert_eq!(fetch.calls(), 1);

        drop(first);
        assert!(sync.is_running());
        advance(Duration::from_secs(5)).await;
        let latest = second.changed().await.expect("snapshot");
        assert_eq!(*latest, vec![2]);

        drop(second);
        assert!(!sync.is_running());
        advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(fetch.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_start_survives_a_transient_mount() {
        let fetch = ScriptedFetch::default();
        let sync = Arc::new(Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5)));
        sync.start();
        settle().await;

        let mount = sync.mount();
        drop(mount);
        assert!(sync.is_running());
        advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(fetch.calls(), 2);

        sync.stop();
        assert!(!sync.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_leaves_live_mounts_polling() {
        let fetch = ScriptedFetch::default();
        let sync = Arc::new(Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5)));
        let mount = sync.mount();
        sync.start();
        settle().await;

        sync.stop();
        assert!(sync.is_running());
        advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(fetch.calls(), 2);

        drop(mount);
        assert!(!sync.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn applied_result_aborts_older_fetches() {
        let fetch = ScriptedFetch::default();
        fetch.push(100_000, Ok(vec![1]));
        let sync = Synchronizer::new("test", fetch.fetch_fn(), Duration::from_secs(5));
        sync.start();
        settle().await;
        assert_eq!(fetch.live.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(*sync.snapshot(), vec![2]);
        assert_eq!(fetch.live.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(100)).await;
        settle().await;
        assert_eq!(fetch.completed.load(Ordering::SeqCst), 0);
        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetches_are_capped() {
        let fetch = ScriptedFetch::default();
        for _ in 0..10 {
            fetch.push(1_000_000, Ok(vec![0]));
        }
        let handle = start_polling("test", fetch.fetch_fn(), Duration::from_secs(5), |_| {});
        settle().await;
        for _ in 0..9 {
            advance(Duration::from_secs(5)).await;
            settle().await;
        }

        assert_eq!(fetch.calls(), 10);
        assert_eq!(fetch.live.load(Ordering::SeqCst), MAX_IN_FLIGHT);
        handle.stop();
    }
}
