//! Live views: cancellable, self-healing projections of a store subscription.
//!
//! A [`LiveView`] owns one background task. The task subscribes to the
//! store, folds each snapshot into a projection, and delivers the rendered
//! result to the view. When the subscription fails or the store tears it
//! down, the task reports a transient error carrying the last good result
//! and resubscribes with bounded backoff. After the retry budget is spent it
//! reports [`ViewEvent::Stalled`] and waits for [`LiveView::retry`].
//!
//! # Close contract
//!
//! - `close()` may be called any number of times
//! - after `close()` returns, no further event is observed
//! - dropping a view closes it

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use doc_store::{DocumentStore, QuerySnapshot, StoreError, WatchEvent, WatchTarget};
use futures_util::Stream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;

/// An update delivered by a live view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent<T> {
    /// The current result.
    Snapshot(Vec<T>),
    /// The subscription failed; it is being re-established. `last_known` is
    /// the most recent good result, still safe to display.
    TransientError { error: StoreError, last_known: Vec<T> },
    /// Resubscribing gave up. The view stays open; call
    /// [`LiveView::retry`] to try again.
    Stalled { error: StoreError, last_known: Vec<T> },
}

impl<T> ViewEvent<T> {
    /// The items this event carries, whichever kind it is.
    pub fn items(&self) -> &[T] {
        match self {
            ViewEvent::Snapshot(items) => items,
            ViewEvent::TransientError { last_known, .. } | ViewEvent::Stalled { last_known, .. } => {
                last_known
            }
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, ViewEvent::Snapshot(_))
    }
}

/// Folds store snapshots into a rendered list.
pub(crate) trait Projection: Send + 'static {
    type Item: Clone + Send + 'static;

    /// Applies a snapshot from the store.
    fn apply(&mut self, snapshot: QuerySnapshot);

    /// Renders the current result.
    fn render(&mut self) -> Vec<Self::Item>;
}

/// Receiving side of a live view.
pub struct LiveView<T> {
    receiver: mpsc::UnboundedReceiver<ViewEvent<T>>,
    task: Option<JoinHandle<()>>,
    retry: Arc<Notify>,
    stalled: Arc<AtomicBool>,
}

impl<T: Clone + Send + 'static> LiveView<T> {
    /// Spawns the watch task for `target` and returns its view.
    ///
    /// `local_changes` wakes the task to re-render without a store event.
    pub(crate) fn spawn<P>(
        store: Arc<dyn DocumentStore>,
        target: WatchTarget,
        policy: RetryPolicy,
        projection: P,
        local_changes: Option<watch::Receiver<u64>>,
    ) -> Self
    where
        P: Projection<Item = T>,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let retry = Arc::new(Notify::new());
        let stalled = Arc::new(AtomicBool::new(false));

        let driver = WatchDriver {
            store,
            target,
            policy,
            projection,
            local_changes,
            sender,
            retry: retry.clone(),
            stalled: stalled.clone(),
            last_known: Vec::new(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            receiver,
            task: Some(task),
            retry,
            stalled,
        }
    }
}

impl<T> LiveView<T> {
    /// Waits for the next event. Returns None once closed.
    pub async fn next(&mut self) -> Option<ViewEvent<T>> {
        if self.is_closed() {
            return None;
        }
        self.receiver.recv().await
    }

    /// Returns an already-delivered event without waiting.
    pub fn try_next(&mut self) -> Option<ViewEvent<T>> {
        if self.is_closed() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Restarts resubscription after [`ViewEvent::Stalled`]. Ignored while
    /// the view is not stalled.
    pub fn retry(&self) {
        if self.stalled.swap(false, Ordering::SeqCst) {
            self.retry.notify_one();
        }
    }

    /// Cancels the subscription and discards undelivered events.
    pub fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> Stream for LiveView<T> {
    type Item = ViewEvent<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_closed() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for LiveView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveView")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Why the driver stopped listening to the current subscription.
enum Interrupted {
    /// The view was dropped or closed.
    ViewGone,
    /// The subscription failed and should be re-established.
    Failed(StoreError),
}

struct WatchDriver<P: Projection> {
    store: Arc<dyn DocumentStore>,
    target: WatchTarget,
    policy: RetryPolicy,
    projection: P,
    local_changes: Option<watch::Receiver<u64>>,
    sender: mpsc::UnboundedSender<ViewEvent<P::Item>>,
    retry: Arc<Notify>,
    /// Set before `Stalled` is delivered; cleared by `LiveView::retry`.
    stalled: Arc<AtomicBool>,
    last_known: Vec<P::Item>,
}

impl<P: Projection> WatchDriver<P> {
    async fn run(mut self) {
        let mut failures = 0u32;
        loop {
            let error = match self.store.subscribe(self.target.clone()).await {
                Ok(stream) => match self.listen(stream, &mut failures).await {
                    Interrupted::ViewGone => return,
                    Interrupted::Failed(error) => error,
                },
                Err(error) => error,
            };

            failures += 1;
            if !self.policy.allows_retry_after(failures) {
                warn!(target_desc = ?self.target, failures, error = %error, "live view stalled");
                self.stalled.store(true, Ordering::SeqCst);
                let stalled = ViewEvent::Stalled {
                    error,
                    last_known: self.last_known.clone(),
                };
                if !self.deliver(stalled) || !self.wait_for_retry().await {
                    return;
                }
                failures = 0;
                continue;
            }

            let delay = self.policy.delay_for_attempt(failures);
            warn!(
                failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "live view subscription interrupted, resubscribing"
            );
            let transient = ViewEvent::TransientError {
                error,
                last_known: self.last_known.clone(),
            };
            if !self.deliver(transient) || !self.pause(delay).await {
                return;
            }
        }
    }

    async fn listen(&mut self, mut stream: doc_store::SnapshotStream, failures: &mut u32) -> Interrupted {
        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(WatchEvent::Snapshot(snapshot)) => {
                        *failures = 0;
                        self.projection.apply(snapshot);
                        if !self.render() {
                            return Interrupted::ViewGone;
                        }
                    }
                    Some(WatchEvent::Error(error)) => return Interrupted::Failed(error),
                    None => {
                        return Interrupted::Failed(StoreError::Unavailable(
                            "subscription closed by store".to_string(),
                        ))
                    }
                },
                changed = local_changed(&mut self.local_changes) => {
                    if !changed {
                        self.local_changes = None;
                    } else if !self.render() {
                        return Interrupted::ViewGone;
                    }
                }
                _ = self.sender.closed() => return Interrupted::ViewGone,
            }
        }
    }

    /// Sleeps for `delay` while still re-rendering local changes. Returns
    /// false if the view went away.
    async fn pause(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = local_changed(&mut self.local_changes) => {
                    if !changed {
                        self.local_changes = None;
                    } else if !self.render() {
                        return false;
                    }
                }
                _ = self.sender.closed() => return false,
            }
        }
    }

    async fn wait_for_retry(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.retry.notified() => {
                    debug!("live view retry requested");
                    return true;
                }
                changed = local_changed(&mut self.local_changes) => {
                    if !changed {
                        self.local_changes = None;
                    } else if !self.render() {
                        return false;
                    }
                }
                _ = self.sender.closed() => return false,
            }
        }
    }

    fn render(&mut self) -> bool {
        let items = self.projection.render();
        self.last_known = items.clone();
        self.deliver(ViewEvent::Snapshot(items))
    }

    fn deliver(&self, event: ViewEvent<P::Item>) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Resolves when local state changed. Never resolves without a receiver.
async fn local_changed(receiver: &mut Option<watch::Receiver<u64>>) -> bool {
    match receiver {
        Some(receiver) => receiver.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
