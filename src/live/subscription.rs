use crate::backend::DocumentStore;
use crate::core::{CollectionPath, Result, Snapshot, StoreError};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Drives one backend listener, handing each event to `emit` in order.
/// Stops when `emit` returns false, after the first error, or when the
/// backend closes the listener.
async fn run_listener<F>(store: Arc<dyn DocumentStore>, path: CollectionPath, mut emit: F)
where
    F: FnMut(Result<Snapshot>) -> bool + Send,
{
    let mut listener = match store.open_change_listener(&path).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(path = %path, error = %err, "subscription could not open");
            emit(Err(err));
            return;
        }
    };
    debug!(path = %path, "subscription open");

    let mut sequence = 0;
    while let Some(event) = listener.next().await {
        match event {
            Ok(items) => {
                sequence += 1;
                if !emit(Ok(Snapshot::new(path.clone(), items, sequence))) {
                    return;
                }
            }
            Err(err) => {
                warn!(path = %path, error = %err, "subscription closed by backend");
                emit(Err(err));
                return;
            }
        }
    }

    emit(Err(StoreError::Closed(path.to_string())));
}

/// Live view of one collection, consumed as a stream of snapshots.
///
/// Yields `Ok(snapshot)` on open and after every change, or one `Err` when
/// the backend rejects or drops the listener, after which it ends. Dropping
/// the subscription cancels it.
pub struct Subscription {
    path: CollectionPath,
    events: mpsc::UnboundedReceiver<Result<Snapshot>>,
    pump: JoinHandle<()>,
    latest: Option<Snapshot>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn open(store: Arc<dyn DocumentStore>, path: CollectionPath) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_listener(store, path.clone(), move |event| {
            sender.send(event).is_ok()
        }));

        Self {
            path,
            events,
            pump,
            latest: None,
            closed: false,
        }
    }

    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Last snapshot handed out by this subscription.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waits for the next delivery; `None` once cancelled or closed.
    pub async fn next_snapshot(&mut self) -> Option<Result<Snapshot>> {
        self.next().await
    }

    /// Stops deliveries and releases the backend listener. Idempotent.
    pub fn cancel(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pump.abort();
        self.events.close();
        debug!(path = %self.path, "subscription cancelled");
    }
}

impl Stream for Subscription {
    type Item = Result<Snapshot>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Ready(Some(Ok(snapshot))) => {
                this.latest = Some(snapshot.clone());
                Poll::Ready(Some(Ok(snapshot)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.cancel();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.cancel();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Serialises callback deliveries against cancellation.
///
/// A delivery runs while holding `in_delivery`; `cancel` from another thread
/// waits on it, so no callback starts or is still running once `cancel`
/// returns. A cancel issued from inside a callback skips the wait.
#[derive(Default)]
struct DeliveryGate {
    cancelled: AtomicBool,
    in_delivery: Mutex<()>,
    delivering_thread: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    fn deliver(&self, callback: impl FnOnce()) -> bool {
        let _delivery = self.in_delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }

        self.set_delivering(Some(thread::current().id()));
        callback();
        self.set_delivering(None);

        !self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns false when the gate was already cancelled.
    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let reentrant = *self
            .delivering_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id());
        if !reentrant {
            drop(self.in_delivery.lock().unwrap_or_else(PoisonError::into_inner));
        }
        true
    }

    fn set_delivering(&self, thread: Option<ThreadId>) {
        *self
            .delivering_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = thread;
    }
}

/// Handle of a callback-driven subscription. Dropping it cancels.
pub struct CancelHandle {
    path: CollectionPath,
    gate: Arc<DeliveryGate>,
    pump: JoinHandle<()>,
}

impl CancelHandle {
    pub(crate) fn open<S, E>(
        store: Arc<dyn DocumentStore>,
        path: CollectionPath,
        mut on_snapshot: S,
        on_error: E,
    ) -> Self
    where
        S: FnMut(Snapshot) + Send + 'static,
        E: FnOnce(StoreError) + Send + 'static,
    {
        let gate = Arc::new(DeliveryGate::default());
        let pump_gate = Arc::clone(&gate);
        let mut on_error = Some(on_error);

        let pump = tokio::spawn(run_listener(store, path.clone(), move |event| match event {
            Ok(snapshot) => pump_gate.deliver(|| on_snapshot(snapshot)),
            Err(err) => {
                if let Some(on_error) = on_error.take() {
                    pump_gate.deliver(|| on_error(err));
                }
                false
            }
        }));

        Self { path, gate, pump }
    }

    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Stops deliveries and releases the backend listener. Calling it again,
    /// or from inside a callback, is fine.
    pub fn cancel(&self) {
        if self.gate.cancel() {
            self.pump.abort();
            debug!(path = %self.path, "subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_blocks_after_cancel() {
        let gate = DeliveryGate::default();
        let mut calls = 0;
        assert!(gate.deliver(|| calls += 1));
        assert!(gate.cancel());
        assert!(!gate.cancel());
        assert!(!gate.deliver(|| calls += 1));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_gate_allows_cancel_from_inside_callback() {
        let gate = Arc::new(DeliveryGate::default());
        let inner = Arc::clone(&gate);
        let keep_going = gate.deliver(|| {
            inner.cancel();
        });
        assert!(!keep_going);
        assert!(gate.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_subscription_ends_immediately() {
        let backend = crate::backend::MemoryBackend::new();
        backend.set_require_auth(false);
        let path = CollectionPath::parse("tiendas").unwrap();

        let mut subscription = Subscription::open(Arc::new(backend), path);
        subscription.cancel();

        let mut stream = tokio_test::task::spawn(subscription);
        assert!(tokio_test::assert_ready!(stream.poll_next()).is_none());
    }
}
