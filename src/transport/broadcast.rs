//! Fan-out event hub
//!
//! Every subscriber owns its own unbounded queue, so each one observes every
//! event published after it subscribed, exactly once and in publish order.

use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Multi-subscriber publisher
#[derive(Debug)]
pub struct Broadcaster<T> {
    inner: Arc<Mutex<HubState<T>>>,
}

#[derive(Debug)]
struct HubState<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    closed: bool,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create an open hub with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState {
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Attach a new listener
    ///
    /// Subscribing to a closed hub yields a subscription that ends immediately.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Deliver an event to every live subscriber
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// receiving side was dropped are pruned.
    pub fn publish(&self, event: T) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        state.subscribers.len()
    }

    /// End every subscription after its queued events drain
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    /// Whether the hub has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubState<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One listener's view of a [`Broadcaster`]
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wait for the next event; `None` once the hub is closed and drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an already queued event without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Convert into a [`Stream`]
    pub fn into_stream(mut self) -> impl Stream<Item = T> + Send + 'static {
        async_stream::stream! {
            while let Some(event) = self.rx.recv().await {
                yield event;
            }
        }
    }
}
