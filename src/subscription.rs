//! Long-lived streams of values, started as tasks and cancelled by handle.
//!
//! A [`SubscriptionSource`] knows how to produce a stream and how to identify
//! itself. [`Subscription`] wraps a source so its output can be mapped into
//! the caller's own message type and forwarded into a channel.

pub mod observer;

use std::any::TypeId;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub use observer::QueryObserver;

/// Identity of a subscription: the source type plus a hash of its inputs.
///
/// Two sources with the same id produce the same stream, so a caller that
/// keeps a set of running subscriptions can use it to avoid starting
/// duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    hash: u64,
}

impl SubscriptionId {
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            hash,
        }
    }
}

/// A source of values that can be turned into a stream.
pub trait SubscriptionSource: Send + 'static {
    type Output;

    /// Creates a new stream of values. Every call starts from scratch.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    fn id(&self) -> SubscriptionId;
}

/// A subscription yielding values of type `T`.
pub struct Subscription<T> {
    id: SubscriptionId,
    spawn: Box<dyn Fn() -> BoxStream<'static, T> + Send>,
}

impl<T: 'static> Subscription<T> {
    pub fn new<S>(source: S) -> Self
    where
        S: SubscriptionSource<Output = T>,
    {
        let id = source.id();
        Self {
            id,
            spawn: Box::new(move || source.stream()),
        }
    }

    /// Transforms every value yielded by the subscription.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Subscription<U>
    where
        U: 'static,
        F: Fn(T) -> U + Clone + Send + 'static,
    {
        let spawn = self.spawn;
        Subscription {
            id: self.id,
            spawn: Box::new(move || spawn().map(f.clone()).boxed()),
        }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream(&self) -> BoxStream<'static, T> {
        (self.spawn)()
    }
}

impl<T: Send + 'static> Subscription<T> {
    /// Forwards every value into `tx` from a spawned task.
    ///
    /// Forwarding stops when the stream ends, the receiver is dropped or the
    /// returned handle is cancelled.
    pub fn start(&self, tx: mpsc::UnboundedSender<T>) -> Handle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut stream = self.stream();
        let id = self.id;

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    item = stream.next() => match item {
                        Some(item) => {
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            trace!(?id, "subscription stopped");
        });

        Handle::new(token, join)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Handle for a running subscription task
#[derive(Debug)]
pub struct Handle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Handle {
    pub const fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the subscription and wait for task completion
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}
