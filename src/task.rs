//! Sequential task chaining over publishers.
//!
//! A chain is a line of publishers where each stage's completion callback
//! receives the upstream value together with the downstream publisher and
//! is expected to eventually [`signal`](Publisher::signal) it. Best-effort
//! composition only: no error channel, no cancellation across stages, no
//! timeout.
//!
//! ```
//! use observable::{DeliveryContext, Publisher};
//!
//! let root = Publisher::<()>::with_context(DeliveryContext::inline());
//! let doubled: Publisher<i32> = root.wait(|stage, ()| stage.signal(21 * 2));
//! root.signal(());
//! assert_eq!(doubled.latest(), Some(42));
//! ```

use std::any::Any;
use std::sync::Arc;

use crate::dispatch::Target;
use crate::publisher::{Publisher, SubscribeOptions};

impl Publisher<()> {
    /// Creates the root publisher of a chain and hands it to `setup`, which
    /// typically kicks the chain off by signalling it.
    pub fn first_task<F: FnOnce(&Publisher<()>)>(setup: F) -> Publisher<()> {
        let task = Publisher::new();
        setup(&task);
        task
    }
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Waits for this stage to complete, then runs `completion` with the
    /// downstream publisher and the completion value.
    ///
    /// Delivered on the main lane; see [`wait_on`](Publisher::wait_on).
    pub fn wait<U, F>(&self, completion: F) -> Publisher<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&Publisher<U>, T) + Send + Sync + 'static,
    {
        self.wait_on(Target::Main, completion)
    }

    /// [`wait`](Publisher::wait) with an explicit delivery lane.
    ///
    /// The listener is one-shot and replays the latest value, so a stage
    /// that already signalled before the chain was extended still drives
    /// the downstream. The upstream publisher itself serves as the
    /// subscriber identity: the stage stays registered exactly as long as
    /// the upstream is alive.
    pub fn wait_on<U, F>(&self, target: Target, completion: F) -> Publisher<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&Publisher<U>, T) + Send + Sync + 'static,
    {
        let next = Publisher::<U>::with_context(self.context().clone());
        let stage = next.clone();
        let options = SubscribeOptions {
            latest: true,
            target,
        };
        self.once_with(&self.chain_identity(), options, move |value| {
            completion(&stage, value)
        });
        next
    }

    /// Terminal one-shot observer: runs `action` with this stage's
    /// completion value, without creating a downstream stage.
    pub fn wait_for<S, F>(&self, subscriber: &Arc<S>, action: F)
    where
        S: Any + Send + Sync,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.once(subscriber, action);
    }

    /// Forwards every value of this publisher into `completion` along with
    /// `next`, returning `next` for further chaining.
    ///
    /// Unlike [`wait`](Publisher::wait) the listener is persistent and does
    /// not replay the latest value.
    pub fn and_then<U, F>(&self, next: Publisher<U>, completion: F) -> Publisher<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&Publisher<U>, T) + Send + Sync + 'static,
    {
        let stage = next.clone();
        self.subscribe(&self.chain_identity(), move |value| {
            completion(&stage, value)
        });
        next
    }

    /// Completes this stage. Alias for [`publish`](Publisher::publish) in
    /// chaining vocabulary.
    pub fn signal(&self, value: T) {
        self.publish(value);
    }
}
