//! Typed publish/subscribe with lifecycle-managed subscriptions.
//!
//! A [`Publisher`] owns an ordered list of subscriptions plus the latest
//! published value. Delivery order equals subscribe order. Subscriptions
//! whose owning subscriber has been dropped are pruned eagerly on the next
//! [`publish`](Publisher::publish), so a destroyed subscriber never receives
//! a stray callback and never needs an explicit unsubscribe.
//!
//! ## Rules
//! - The per-publisher lock is held only around list mutation, never while a
//!   callback runs. `publish` snapshots its delivery jobs under the lock and
//!   hands them to the dispatcher after releasing it, so a callback may call
//!   back into the same publisher.
//! - A `once` subscription counts as fired when its delivery is scheduled,
//!   not when the callback completes.
//! - Registrations made re-entrantly from a callback land after the
//!   in-flight publish's snapshot and only observe later publishes.

use std::any::Any;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::bag::BagId;
use crate::dispatch::{self, DeliveryContext, Job, Target};

mod subscription;

pub use subscription::{BagError, SubscriberRef, Subscription};

pub(crate) use subscription::Cancel;

/// Options for [`Publisher::subscribe_with`] and [`Publisher::once_with`].
///
/// Defaults match the plain `subscribe`/`once` calls: no latest-value
/// replay, delivery on [`Target::Main`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Replay the latest published value immediately on registration, if
    /// one exists.
    pub latest: bool,
    /// The lane callbacks are delivered on.
    pub target: Target,
}

impl SubscribeOptions {
    /// Options requesting an immediate replay of the latest value.
    pub fn latest() -> Self {
        SubscribeOptions {
            latest: true,
            ..SubscribeOptions::default()
        }
    }

    /// Options selecting a delivery lane.
    pub fn on(target: Target) -> Self {
        SubscribeOptions {
            target,
            ..SubscribeOptions::default()
        }
    }
}

pub(crate) struct PublisherInner<T> {
    subscriptions: Vec<Arc<Subscription<T>>>,
    latest: Option<T>,
}

impl<T: Clone + Send + 'static> PublisherInner<T> {
    fn prune_dead(&mut self) {
        self.subscriptions.retain(|s| s.subscriber.is_alive());
    }

    fn remove_subscriber(&mut self, subscriber: &SubscriberRef) {
        self.subscriptions
            .retain(|s| !s.subscriber.refers_to(subscriber));
    }

    fn remove_bag(&mut self, id: BagId) {
        self.subscriptions.retain(|s| s.bag_id() != Some(id));
    }
}

/// A typed broadcast cell.
///
/// Cloning a `Publisher` yields another handle onto the same subscription
/// list and latest value.
#[derive(Clone)]
pub struct Publisher<T> {
    inner: Arc<Mutex<PublisherInner<T>>>,
    context: DeliveryContext,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// An empty publisher delivering on the process-wide default lanes.
    pub fn new() -> Self {
        Self::with_context(dispatch::global().clone())
    }

    /// A publisher seeded with an initial latest value.
    pub fn with_value(value: T) -> Self {
        let publisher = Self::new();
        publisher.inner.lock().unwrap().latest = Some(value);
        publisher
    }

    /// An empty publisher delivering on the given lanes.
    pub fn with_context(context: DeliveryContext) -> Self {
        Publisher {
            inner: Arc::new(Mutex::new(PublisherInner {
                subscriptions: Vec::new(),
                latest: None,
            })),
            context,
        }
    }

    /// A seeded publisher on the given lanes.
    pub fn with_value_and_context(value: T, context: DeliveryContext) -> Self {
        let publisher = Self::with_context(context);
        publisher.inner.lock().unwrap().latest = Some(value);
        publisher
    }

    /// Registers a persistent interest with default options.
    ///
    /// The subscriber `Arc` is only downgraded; the publisher never keeps
    /// it alive. Liveness is not checked here: subscribing with an already
    /// dead identity succeeds and the registration is pruned on the next
    /// publish without the callback ever running.
    pub fn subscribe<S, F>(&self, subscriber: &Arc<S>, action: F) -> Arc<Subscription<T>>
    where
        S: Any + Send + Sync,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with(subscriber, SubscribeOptions::default(), action)
    }

    /// Registers a persistent interest.
    ///
    /// With `options.latest` set and a value already published, one
    /// immediate delivery of that value is scheduled on the selected lane,
    /// in addition to all future deliveries.
    pub fn subscribe_with<S, F>(
        &self,
        subscriber: &Arc<S>,
        options: SubscribeOptions,
        action: F,
    ) -> Arc<Subscription<T>>
    where
        S: Any + Send + Sync,
        F: Fn(T) + Send + Sync + 'static,
    {
        let action: Arc<dyn Fn(T) + Send + Sync> = Arc::new(action);
        let subscription = Arc::new(Subscription::new(
            SubscriberRef::new(subscriber),
            Arc::downgrade(&self.inner),
            false,
            options.target,
            Arc::clone(&action),
        ));

        let replay = {
            let mut inner = self.inner.lock().unwrap();
            inner.subscriptions.push(Arc::clone(&subscription));
            if options.latest {
                inner.latest.clone()
            } else {
                None
            }
        };
        if let Some(value) = replay {
            self.context
                .dispatch(options.target, Box::new(move || (*action)(value)));
        }

        subscription
    }

    /// Registers a single-fire interest with default options.
    pub fn once<S, F>(&self, subscriber: &Arc<S>, action: F) -> Option<Arc<Subscription<T>>>
    where
        S: Any + Send + Sync,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.once_with(subscriber, SubscribeOptions::default(), action)
    }

    /// Registers a single-fire interest.
    ///
    /// With `options.latest` set and a value already published, the value is
    /// delivered immediately and nothing is registered; the one delivery
    /// satisfied the contract and `None` is returned. Otherwise the pending
    /// subscription handle is returned; it is removed right after its first
    /// scheduled delivery.
    pub fn once_with<S, F>(
        &self,
        subscriber: &Arc<S>,
        options: SubscribeOptions,
        action: F,
    ) -> Option<Arc<Subscription<T>>>
    where
        S: Any + Send + Sync,
        F: Fn(T) + Send + Sync + 'static,
    {
        let action: Arc<dyn Fn(T) + Send + Sync> = Arc::new(action);

        let mut inner = self.inner.lock().unwrap();
        if options.latest {
            if let Some(value) = inner.latest.clone() {
                drop(inner);
                self.context
                    .dispatch(options.target, Box::new(move || (*action)(value)));
                return None;
            }
        }

        let subscription = Arc::new(Subscription::new(
            SubscriberRef::new(subscriber),
            Arc::downgrade(&self.inner),
            true,
            options.target,
            action,
        ));
        inner.subscriptions.push(Arc::clone(&subscription));
        Some(subscription)
    }

    /// Stores `value` as the latest and schedules a delivery to every live
    /// subscription, in subscribe order.
    ///
    /// Dead subscribers are pruned first and never receive a stray call.
    /// `once` subscriptions are dropped from the list as soon as their
    /// delivery is scheduled. Returns before callbacks necessarily run; with
    /// no subscribers the value is simply stored.
    pub fn publish(&self, value: T) {
        let jobs: Vec<(Target, Job)> = {
            let mut inner = self.inner.lock().unwrap();
            inner.latest = Some(value.clone());
            inner.prune_dead();

            let jobs = inner
                .subscriptions
                .iter()
                .map(|s| {
                    let action = Arc::clone(&s.action);
                    let value = value.clone();
                    (s.target, Box::new(move || (*action)(value)) as Job)
                })
                .collect();
            inner.subscriptions.retain(|s| !s.once);
            jobs
        };

        if jobs.is_empty() {
            trace!("publish with no live subscriptions, value stored only");
            return;
        }
        trace!("dispatching to {} subscription(s)", jobs.len());
        for (target, job) in jobs {
            self.context.dispatch(target, job);
        }
    }

    /// The most recent value passed to [`publish`](Publisher::publish), if any.
    pub fn latest(&self) -> Option<T> {
        self.inner.lock().unwrap().latest.clone()
    }

    /// Number of live subscriptions, after pruning dead subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.prune_dead();
        inner.subscriptions.len()
    }

    /// Removes every subscription registered under this subscriber
    /// identity. Idempotent; a no-op when none match.
    pub fn unsubscribe<S: Any + Send + Sync>(&self, subscriber: &Arc<S>) {
        let subscriber = SubscriberRef::new(subscriber);
        self.inner.lock().unwrap().remove_subscriber(&subscriber);
    }

    pub(crate) fn context(&self) -> &DeliveryContext {
        &self.context
    }

    pub(crate) fn chain_identity(&self) -> Arc<Mutex<PublisherInner<T>>> {
        Arc::clone(&self.inner)
    }
}

impl<T: Clone + Send + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::SubscriptionBag;
    use std::sync::mpsc;
    use std::time::Duration;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| sink.lock().unwrap().push(value))
    }

    #[test]
    fn delivers_in_subscribe_order() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let first = Arc::new(1u8);
        let second = Arc::new(2u8);
        let third = Arc::new(3u8);
        let (seen, _) = recorder::<&'static str>();

        for (subscriber, tag) in [(&first, "first"), (&second, "second"), (&third, "third")] {
            let sink = Arc::clone(&seen);
            publisher.subscribe(subscriber, move |_| sink.lock().unwrap().push(tag));
        }
        publisher.publish(0);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn main_lane_preserves_order_across_threads() -> Result<(), anyhow::Error> {
        let _ = pretty_env_logger::try_init();

        let publisher = Publisher::<u32>::new();
        let subscribers: Vec<_> = (0..3u8).map(Arc::new).collect();
        let (seen, _) = recorder::<u8>();
        let (done_tx, done_rx) = mpsc::channel();

        for (index, subscriber) in subscribers.iter().enumerate() {
            let sink = Arc::clone(&seen);
            let done_tx = done_tx.clone();
            publisher.subscribe(subscriber, move |_| {
                sink.lock().unwrap().push(index as u8);
                done_tx.send(()).unwrap();
            });
        }
        publisher.publish(42);

        for _ in 0..3 {
            done_rx.recv_timeout(Duration::from_secs(5))?;
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn background_lane_delivers() -> Result<(), anyhow::Error> {
        let publisher = Publisher::<String>::new();
        let subscriber = Arc::new(());
        let (value_tx, value_rx) = mpsc::channel();

        publisher.subscribe_with(
            &subscriber,
            SubscribeOptions::on(Target::Background),
            move |value| value_tx.send(value).unwrap(),
        );
        publisher.publish("over there".to_owned());

        assert_eq!(value_rx.recv_timeout(Duration::from_secs(5))?, "over there");
        Ok(())
    }

    #[test]
    fn once_fires_exactly_once() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        publisher.once(&subscriber, record);
        publisher.publish(1);
        publisher.publish(2);
        publisher.publish(3);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn latest_replays_to_late_subscriber() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        publisher.publish(5);
        publisher.subscribe_with(&subscriber, SubscribeOptions::latest(), record);
        publisher.publish(7);

        assert_eq!(*seen.lock().unwrap(), vec![5, 7]);
    }

    #[test]
    fn once_satisfied_by_replay_registers_nothing() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        publisher.publish(5);
        let pending = publisher.once_with(&subscriber, SubscribeOptions::latest(), record);

        assert!(pending.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert_eq!(publisher.subscriber_count(), 0);

        publisher.publish(6);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn seeded_publisher_replays_initial_value() {
        let publisher = Publisher::with_value_and_context(9u32, DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        publisher.subscribe_with(&subscriber, SubscribeOptions::latest(), record);

        assert_eq!(*seen.lock().unwrap(), vec![9]);
        assert_eq!(publisher.latest(), Some(9));
    }

    #[test]
    fn dead_subscriber_is_pruned_without_delivery() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        publisher.subscribe(&subscriber, record);
        drop(subscriber);
        publisher.publish(1);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let bystander = Arc::new(());
        let (seen, record) = recorder();
        let (other_seen, other_record) = recorder();

        publisher.subscribe(&subscriber, record);
        publisher.subscribe(&bystander, other_record);

        publisher.unsubscribe(&subscriber);
        publisher.unsubscribe(&subscriber);
        publisher.publish(1);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(*other_seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn cancel_through_the_handle_removes_the_subscription() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        let handle = publisher.subscribe(&subscriber, record);
        handle.cancel();
        publisher.publish(1);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn bag_disposal_cancels_only_its_members() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber_a = Arc::new("a".to_owned());
        let subscriber_c = Arc::new("c".to_owned());
        let (seen_a, record_a) = recorder();
        let (seen_c, record_c) = recorder();

        let bag_one = SubscriptionBag::new();
        let bag_two = SubscriptionBag::new();
        publisher
            .subscribe(&subscriber_a, record_a)
            .retained_by(&bag_one)
            .unwrap();
        publisher
            .subscribe(&subscriber_c, record_c)
            .retained_by(&bag_two)
            .unwrap();

        drop(bag_one);
        publisher.publish(1);

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(*seen_c.lock().unwrap(), vec![1]);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn bag_disposal_spares_out_of_bag_registrations_of_same_subscriber() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (bagged_seen, bagged_record) = recorder();
        let (free_seen, free_record) = recorder();

        let bag = SubscriptionBag::new();
        publisher
            .subscribe(&subscriber, bagged_record)
            .retained_by(&bag)
            .unwrap();
        publisher.subscribe(&subscriber, free_record);

        drop(bag);
        publisher.publish(1);

        assert!(bagged_seen.lock().unwrap().is_empty());
        assert_eq!(*free_seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn reentrant_subscribe_lands_after_the_snapshot() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let outer = Arc::new("outer".to_owned());
        let late = Arc::new("late".to_owned());
        let (outer_seen, _) = recorder::<u32>();
        let (late_seen, _) = recorder::<u32>();

        {
            let reentered = publisher.clone();
            let outer_sink = Arc::clone(&outer_seen);
            let late_sink = Arc::clone(&late_seen);
            let late = Arc::clone(&late);
            publisher.once(&outer, move |value| {
                outer_sink.lock().unwrap().push(value);
                let sink = Arc::clone(&late_sink);
                reentered.subscribe(&late, move |value| sink.lock().unwrap().push(value));
            });
        }

        publisher.publish(1);
        assert_eq!(*outer_seen.lock().unwrap(), vec![1]);
        assert!(late_seen.lock().unwrap().is_empty());

        publisher.publish(2);
        assert_eq!(*late_seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn publish_with_no_subscribers_stores_the_value() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        publisher.publish(11);
        assert_eq!(publisher.latest(), Some(11));
    }

    #[test]
    fn once_then_two_publishes() {
        let publisher = Publisher::<i32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let (seen, record) = recorder();

        publisher.once(&subscriber, record);
        publisher.publish(1);
        publisher.publish(2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
