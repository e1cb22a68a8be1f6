//! One registered interest held by a [`Publisher`](crate::Publisher).

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;

use super::PublisherInner;
use crate::bag::{BagId, SubscriptionBag};
use crate::dispatch::Target;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BagError {
    /// A subscription belongs to at most one bag. Registering it a second
    /// time is refused and the first bag keeps its claim.
    #[error("subscription already retained by bag {existing}, refusing bag {requested}")]
    AlreadyRetained { existing: BagId, requested: BagId },
}

/// Non-owning handle to a subscriber identity.
///
/// Holds a weak reference to the caller's `Arc`, used only for identity
/// comparison and liveness checks. It is never upgraded, so the publisher
/// never extends the subscriber's lifetime.
#[derive(Clone)]
pub struct SubscriberRef {
    handle: Weak<dyn Any + Send + Sync>,
}

impl SubscriberRef {
    /// Downgrades `subscriber` into an identity handle.
    pub fn new<S: Any + Send + Sync>(subscriber: &Arc<S>) -> Self {
        let subscriber: Arc<dyn Any + Send + Sync> = subscriber.clone();
        let handle: Weak<dyn Any + Send + Sync> = Arc::downgrade(&subscriber);
        SubscriberRef { handle }
    }

    /// Whether the referenced subscriber still exists.
    pub fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }

    pub(crate) fn refers_to(&self, other: &SubscriberRef) -> bool {
        self.identity() == other.identity()
    }

    // Allocation address, stable for the life of the weak reference.
    fn identity(&self) -> *const () {
        self.handle.as_ptr().cast::<()>()
    }
}

/// A registered (subscriber, callback, lane, once-flag) tuple.
///
/// Owned by the publisher that created it for its delivery lifetime, and
/// optionally also held by a [`SubscriptionBag`] for cancellation. The link
/// back to the publisher is weak, so a subscription outliving its publisher
/// cancels into nothing.
pub struct Subscription<T> {
    pub(super) action: Arc<dyn Fn(T) + Send + Sync>,
    pub(super) subscriber: SubscriberRef,
    pub(super) once: bool,
    pub(super) target: Target,
    publisher: Weak<Mutex<PublisherInner<T>>>,
    bag: Mutex<Option<BagId>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub(super) fn new(
        subscriber: SubscriberRef,
        publisher: Weak<Mutex<PublisherInner<T>>>,
        once: bool,
        target: Target,
        action: Arc<dyn Fn(T) + Send + Sync>,
    ) -> Self {
        Subscription {
            action,
            subscriber,
            once,
            target,
            publisher,
            bag: Mutex::new(None),
        }
    }

    /// Registers this subscription into `bag`, so that dropping the bag
    /// cancels it.
    ///
    /// Consumes the handle (clone it first to keep one). Fails with
    /// [`BagError::AlreadyRetained`] if the subscription already belongs to
    /// a bag; the existing claim is left intact.
    pub fn retained_by(self: Arc<Self>, bag: &SubscriptionBag) -> Result<(), BagError> {
        {
            let mut slot = self.bag.lock().unwrap();
            if let Some(existing) = *slot {
                return Err(BagError::AlreadyRetained {
                    existing,
                    requested: bag.id(),
                });
            }
            *slot = Some(bag.id());
        }
        bag.register(self as Arc<dyn Cancel>);
        Ok(())
    }

    /// Cancels every subscription the owning publisher holds for this
    /// subscriber identity.
    ///
    /// Routed through the publisher's unsubscribe path; the subscription
    /// never edits the list directly. A no-op once the subscriber or the
    /// publisher is gone.
    pub fn cancel(&self) {
        if !self.subscriber.is_alive() {
            return;
        }
        if let Some(inner) = self.publisher.upgrade() {
            inner.lock().unwrap().remove_subscriber(&self.subscriber);
        }
    }

    pub(super) fn bag_id(&self) -> Option<BagId> {
        *self.bag.lock().unwrap()
    }
}

/// Type-erased cancellation seam, letting one bag hold subscriptions of
/// publishers with different value types.
pub(crate) trait Cancel: Send + Sync {
    fn cancel_bag(&self, id: BagId);
}

impl<T: Clone + Send + 'static> Cancel for Subscription<T> {
    fn cancel_bag(&self, id: BagId) {
        if let Some(inner) = self.publisher.upgrade() {
            inner.lock().unwrap().remove_bag(id);
        }
    }
}
