//! Scope-tied bulk cancellation of subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::publisher::Cancel;

/// Identifier of a [`SubscriptionBag`], unique for the life of the process.
pub type BagId = u64;

static NEXT_BAG_ID: AtomicU64 = AtomicU64::new(0);

/// A cancellation scope for subscriptions.
///
/// Subscriptions registered into a bag (via
/// [`Subscription::retained_by`](crate::Subscription::retained_by)) are
/// cancelled when the bag is dropped, keyed by the bag's identifier so only
/// registrations made under this bag are removed. Disposal is the drop
/// itself: tie the bag to the lifetime of the component doing the
/// subscribing and its subscriptions end with it. A dropped bag cannot be
/// reused.
pub struct SubscriptionBag {
    id: BagId,
    members: Mutex<Vec<Arc<dyn Cancel>>>,
}

impl SubscriptionBag {
    /// A new, empty bag with a fresh process-unique identifier.
    ///
    /// Identifiers come from a global atomic counter and are never reused.
    pub fn new() -> Self {
        SubscriptionBag {
            id: NEXT_BAG_ID.fetch_add(1, Ordering::Relaxed),
            members: Mutex::new(Vec::new()),
        }
    }

    /// This bag's identifier.
    pub fn id(&self) -> BagId {
        self.id
    }

    pub(crate) fn register(&self, member: Arc<dyn Cancel>) {
        self.members.lock().unwrap().push(member);
    }
}

impl Default for SubscriptionBag {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionBag {
    fn drop(&mut self) {
        let members = std::mem::take(self.members.get_mut().unwrap());
        if members.is_empty() {
            return;
        }
        debug!(
            "disposing subscription bag {} with {} member(s)",
            self.id,
            members.len()
        );
        for member in members {
            member.cancel_bag(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DeliveryContext;
    use crate::publisher::{BagError, Publisher};
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn identifiers_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (0..50).map(|_| SubscriptionBag::new().id()).collect::<Vec<_>>()))
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "bag id {id} handed out twice");
            }
        }
    }

    #[test]
    fn second_bag_registration_fails_fast() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let bag_one = SubscriptionBag::new();
        let bag_two = SubscriptionBag::new();

        let handle = publisher.subscribe(&subscriber, |_| {});
        handle.clone().retained_by(&bag_one).unwrap();

        let err = handle.clone().retained_by(&bag_two).unwrap_err();
        assert_eq!(
            err,
            BagError::AlreadyRetained {
                existing: bag_one.id(),
                requested: bag_two.id(),
            }
        );

        // The first claim still works.
        drop(bag_one);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn disposing_a_bag_after_its_once_member_fired_is_a_no_op() {
        let publisher = Publisher::<u32>::with_context(DeliveryContext::inline());
        let subscriber = Arc::new(());
        let bag = SubscriptionBag::new();

        let pending = publisher.once(&subscriber, |_| {}).unwrap();
        pending.retained_by(&bag).unwrap();

        publisher.publish(1);
        assert_eq!(publisher.subscriber_count(), 0);

        drop(bag);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn empty_bag_drops_quietly() {
        drop(SubscriptionBag::new());
    }
}
