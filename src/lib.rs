//! Thread-aware publish/subscribe with lifecycle-managed subscriptions.
//!
//! A [`Publisher`] holds a typed value and broadcasts it to subscriptions
//! on one of two delivery lanes (an ordered main lane or an unordered
//! background pool, see [`Target`]). Subscribers are identified by a weak
//! handle: when the owning `Arc` is dropped, its subscriptions are pruned
//! automatically on the next publish, with no explicit unsubscribe needed.
//! A [`SubscriptionBag`] cancels every subscription registered into it when
//! the bag itself is dropped, which ties subscription lifetimes to the
//! owning component's scope.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use observable::{DeliveryContext, Publisher, SubscriptionBag};
//!
//! let screen = Arc::new(String::from("settings"));
//! let bag = SubscriptionBag::new();
//!
//! // Inline delivery keeps this example synchronous; the default
//! // `Publisher::new()` delivers asynchronously on shared lanes.
//! let taps = Publisher::<u32>::with_context(DeliveryContext::inline());
//!
//! taps.subscribe(&screen, |count| log::info!("tapped {count} times"))
//!     .retained_by(&bag)
//!     .unwrap();
//!
//! taps.publish(3);
//! assert_eq!(taps.latest(), Some(3));
//!
//! drop(bag); // the subscription ends with the bag
//! assert_eq!(taps.subscriber_count(), 0);
//! ```
//!
//! Publishers also compose into sequential task chains, where each stage
//! signals the next; see the [`task`](crate::Publisher::wait) layer.

mod bag;
mod dispatch;
mod publisher;
mod task;

pub use bag::{BagId, SubscriptionBag};
pub use dispatch::{
    DeliveryContext, Dispatch, InlineDispatcher, Job, PoolDispatcher, QueueDispatcher, Target,
};
pub use publisher::{BagError, Publisher, SubscribeOptions, SubscriberRef, Subscription};
