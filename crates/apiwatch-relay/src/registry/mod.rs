//! In-memory subscriber registry for the stream relay.

mod subscribers;

pub use subscribers::{FanOutReport, SubscriberRegistry, SubscriptionId};
