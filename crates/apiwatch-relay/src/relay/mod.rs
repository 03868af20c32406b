//! Stream relay: one upstream connection multiplexed to many subscribers.

mod stream;
mod subscription;
mod types;

pub use stream::StreamRelay;
pub use subscription::Subscription;
pub use types::{RelayError, RelayState, RelayStats};
