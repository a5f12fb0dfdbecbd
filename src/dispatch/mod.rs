pub mod dispatcher;
pub mod metrics;
pub mod throttle;

pub use dispatcher::{channel_for, BboBroadcast, BroadcastDispatcher, FanoutSink, BBO_CHANNEL_PREFIX};
pub use metrics::{DispatchMetrics, DispatcherStats};
pub use throttle::{Offer, ThrottleSlots};
