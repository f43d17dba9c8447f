//! Core subsystems: the flag store, the freshness pipeline (polling and
//! streaming), and the analytics event queue.

mod events;
mod polling;
mod store;
mod streaming;

pub use events::{batch_body, Event, EventQueue, EventQueueConfig, EventSender};
pub use polling::{PollCallback, PollingConfig, PollingManager};
pub use store::{FlagStore, FlagStoreStats};
pub use streaming::{
    ConnectionLimitCallback, FallbackCallback, FlagDeleteCallback, FlagUpdateCallback,
    FlagsResetCallback, SseDecoder, SseEvent, StreamErrorCode, StreamingCallbacks,
    StreamingConfig, StreamingManager, StreamingState, SubscriptionErrorCallback,
};
