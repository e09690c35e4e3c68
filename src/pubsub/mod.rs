//! Subscription Module
//!
//! Routes container mutation events to subscribed sessions.
//!
//! ## Architecture
//! ```text
//!  handlers ──publish──►┌──────────────┐  swap  ┌─────────────────┐
//!                       │ event queue  │───────►│ delivery worker │──► sessions
//!  subscribe ─sentinel─►└──────────────┘        └─────────────────┘
//! ```
//! - One queue, one worker thread: every event is delivered in enqueue order
//! - A new subscription enqueues a snapshot-end sentinel; the worker replays
//!   the container to that subscriber when it reaches the sentinel, and only
//!   then starts forwarding live events to it
//! - Groups fan a late-joining container out to existing group subscribers

mod engine;
mod group;
mod waiters;

pub use engine::{EventInfo, Subscriber, SubscriptionEngine, SubscriptionInfo};
pub use group::{GroupManager, GroupSubscriber, GROUP_META_PREFIX};
pub use waiters::WaitQueue;
