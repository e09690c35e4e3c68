//! Client Module
//!
//! Blocking client for the binary protocol.
//!
//! ## Architecture
//! - `Link`: one socket plus a reader thread feeding a frame channel
//! - `Connection`: the primary link, cluster links opened on demand,
//!   handle bookkeeping and event callbacks
//!
//! Waiting on all links at once is a crossbeam `Select` over the links'
//! frame channels.

mod connection;
mod link;

pub use connection::{Connection, Event, EventCallback, Handle, TraceDirection, TraceHook};
pub use link::LinkId;
