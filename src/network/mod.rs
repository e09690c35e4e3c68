//! Network Module
//!
//! Server side transport: listeners, sessions and their outbound queues.
//!
//! ## Architecture
//! - Single accept thread polling TCP and the local socket
//! - One read thread per session running the protocol state machine
//! - One writer thread per session draining its outbound queue
//! - Commands routed through the engine's command table

mod outbound;
mod server;
mod session;
mod stream;

pub use outbound::{Outbound, SendAccounting};
pub use server::{Server, ServerHandle};
pub use session::{HandleInfo, HandleTable, Session};
pub use stream::{is_disconnect, Stream};
