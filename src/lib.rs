//! # Tessera
//!
//! A network data-structure server with:
//! - Named in-memory containers (lists and maps) shared by every client
//! - Ordered snapshot-then-live subscriptions and container groups
//! - Text, binary and read-only HTTP access on the same port
//! - A blocking client that routes to cluster servers on demand
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              TCP / local socket Server                       │
//! │         (thread per session, writer per session)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ text line / binary frame / HTTP request
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Command Table                             │
//! │             (access check, catch_unwind)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │ Containers  │─publish─►│ Subscription │
//!   │  (RwLock)   │          │    Engine    │
//!   └─────────────┘          └──────┬───────┘
//!                                   │ delivery worker
//!                                   ▼
//!                           session outbound queues
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod auth;
pub mod protocol;
pub mod container;
pub mod pubsub;
pub mod dispatch;
pub mod network;
pub mod engine;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorCode, Result, TesseraError};
pub use config::{ClientOptions, Config};
pub use engine::Engine;
pub use network::{Server, ServerHandle};
pub use client::Connection;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Tessera
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
