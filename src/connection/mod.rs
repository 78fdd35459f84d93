//! Connection Handler Module
//!
//! This module manages individual client connections. Each accepted
//! client (TCP or unix socket) is served by its own local task running the
//! request/reply state machine in [`handler`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              TCP / unix listener (server)                   │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept(), register client
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read frame  │───>│  Dispatch   │───>│ Send reply  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Framing**: length-prefixed binary requests, validated against size caps
//! - **Pipelining**: several requests in a single read are served in order
//! - **Graceful stop**: idle clients close on shutdown, busy ones finish first

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionLimits, State};
