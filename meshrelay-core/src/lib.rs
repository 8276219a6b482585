//! Dual-transport message router: peer directory, outbox, delivery
//! tracking, persistent chat state, and per-peer transport selection.
//!
//! [`core::Core`] is the composition root — construct one per running
//! client, wire it to a mesh and/or relay transport, and drive it from a
//! single task. Nothing else in this crate is a singleton.

pub mod chatstore;
pub mod config;
pub mod core;
pub mod lifecycle;
pub mod outbox;
pub mod peer;
pub mod persistence;
pub mod router;
pub mod tracker;
pub mod transport;
