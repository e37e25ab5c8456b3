//! Chatter mediator library.
//!
//! Exposes the mediator server for use in tests and embedding.
//! The mediator accepts WebSocket connections from game clients, forwards
//! their messages to a room service, and routes the replies back to one
//! client or to all of them.

pub mod backend;
pub mod config;
pub mod registry;
pub mod server;
pub mod session;
