//! Shared protocol definitions for the chatter mediator wire format.

pub mod codec;
pub mod message;
