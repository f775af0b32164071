//! Nothing earbud protocol and session handling.
//!
//! The codec frames bytes, `protocol` and `command` give them meaning, and
//! a session's dispatcher owns the link and serializes exchanges.

pub mod cache;
pub mod codec;
pub mod command;
pub mod dispatcher;
pub mod models;
pub mod protocol;
pub mod session;
