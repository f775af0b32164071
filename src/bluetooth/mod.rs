//! Bluetooth communication layer.
//!
//! This module provides the RFCOMM transport, device and channel discovery,
//! and the registry that owns the live session.

pub mod discovery;
pub mod manager;
pub mod rfcomm;
