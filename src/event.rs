//! Event handling for session and setting updates.
//!
//! The dispatcher emits events when a session opens or closes, and whenever
//! a cached setting changes, whether by our own write or by the device.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::nothing::{command::Category, command::Response, session::SessionInfo};

/// Events that can be emitted by the service.
#[derive(Debug, Clone)]
pub enum EarEvent {
   SessionConnected(SessionInfo),
   SessionClosed(SessionClosed),
   SettingChanged(Category, Response),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionClosed {
   pub id: Uuid,
   pub address: String,
   pub reason: String,
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: EarEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
