//! Error types for the Nothing earbuds service.
//!
//! Each stage of a request has its own taxonomy: discovery, connection
//! establishment, command dispatch and the wire protocol. [`EarError`] wraps
//! them all together with the service-level failures.

use bluer::Address;
use thiserror::Error;

pub use crate::nothing::codec::ProtocolError;
use crate::nothing::{command::Category, models::Capability};

/// Failures while locating a device or its SPP channel.
#[derive(Error, Debug)]
pub enum DiscoveryError {
   #[error("No connected device matches {}", filter.as_deref().unwrap_or("<any>"))]
   NoMatch { filter: Option<String> },

   #[error("No SPP service record found for {0}")]
   NotFound(Address),

   #[error("{0} is not connected")]
   NotConnected(Address),

   #[error("Discovery timed out")]
   Timeout,

   #[error("`{command}` failed: {output}")]
   Tool { command: String, output: String },

   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),
}

impl DiscoveryError {
   pub const fn kind(&self) -> &'static str {
      match self {
         Self::NoMatch { .. } => "no_match",
         Self::NotFound(_) => "not_found",
         Self::NotConnected(_) => "not_connected",
         Self::Timeout => "discovery_timeout",
         Self::Tool { .. } => "discovery_tool",
         Self::Bluetooth(_) => "bluetooth",
      }
   }
}

/// Failures while opening a session.
#[derive(Error, Debug)]
pub enum ConnectionError {
   #[error("Failed to open RFCOMM channel {channel} on {address}: {reason}")]
   TransportOpenFailed {
      address: Address,
      channel: u8,
      reason: String,
   },

   #[error("Handshake timed out")]
   HandshakeTimeout,

   #[error("Handshake failed: {0}")]
   HandshakeFailed(DispatchError),
}

impl ConnectionError {
   pub const fn kind(&self) -> &'static str {
      match self {
         Self::TransportOpenFailed { .. } => "transport_open_failed",
         Self::HandshakeTimeout => "handshake_timeout",
         Self::HandshakeFailed(_) => "handshake_failed",
      }
   }
}

/// Failures of a single command against a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
   #[error("No active session")]
   NoSession,

   #[error("Connected model does not support {0}")]
   Unsupported(Capability),

   #[error("Timed out waiting for {0} response")]
   Timeout(Category),

   #[error("Session closed")]
   SessionClosed,

   #[error("Link lost: {0}")]
   LinkLost(String),

   #[error(transparent)]
   Protocol(#[from] ProtocolError),
}

impl DispatchError {
   pub const fn kind(&self) -> &'static str {
      match self {
         Self::NoSession => "no_session",
         Self::Unsupported(_) => "unsupported",
         Self::Timeout(_) => "timeout",
         Self::SessionClosed => "session_closed",
         Self::LinkLost(_) => "link_lost",
         Self::Protocol(e) => e.kind(),
      }
   }

   /// Whether the failure ends the session.
   pub const fn is_fatal(&self) -> bool {
      matches!(self, Self::Timeout(_) | Self::LinkLost(_))
   }
}

/// Main error type for the service.
#[derive(Error, Debug)]
pub enum EarError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error(transparent)]
   Discovery(#[from] DiscoveryError),

   #[error(transparent)]
   Connection(#[from] ConnectionError),

   #[error(transparent)]
   Dispatch(#[from] DispatchError),

   #[error(transparent)]
   Protocol(#[from] ProtocolError),

   #[error("Connection lost")]
   ConnectionLost,

   #[error("Connection closed")]
   ConnectionClosed,

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Unknown model: {0}")]
   UnknownModel(String),

   #[error("Invalid argument: {0}")]
   InvalidArgument(String),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,
}

impl EarError {
   /// Stable machine-readable error category.
   pub const fn kind(&self) -> &'static str {
      match self {
         Self::Bluetooth(_) => "bluetooth",
         Self::DBus(_) => "dbus",
         Self::Io(_) => "io",
         Self::Discovery(e) => e.kind(),
         Self::Connection(e) => e.kind(),
         Self::Dispatch(e) => e.kind(),
         Self::Protocol(e) => e.kind(),
         Self::ConnectionLost => "link_lost",
         Self::ConnectionClosed => "session_closed",
         Self::RequestTimeout => "timeout",
         Self::UnknownModel(_) => "unknown_model",
         Self::InvalidArgument(_) => "invalid_argument",
         Self::ConfigDirNotFound | Self::TomlParse(_) | Self::TomlSerialize(_) => "config",
         Self::ManagerShutdown => "shutdown",
      }
   }
}

/// Convenience type alias for Results with `EarError`.
pub type Result<T> = std::result::Result<T, EarError>;
