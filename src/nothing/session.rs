//! A live connection to one pair of earbuds.
//!
//! [`EarSession`] is a cheap handle; the link itself is owned by the
//! session's dispatcher task. Commands are validated against the resolved
//! model before they are queued, so unsupported or out-of-range requests
//! never reach the device.

use std::{
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
   time::Duration,
};

use bluer::Address;
use crossbeam::atomic::AtomicCell;
use log::{info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use smol_str::SmolStr;
use tokio::{
   sync::{mpsc, oneshot},
   time,
};
use uuid::Uuid;

use crate::{
   bluetooth::rfcomm::Connector,
   config::Config,
   error::{ConnectionError, DispatchError, EarError, ProtocolError, Result},
   event::{EarEvent, EventSender},
   nothing::{
      cache::StateCache,
      codec::Frame,
      command::{Category, Command, Response},
      dispatcher::Dispatcher,
      models::{DeviceModel, Identity, model_by_id},
      protocol::{Bud, Ring},
   },
};

/// Requests queued per session before submitters wait
const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
   Disconnected,
   Connecting,
   Connected,
   Closing,
}

/// Where a read may be answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
   /// Always ask the device.
   #[default]
   Device,
   /// Answer from the state cache when it holds a value.
   PreferCached,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
   pub id: Uuid,
   pub address: String,
   pub channel: u8,
   pub status: SessionStatus,
   pub model: DeviceModel,
}

/// State shared between session handles and the dispatcher.
pub(crate) struct Shared {
   pub id: Uuid,
   pub address: Address,
   pub channel: u8,
   pub status: AtomicCell<SessionStatus>,
   pub model: RwLock<Arc<DeviceModel>>,
   pub cache: StateCache,
   pub events: EventSender,
   /// Set once `SessionConnected` went out
   pub announced: AtomicBool,
}

impl Shared {
   fn new(address: Address, channel: u8, events: EventSender) -> Self {
      let model = DeviceModel::unknown();
      Self {
         id: Uuid::new_v4(),
         address,
         channel,
         status: AtomicCell::new(SessionStatus::Connecting),
         cache: StateCache::new(model.capabilities),
         model: RwLock::new(Arc::new(model)),
         events,
         announced: AtomicBool::new(false),
      }
   }

   pub fn info(&self) -> SessionInfo {
      SessionInfo {
         id: self.id,
         address: self.address.to_string(),
         channel: self.channel,
         status: self.status.load(),
         model: (**self.model.read()).clone(),
      }
   }

   /// Swaps the model and drops every cached value.
   fn set_model(&self, model: DeviceModel) {
      self.cache.reset(model.capabilities);
      *self.model.write() = Arc::new(model);
   }
}

pub(crate) enum Request {
   Exchange(Exchange),
   Close(oneshot::Sender<()>),
}

pub(crate) struct Exchange {
   pub command: Command,
   pub frame: Frame,
   pub timeout: Duration,
   pub reply: oneshot::Sender<std::result::Result<Response, DispatchError>>,
}

/// Handle to a session. Clones share the same link and cache.
#[derive(Clone)]
pub struct EarSession {
   shared: Arc<Shared>,
   inbox: mpsc::Sender<Request>,
   config: Arc<Config>,
}

impl std::fmt::Debug for EarSession {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("EarSession").finish_non_exhaustive()
   }
}

impl EarSession {
   /// Opens the link, starts the dispatcher and identifies the device.
   /// `model`, when given, replaces whatever identification resolves to.
   pub async fn open(
      connector: &dyn Connector,
      address: Address,
      channel: u8,
      config: Arc<Config>,
      events: EventSender,
      model: Option<DeviceModel>,
   ) -> std::result::Result<Self, ConnectionError> {
      info!("Opening session to {address} on channel {channel}");

      let open_failed = |reason: String| ConnectionError::TransportOpenFailed {
         address,
         channel,
         reason,
      };
      let link = match time::timeout(config.connect_timeout(), connector.open(address, channel)).await {
         Ok(Ok(link)) => link,
         Ok(Err(e)) => return Err(open_failed(e.to_string())),
         Err(_) => return Err(open_failed("connect timed out".to_string())),
      };

      let shared = Arc::new(Shared::new(address, channel, events));
      let (inbox, requests) = mpsc::channel(QUEUE_DEPTH);
      tokio::spawn(Dispatcher::new(shared.clone(), link, requests).run());

      let session = Self {
         shared,
         inbox,
         config,
      };
      if let Err(e) = session.handshake(model).await {
         warn!("Handshake with {address} failed: {e}");
         session.close().await;
         return Err(match e {
            DispatchError::Timeout(_) => ConnectionError::HandshakeTimeout,
            other => ConnectionError::HandshakeFailed(other),
         });
      }
      Ok(session)
   }

   async fn handshake(&self, model: Option<DeviceModel>) -> std::result::Result<(), DispatchError> {
      let identity = self.identify(self.config.handshake_timeout()).await?;
      let model = match model {
         Some(model) => fill_identity(model, identity.serial.clone(), identity.sku.clone()),
         None => self.resolve_model(&identity),
      };
      info!(
         "{} identified as {model} (serial {})",
         self.shared.address,
         identity.serial.as_deref().unwrap_or("?")
      );
      self.shared.set_model(model);

      self
         .shared
         .status
         .compare_exchange(SessionStatus::Connecting, SessionStatus::Connected)
         .map_err(|_| DispatchError::SessionClosed)?;
      self.shared.announced.store(true, Ordering::Release);
      self
         .shared
         .events
         .emit(EarEvent::SessionConnected(self.shared.info()));
      Ok(())
   }

   async fn identify(&self, timeout: Duration) -> std::result::Result<Identity, DispatchError> {
      match self.submit(Command::Identify, timeout).await? {
         Response::Identity(identity) => Ok(identity),
         other => Err(DispatchError::Protocol(ProtocolError::UnexpectedResponse {
            opcode: 0,
            expected: other.category().into(),
         })),
      }
   }

   /// Catalog lookup, falling back to a model pinned in the configuration.
   fn resolve_model(&self, identity: &Identity) -> DeviceModel {
      let model = DeviceModel::from_identity(identity);
      if model.is_known() {
         return model;
      }
      let pinned = self
         .config
         .known_device(self.shared.address)
         .and_then(|d| d.model_id.as_deref())
         .and_then(model_by_id);
      match pinned {
         Some(info) => {
            info!("Using pinned model {} for {}", info.id, self.shared.address);
            DeviceModel::from_info(info).with_identity(identity)
         },
         None => {
            warn!(
               "Unrecognized SKU {:?}; optional features disabled until a model is set",
               identity.sku
            );
            model
         },
      }
   }

   pub fn id(&self) -> Uuid {
      self.shared.id
   }

   pub fn address(&self) -> Address {
      self.shared.address
   }

   pub fn status(&self) -> SessionStatus {
      self.shared.status.load()
   }

   pub fn is_connected(&self) -> bool {
      self.status() == SessionStatus::Connected
   }

   pub fn model(&self) -> Arc<DeviceModel> {
      self.shared.model.read().clone()
   }

   pub fn info(&self) -> SessionInfo {
      self.shared.info()
   }

   pub fn cache(&self) -> &StateCache {
      &self.shared.cache
   }

   /// Validates `command` against the model and runs it through the dispatcher.
   pub async fn execute(&self, command: Command) -> std::result::Result<Response, DispatchError> {
      if !self.is_connected() {
         return Err(DispatchError::NoSession);
      }
      let model = self.model();
      let command = adapt_to_model(command, &model);
      if let Some(cap) = command.category().required_capability()
         && !model.supports(cap)
      {
         return Err(DispatchError::Unsupported(cap));
      }
      let timeout = self.config.command_timeout(command.category());
      self.submit(command, timeout).await
   }

   async fn submit(&self, command: Command, timeout: Duration) -> std::result::Result<Response, DispatchError> {
      let frame = command.encode()?;
      let (reply, rx) = oneshot::channel();
      self
         .inbox
         .send(Request::Exchange(Exchange {
            command,
            frame,
            timeout,
            reply,
         }))
         .await
         .map_err(|_| DispatchError::SessionClosed)?;
      rx.await.map_err(|_| DispatchError::SessionClosed)?
   }

   /// Reads one category, from the cache if `policy` allows.
   pub async fn read(&self, category: Category, policy: CachePolicy) -> Result<Response> {
      if !self.is_connected() {
         return Err(DispatchError::NoSession.into());
      }
      let Some(command) = category.read() else {
         return Err(EarError::InvalidArgument(format!("{category} cannot be read")));
      };
      if let Some(cap) = category.required_capability()
         && !self.model().supports(cap)
      {
         return Err(DispatchError::Unsupported(cap).into());
      }
      if policy == CachePolicy::PreferCached
         && let Some(cached) = self.shared.cache.get(category)
      {
         return Ok(cached.value);
      }
      Ok(self.execute(command).await?)
   }

   /// Re-runs identification and adopts the resulting model if the catalog
   /// knows it.
   pub async fn detect(&self) -> Result<Arc<DeviceModel>> {
      let response = self.execute(Command::Identify).await?;
      let Response::Identity(identity) = response else {
         return Ok(self.model());
      };
      let detected = self.resolve_model(&identity);
      if detected.is_known() && *self.model() != detected {
         info!("Detected {detected} on {}", self.shared.address);
         self.shared.set_model(detected);
      }
      Ok(self.model())
   }

   /// Replaces the resolved model; the cache is cleared and re-gated.
   pub fn override_model(&self, model: DeviceModel) {
      let current = self.model();
      let model = fill_identity(model, current.serial.clone(), current.sku.clone());
      info!("Model for {} set to {model}", self.shared.address);
      self.shared.set_model(model);
   }

   /// Ends the session. Queued commands fail with `SessionClosed`; a command
   /// already on the wire is allowed to finish first. Idempotent.
   pub async fn close(&self) {
      let status = self.shared.status.load();
      if status == SessionStatus::Disconnected {
         return;
      }
      let _ = self.shared.status.compare_exchange(status, SessionStatus::Closing);

      let (tx, rx) = oneshot::channel();
      if self.inbox.send(Request::Close(tx)).await.is_ok() {
         let _ = rx.await;
      }
   }
}

/// Keeps the override's serial and SKU, falling back to what the device reported.
fn fill_identity(model: DeviceModel, serial: Option<SmolStr>, sku: Option<SmolStr>) -> DeviceModel {
   DeviceModel {
      serial: model.serial.or(serial),
      sku: model.sku.or(sku),
      ..model
   }
}

/// Fills in the ring target the model expects.
fn adapt_to_model(command: Command, model: &DeviceModel) -> Command {
   match command {
      Command::Ring(ring) if !model.base.rings_per_bud() => Command::Ring(Ring { bud: None, ..ring }),
      Command::Ring(Ring { enabled, bud: None }) => Command::Ring(Ring {
         enabled,
         bud: Some(Bud::Right),
      }),
      other => other,
   }
}
