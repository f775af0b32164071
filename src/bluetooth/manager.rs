//! Process-wide session registry.
//!
//! At most one earbud session is live at a time. Connect, auto-connect,
//! disconnect and model overrides are serialized through an actor, so a
//! replacement always tears the previous session down before the next one
//! is opened. Commands against the live session bypass the actor and go
//! straight to the session's dispatcher.

use std::sync::Arc;

use bluer::Address;
use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::{
   sync::{mpsc, oneshot},
   time,
};

use crate::{
   bluetooth::{
      discovery::{Discovery, NOTHING_SPP},
      rfcomm::Connector,
   },
   config::Config,
   error::{DiscoveryError, DispatchError, EarError, Result},
   event::EventSender,
   nothing::{
      models::{DeviceModel, ModelSelector},
      session::{EarSession, SessionInfo},
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 16;

/// Arguments of [`EarManager::auto_connect`]. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct AutoConnect {
   /// Skip enumeration and use this device.
   pub address: Option<Address>,
   /// Case-insensitive name fragment; defaults to the configured filter.
   pub name_filter: Option<String>,
   /// Skip the SDP lookup and use this channel.
   pub channel: Option<u8>,
   pub model: Option<ModelSelector>,
}

// === Commands ===

enum ManagerCommand {
   Connect {
      address: Address,
      channel: u8,
      model: Option<ModelSelector>,
      reply: oneshot::Sender<Result<SessionInfo>>,
   },
   AutoConnect(AutoConnect, oneshot::Sender<Result<SessionInfo>>),
   Disconnect(oneshot::Sender<()>),
   SetModel(ModelSelector, oneshot::Sender<Result<SessionInfo>>),
   Shutdown(oneshot::Sender<()>),
}

// === Main Manager ===

/// Handle to the session registry.
///
/// This type is cheaply cloneable.
#[derive(Clone)]
pub struct EarManager {
   inbox: mpsc::Sender<ManagerCommand>,
   current: Arc<RwLock<Option<EarSession>>>,
}

impl EarManager {
   pub fn new(
      config: Arc<Config>,
      discovery: Arc<dyn Discovery>,
      connector: Arc<dyn Connector>,
      events: EventSender,
   ) -> Self {
      let (inbox, commands) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let current = Arc::new(RwLock::new(None));
      let actor = ManagerActor {
         config,
         discovery,
         connector,
         events,
         commands,
         current: current.clone(),
      };
      tokio::spawn(actor.run());
      Self { inbox, current }
   }

   async fn request<T>(
      &self,
      make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
   ) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(make(tx))
         .await
         .map_err(|_| EarError::ManagerShutdown)?;
      rx.await.map_err(|_| EarError::ManagerShutdown)
   }

   /// Opens a session on `address`/`channel`, replacing any live one.
   pub async fn connect(
      &self,
      address: Address,
      channel: u8,
      model: Option<ModelSelector>,
   ) -> Result<SessionInfo> {
      self
         .request(|reply| ManagerCommand::Connect {
            address,
            channel,
            model,
            reply,
         })
         .await?
   }

   /// Finds a connected device and its channel, then connects.
   pub async fn auto_connect(&self, params: AutoConnect) -> Result<SessionInfo> {
      self
         .request(|reply| ManagerCommand::AutoConnect(params, reply))
         .await?
   }

   /// Closes the live session, if any.
   pub async fn disconnect(&self) -> Result<()> {
      self.request(ManagerCommand::Disconnect).await
   }

   /// The live session, or `NoSession`.
   pub fn session(&self) -> Result<EarSession> {
      let mut current = self.current.write();
      match current.as_ref() {
         Some(session) if session.is_connected() => Ok(session.clone()),
         Some(session) => {
            debug!("Dropping dead session {}", session.id());
            *current = None;
            Err(DispatchError::NoSession.into())
         },
         None => Err(DispatchError::NoSession.into()),
      }
   }

   /// Re-runs identification on the live session.
   pub async fn detect(&self) -> Result<Arc<DeviceModel>> {
      self.session()?.detect().await
   }

   /// Overrides the live session's model.
   pub async fn set_model(&self, selector: ModelSelector) -> Result<SessionInfo> {
      self
         .request(|reply| ManagerCommand::SetModel(selector, reply))
         .await?
   }

   /// Closes the live session and stops the actor.
   pub async fn shutdown(&self) {
      let _ = self.request(ManagerCommand::Shutdown).await;
   }
}

// === Manager Actor ===

struct ManagerActor {
   config: Arc<Config>,
   discovery: Arc<dyn Discovery>,
   connector: Arc<dyn Connector>,
   events: EventSender,
   commands: mpsc::Receiver<ManagerCommand>,
   current: Arc<RwLock<Option<EarSession>>>,
}

impl ManagerActor {
   async fn run(mut self) {
      info!("Session manager starting up");

      while let Some(cmd) = self.commands.recv().await {
         match cmd {
            ManagerCommand::Connect {
               address,
               channel,
               model,
               reply,
            } => {
               let result = self.connect(address, channel, model).await;
               let _ = reply.send(result);
            },
            ManagerCommand::AutoConnect(params, reply) => {
               let result = self.auto_connect(params).await;
               let _ = reply.send(result);
            },
            ManagerCommand::Disconnect(reply) => {
               self.disconnect().await;
               let _ = reply.send(());
            },
            ManagerCommand::SetModel(selector, reply) => {
               let _ = reply.send(self.set_model(&selector));
            },
            ManagerCommand::Shutdown(reply) => {
               self.disconnect().await;
               let _ = reply.send(());
               break;
            },
         }
      }

      // Cleanup
      self.disconnect().await;
      info!("Session manager shut down");
   }

   async fn connect(
      &mut self,
      address: Address,
      channel: u8,
      model: Option<ModelSelector>,
   ) -> Result<SessionInfo> {
      let model = model
         .filter(|s| !s.is_empty())
         .map(|s| s.resolve())
         .transpose()?;

      self.disconnect().await;

      let session = EarSession::open(
         &*self.connector,
         address,
         channel,
         self.config.clone(),
         self.events.clone(),
         model,
      )
      .await?;

      let info = session.info();
      info!("Session {} connected to {address} on channel {channel}", info.id);
      *self.current.write() = Some(session);
      Ok(info)
   }

   async fn auto_connect(&mut self, params: AutoConnect) -> Result<SessionInfo> {
      let address = match params.address {
         Some(address) => {
            self.verify_connected(address).await?;
            address
         },
         None => self.pick_device(params.name_filter).await?,
      };
      let channel = match params.channel {
         Some(channel) => channel,
         None => self.resolve_channel(address).await,
      };
      self.connect(address, channel, params.model).await
   }

   async fn pick_device(&self, name_filter: Option<String>) -> Result<Address> {
      let filter = name_filter.or_else(|| self.config.default_name_filter.clone());
      let devices = time::timeout(
         self.config.discovery_timeout(),
         self.discovery.connected_devices(filter.clone()),
      )
      .await
      .map_err(|_| DiscoveryError::Timeout)??;

      let Some(device) = devices.into_iter().next() else {
         return Err(DiscoveryError::NoMatch { filter }.into());
      };
      info!("Auto-connect picked {} ({})", device.name, device.address);
      Ok(device.address)
   }

   /// Fails unless BlueZ reports `address` as connected.
   async fn verify_connected(&self, address: Address) -> Result<()> {
      let devices = time::timeout(
         self.config.discovery_timeout(),
         self.discovery.connected_devices(None),
      )
      .await
      .map_err(|_| DiscoveryError::Timeout)??;

      if devices.iter().any(|d| d.address == address) {
         Ok(())
      } else {
         Err(DiscoveryError::NotConnected(address).into())
      }
   }

   /// SDP lookup, falling back to the configured default channel.
   async fn resolve_channel(&self, address: Address) -> u8 {
      let lookup = time::timeout(
         self.config.discovery_timeout(),
         self.discovery.resolve_channel(address, NOTHING_SPP),
      )
      .await
      .unwrap_or(Err(DiscoveryError::Timeout));

      match lookup {
         Ok(channel) => channel,
         Err(e) => {
            let channel = self.config.default_channel;
            warn!("Channel lookup for {address} failed ({e}); using default channel {channel}");
            channel
         },
      }
   }

   async fn disconnect(&mut self) {
      let session = self.current.write().take();
      if let Some(session) = session {
         info!("Closing session {} to {}", session.id(), session.address());
         session.close().await;
      }
   }

   fn set_model(&self, selector: &ModelSelector) -> Result<SessionInfo> {
      let current = self.current.read();
      let session = current
         .as_ref()
         .filter(|s| s.is_connected())
         .ok_or(DispatchError::NoSession)?;
      session.override_model(selector.resolve()?);
      Ok(session.info())
   }
}
