//! Nothing Ear D-Bus Service
//!
//! This service talks to Nothing earbuds over their SPP control channel
//! and exposes connection management, settings and device actions on the
//! session bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::{discovery::BluezDiscovery, manager::EarManager, rfcomm::RfcommConnector};
use dbus::EarService;
use event::{EarEvent, EventBus};

mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod nothing;
#[cfg(test)]
mod testutil;

use crate::{dbus::EarServiceSignals, error::Result};

const OBJECT_PATH: &str = "/org/nothingd/manager";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting nothingd D-Bus service...");

   // Load configuration
   let config = Arc::new(config::Config::load()?);
   info!(
      "Loaded configuration with {} known devices",
      config.known_devices.len()
   );

   // Create event channel
   let event_bus = EventProcessor::new();

   // Create session manager over BlueZ
   let discovery = Arc::new(BluezDiscovery::new().await?);
   let connector = Arc::new(RfcommConnector::new(config.connect_timeout()));
   let manager = EarManager::new(config, discovery, connector, event_bus.clone());

   // Create D-Bus service
   let service = EarService::new(manager.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.nothingd")?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("nothingd D-Bus service started at org.nothingd");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down nothingd...");
   manager.shutdown().await;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<EarEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<EarEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<EarService>, event: EarEvent) -> Result<()> {
      match event {
         EarEvent::SessionConnected(info) => {
            let json = serde_json::to_string(&info).unwrap_or_default();
            iface.session_connected(&json).await?;
            iface.get().await.session_changed(iface.signal_emitter()).await?;
         },
         EarEvent::SessionClosed(closed) => {
            info!("Session {} to {} closed: {}", closed.id, closed.address, closed.reason);
            iface.session_closed(&closed.id.to_string()).await?;
            iface.get().await.session_changed(iface.signal_emitter()).await?;
         },
         EarEvent::SettingChanged(category, value) => {
            iface
               .setting_changed(&category.to_string(), &value.to_json().to_string())
               .await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, EarService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: EarEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
