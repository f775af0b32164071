//! Locating connected earbuds and the RFCOMM channel of their control service.

use bluer::{Address, Session};
use futures::future::BoxFuture;
use log::{debug, warn};
use smol_str::SmolStr;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::DiscoveryError;

/// A Bluetooth device currently connected at the baseband level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
   pub address: Address,
   pub name: SmolStr,
}

/// How to recognize the control service among a device's SDP records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHint {
   /// Lowercase fragment of the service name.
   pub name: &'static str,
   pub uuid: Uuid,
}

/// The "NT LINK" SPP service exposed once the companion app has paired.
pub const NOTHING_SPP: ServiceHint = ServiceHint {
   name: "nt link",
   uuid: uuid::uuid!("aeac4a03-dff5-498f-843a-34487cf133eb"),
};

pub trait Discovery: Send + Sync {
   /// Connected devices whose name contains `name_filter`, case-insensitively.
   fn connected_devices(
      &self,
      name_filter: Option<String>,
   ) -> BoxFuture<'_, Result<Vec<DiscoveredDevice>, DiscoveryError>>;

   /// RFCOMM channel of the service matching `hint` on `address`.
   fn resolve_channel(
      &self,
      address: Address,
      hint: ServiceHint,
   ) -> BoxFuture<'_, Result<u8, DiscoveryError>>;
}

/// Keeps devices whose name contains `filter`, ignoring case.
pub fn filter_by_name(devices: Vec<DiscoveredDevice>, filter: Option<&str>) -> Vec<DiscoveredDevice> {
   let Some(filter) = filter.map(str::to_lowercase) else {
      return devices;
   };
   devices
      .into_iter()
      .filter(|d| d.name.to_lowercase().contains(&filter))
      .collect()
}

/// Scans `sdptool search` output for the channel of the record matching `hint`.
pub fn parse_sdp_channel(output: &str, hint: ServiceHint) -> Option<u8> {
   let uuid = hint.uuid.to_string();
   let mut tracking = false;
   for line in output.lines().map(str::trim) {
      if let Some(name) = line.strip_prefix("Service Name:") {
         // Each record starts over
         tracking = name.to_lowercase().contains(hint.name);
      } else if let Some(value) = line.strip_prefix("UUID 128:") {
         tracking |= value.to_lowercase().contains(&uuid);
      } else if let Some(channel) = line.strip_prefix("Channel:")
         && tracking
         && let Ok(channel) = channel.trim().parse::<u8>()
      {
         return Some(channel);
      }
   }
   None
}

/// Discovery backed by BlueZ: bluer for device state, `sdptool` for SDP records.
pub struct BluezDiscovery {
   session: Session,
}

impl BluezDiscovery {
   pub async fn new() -> Result<Self, DiscoveryError> {
      Ok(Self {
         session: Session::new().await?,
      })
   }

   async fn list_connected(&self, name_filter: Option<String>) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
      let mut found = Vec::new();
      for adapter_name in self.session.adapter_names().await? {
         let adapter = self.session.adapter(&adapter_name)?;
         for address in adapter.device_addresses().await? {
            let device = adapter.device(address)?;
            if !device.is_connected().await.unwrap_or(false) {
               continue;
            }
            let name = match device.name().await {
               Ok(Some(name)) => name,
               _ => device.alias().await.unwrap_or_default(),
            };
            debug!("{adapter_name}: connected device {address} ({name})");
            found.push(DiscoveredDevice {
               address,
               name: name.into(),
            });
         }
      }
      Ok(filter_by_name(found, name_filter.as_deref()))
   }

   async fn sdp_channel(&self, address: Address, hint: ServiceHint) -> Result<u8, DiscoveryError> {
      let address_str = address.to_string();
      let output = run_tool("sdptool", &["search", "--bdaddr", &address_str, "SP"]).await?;
      parse_sdp_channel(&output, hint).ok_or_else(|| {
         warn!("No '{}' record in SDP output for {address}", hint.name);
         DiscoveryError::NotFound(address)
      })
   }
}

impl Discovery for BluezDiscovery {
   fn connected_devices(
      &self,
      name_filter: Option<String>,
   ) -> BoxFuture<'_, Result<Vec<DiscoveredDevice>, DiscoveryError>> {
      Box::pin(self.list_connected(name_filter))
   }

   fn resolve_channel(
      &self,
      address: Address,
      hint: ServiceHint,
   ) -> BoxFuture<'_, Result<u8, DiscoveryError>> {
      Box::pin(self.sdp_channel(address, hint))
   }
}

async fn run_tool(cmd: &str, args: &[&str]) -> Result<String, DiscoveryError> {
   let command = format!("{cmd} {}", args.join(" "));
   let output = Command::new(cmd)
      .args(args)
      .output()
      .await
      .map_err(|e| DiscoveryError::Tool {
         command: command.clone(),
         output: e.to_string(),
      })?;
   if !output.status.success() {
      return Err(DiscoveryError::Tool {
         command,
         output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
   }
   Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
