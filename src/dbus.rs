use std::{collections::HashMap, str::FromStr};

use bluer::Address;
use log::info;
use serde::Serialize;
use zbus::{fdo, interface, object_server::SignalEmitter, zvariant};

use crate::{
   bluetooth::manager::{AutoConnect, EarManager},
   error::EarError,
   nothing::{
      command::{Category, Command},
      models::{ModelBase, ModelSelector},
      protocol::{Bud, Ring},
      session::CachePolicy,
   },
};

type Params<'a> = HashMap<String, zvariant::Value<'a>>;

fn failed(e: impl Into<EarError>) -> fdo::Error {
   let e = e.into();
   fdo::Error::Failed(format!("{}: {e}", e.kind()))
}

fn invalid(msg: impl std::fmt::Display) -> fdo::Error {
   fdo::Error::InvalidArgs(format!("invalid_argument: {msg}"))
}

fn to_json(value: &impl Serialize) -> fdo::Result<String> {
   serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn parse_address(address: &str) -> fdo::Result<Address> {
   Address::from_str(address).map_err(|e| invalid(format!("address {address}: {e}")))
}

fn param_str(params: &Params<'_>, key: &str) -> fdo::Result<Option<String>> {
   let Some(value) = params.get(key) else {
      return Ok(None);
   };
   let s = value
      .downcast_ref::<String>()
      .map_err(|e| invalid(format!("'{key}' parameter: {e}")))?;
   Ok(Some(s).filter(|s| !s.is_empty()))
}

/// Channels arrive as `y` from most clients, `u` or `i` from scripting ones.
fn param_channel(params: &Params<'_>) -> fdo::Result<Option<u8>> {
   let Some(value) = params.get("channel") else {
      return Ok(None);
   };
   let channel = value
      .downcast_ref::<u8>()
      .ok()
      .or_else(|| value.downcast_ref::<u32>().ok().and_then(|c| u8::try_from(c).ok()))
      .or_else(|| value.downcast_ref::<i32>().ok().and_then(|c| u8::try_from(c).ok()))
      .ok_or_else(|| invalid("'channel' must be 1..=30"))?;
   match channel {
      0 => Ok(None),
      1..=30 => Ok(Some(channel)),
      _ => Err(invalid("'channel' must be 1..=30")),
   }
}

fn param_model(params: &Params<'_>) -> fdo::Result<ModelSelector> {
   let base = param_str(params, "base")?
      .map(|b| ModelBase::from_str(&b).map_err(|_| invalid(format!("unknown base {b}"))))
      .transpose()?;
   Ok(ModelSelector {
      model_id: param_str(params, "model_id")?,
      sku: param_str(params, "sku")?,
      base,
   })
}

fn parse_category(category: &str) -> fdo::Result<Category> {
   Category::from_str(category).map_err(|_| invalid(format!("unknown category {category}")))
}

pub struct EarService {
   manager: EarManager,
}

impl EarService {
   pub const fn new(manager: EarManager) -> Self {
      Self { manager }
   }
}

#[interface(name = "org.nothingd.Manager")]
impl EarService {
   async fn connect(&self, address: String, channel: u8) -> fdo::Result<String> {
      let address = parse_address(&address)?;
      let info = self
         .manager
         .connect(address, channel, None)
         .await
         .map_err(failed)?;
      to_json(&info)
   }

   /// Keys: `address`, `name`, `channel`, `model_id`, `sku`, `base`.
   async fn auto_connect(&self, params: Params<'_>) -> fdo::Result<String> {
      let address = param_str(&params, "address")?
         .map(|a| parse_address(&a))
         .transpose()?;
      let model = param_model(&params)?;
      let info = self
         .manager
         .auto_connect(AutoConnect {
            address,
            name_filter: param_str(&params, "name")?,
            channel: param_channel(&params)?,
            model: Some(model).filter(|m| !m.is_empty()),
         })
         .await
         .map_err(failed)?;
      to_json(&info)
   }

   async fn disconnect(&self) -> fdo::Result<bool> {
      self.manager.disconnect().await.map_err(failed)?;
      Ok(true)
   }

   async fn get_session(&self) -> fdo::Result<String> {
      let session = self.manager.session().map_err(failed)?;
      to_json(&session.info())
   }

   async fn detect(&self) -> fdo::Result<String> {
      let model = self.manager.detect().await.map_err(failed)?;
      to_json(&*model)
   }

   async fn set_model(&self, params: Params<'_>) -> fdo::Result<String> {
      let selector = param_model(&params)?;
      let info = self.manager.set_model(selector).await.map_err(failed)?;
      info!("Model set to {} over D-Bus", info.model);
      to_json(&info)
   }

   async fn get(&self, category: String, cached: bool) -> fdo::Result<String> {
      let category = parse_category(&category)?;
      let policy = if cached {
         CachePolicy::PreferCached
      } else {
         CachePolicy::Device
      };
      let session = self.manager.session().map_err(failed)?;
      let value = session.read(category, policy).await.map_err(failed)?;
      Ok(value.to_json().to_string())
   }

   async fn set(&self, category: String, value: String) -> fdo::Result<String> {
      let category = parse_category(&category)?;
      let value = serde_json::from_str(&value).map_err(invalid)?;
      let command = category.write_from_json(value).map_err(invalid)?;
      let session = self.manager.session().map_err(failed)?;
      let response = session.execute(command).await.map_err(failed)?;
      info!("Set {category} on {}", session.address());
      Ok(response.to_json().to_string())
   }

   /// `side` is `left`, `right`, or empty for the model default.
   async fn ring(&self, enable: bool, side: String) -> fdo::Result<bool> {
      let bud = match side.as_str() {
         "" => None,
         s => Some(Bud::from_str(s).map_err(|_| invalid(format!("unknown side {s}")))?),
      };
      let session = self.manager.session().map_err(failed)?;
      session
         .execute(Command::Ring(Ring {
            enabled: enable,
            bud,
         }))
         .await
         .map_err(failed)?;
      Ok(true)
   }

   async fn start_ear_fit(&self) -> fdo::Result<bool> {
      let session = self.manager.session().map_err(failed)?;
      session
         .execute(Command::StartEarFit)
         .await
         .map_err(failed)?;
      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn session_connected(emitter: &SignalEmitter<'_>, session: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn session_closed(emitter: &SignalEmitter<'_>, id: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn setting_changed(
      emitter: &SignalEmitter<'_>,
      category: &str,
      value: &str,
   ) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn session(&self) -> String {
      self
         .manager
         .session()
         .ok()
         .and_then(|s| serde_json::to_string(&s.info()).ok())
         .unwrap_or_default()
   }
}
