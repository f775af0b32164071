//! Model catalog: SKU lookup, serial number decoding and per-model capabilities.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use smol_str::SmolStr;

use crate::error::{EarError, Result};

/// Optional features gated per model.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
   Anc,
   CustomEq,
   EnhancedBass,
   PersonalizedAnc,
   InEarDetection,
   LedCase,
   ListeningModes,
}

/// Compact set of [`Capability`] flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
   pub const fn empty() -> Self {
      Self(0)
   }

   pub const fn contains(self, cap: Capability) -> bool {
      self.0 & (1 << cap as u8) != 0
   }

   pub const fn with(self, cap: Capability) -> Self {
      Self(self.0 | (1 << cap as u8))
   }

   pub fn iter(self) -> impl Iterator<Item = Capability> {
      <Capability as strum::IntoEnumIterator>::iter().filter(move |&c| self.contains(c))
   }
}

impl FromIterator<Capability> for CapabilitySet {
   fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
      iter.into_iter().fold(Self::empty(), Self::with)
   }
}

impl fmt::Debug for CapabilitySet {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_set().entries(self.iter()).finish()
   }
}

impl Serialize for CapabilitySet {
   fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
      serializer.collect_seq(self.iter())
   }
}

/// Hardware platform. Every catalog entry maps onto one base.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ModelBase {
   B155,
   B157,
   B162,
   B163,
   B164,
   B168,
   B171,
   B172,
   B174,
   B181,
   Unknown,
}

impl ModelBase {
   pub const fn capabilities(self) -> CapabilitySet {
      use Capability::*;
      use ModelBase::*;

      // Until identified, nothing optional is assumed
      if matches!(self, Unknown) {
         return CapabilitySet::empty();
      }
      let mut caps = CapabilitySet::empty();
      if !matches!(self, B157 | B174) {
         caps = caps.with(Anc);
      }
      if !matches!(self, B181) {
         caps = caps.with(CustomEq);
      }
      if matches!(self, B162 | B168 | B171 | B172) {
         caps = caps.with(EnhancedBass);
      }
      if matches!(self, B155) {
         caps = caps.with(PersonalizedAnc);
      }
      if !matches!(self, B174) {
         caps = caps.with(InEarDetection);
      }
      if matches!(self, B181) {
         caps = caps.with(LedCase);
      }
      if matches!(self, B168 | B172) {
         caps = caps.with(ListeningModes);
      }
      caps
   }

   /// Ear (1) rings both buds at once; later models ring one side.
   pub const fn rings_per_bud(self) -> bool {
      !matches!(self, Self::B181)
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
   pub id: &'static str,
   pub base: ModelBase,
   pub name: &'static str,
}

const fn model(id: &'static str, base: ModelBase, name: &'static str) -> ModelInfo {
   ModelInfo { id, base, name }
}

pub static MODELS: &[ModelInfo] = &[
   model("ear_1_white", ModelBase::B181, "Nothing Ear (1)"),
   model("ear_1_black", ModelBase::B181, "Nothing Ear (1)"),
   model("ear_stick", ModelBase::B157, "Nothing Ear (stick)"),
   model("ear_2_white", ModelBase::B155, "Nothing Ear (2)"),
   model("ear_2_black", ModelBase::B155, "Nothing Ear (2)"),
   model("corsola_orange", ModelBase::B163, "CMF Buds Pro"),
   model("corsola_black", ModelBase::B163, "CMF Buds Pro"),
   model("corsola_white", ModelBase::B163, "CMF Buds Pro"),
   model("entei_black", ModelBase::B171, "Nothing Ear"),
   model("entei_white", ModelBase::B171, "Nothing Ear"),
   model("cleffa_black", ModelBase::B162, "Nothing Ear (a)"),
   model("cleffa_white", ModelBase::B162, "Nothing Ear (a)"),
   model("cleffa_yellow", ModelBase::B162, "Nothing Ear (a)"),
   model("crobat_orange", ModelBase::B164, "CMF Neckband Pro"),
   model("crobat_white", ModelBase::B164, "CMF Neckband Pro"),
   model("crobat_black", ModelBase::B164, "CMF Neckband Pro"),
   model("donphan_black", ModelBase::B168, "CMF Buds"),
   model("donphan_white", ModelBase::B168, "CMF Buds"),
   model("donphan_orange", ModelBase::B168, "CMF Buds"),
   model("espeon_black", ModelBase::B172, "CMF Buds Pro 2"),
   model("espeon_white", ModelBase::B172, "CMF Buds Pro 2"),
   model("espeon_orange", ModelBase::B172, "CMF Buds Pro 2"),
   model("espeon_blue", ModelBase::B172, "CMF Buds Pro 2"),
   model("flaaffy_white", ModelBase::B174, "Nothing Ear (open)"),
];

static SKUS: &[(&str, &str)] = &[
   ("01", "ear_1_white"),
   ("03", "ear_1_white"),
   ("07", "ear_1_white"),
   ("02", "ear_1_black"),
   ("04", "ear_1_black"),
   ("06", "ear_1_black"),
   ("08", "ear_1_black"),
   ("10", "ear_1_black"),
   ("14", "ear_stick"),
   ("15", "ear_stick"),
   ("16", "ear_stick"),
   ("17", "ear_2_white"),
   ("18", "ear_2_white"),
   ("19", "ear_2_white"),
   ("27", "ear_2_black"),
   ("28", "ear_2_black"),
   ("29", "ear_2_black"),
   ("30", "corsola_black"),
   ("31", "corsola_black"),
   ("32", "corsola_white"),
   ("33", "corsola_white"),
   ("34", "corsola_orange"),
   ("35", "corsola_orange"),
   ("48", "crobat_orange"),
   ("53", "crobat_orange"),
   ("49", "crobat_white"),
   ("52", "crobat_white"),
   ("50", "crobat_black"),
   ("51", "crobat_black"),
   ("54", "donphan_black"),
   ("55", "donphan_black"),
   ("56", "donphan_white"),
   ("57", "donphan_white"),
   ("58", "donphan_orange"),
   ("59", "donphan_orange"),
   ("61", "entei_black"),
   ("69", "entei_black"),
   ("74", "entei_black"),
   ("62", "entei_white"),
   ("70", "entei_white"),
   ("75", "entei_white"),
   ("63", "cleffa_black"),
   ("66", "cleffa_black"),
   ("71", "cleffa_black"),
   ("64", "cleffa_white"),
   ("67", "cleffa_white"),
   ("72", "cleffa_white"),
   ("65", "cleffa_yellow"),
   ("68", "cleffa_yellow"),
   ("73", "cleffa_yellow"),
   ("76", "espeon_black"),
   ("83", "espeon_black"),
   ("77", "espeon_white"),
   ("82", "espeon_white"),
   ("78", "espeon_orange"),
   ("81", "espeon_orange"),
   ("79", "espeon_blue"),
   ("80", "espeon_blue"),
   ("11200005", "flaaffy_white"),
];

pub fn model_by_id(id: &str) -> Option<&'static ModelInfo> {
   MODELS.iter().find(|m| m.id.eq_ignore_ascii_case(id))
}

pub fn model_by_sku(sku: &str) -> Option<&'static ModelInfo> {
   SKUS.iter()
      .find(|(s, _)| *s == sku)
      .and_then(|(_, id)| model_by_id(id))
}

/// Derives the SKU code embedded in a serial number.
pub fn sku_from_serial(serial: &str) -> Option<SmolStr> {
   // Early Ear (1) units all report this placeholder
   if serial == "12345678901234567" {
      return Some(SmolStr::new_static("01"));
   }
   if serial.starts_with("MA") {
      return match serial.get(6..8)? {
         "22" | "23" => Some(SmolStr::new_static("14")),
         "24" => Some(SmolStr::new_static("11200005")),
         _ => None,
      };
   }
   if serial.starts_with("SH") || serial.starts_with("13") {
      return serial.get(4..6).map(SmolStr::new);
   }
   None
}

/// What the handshake learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
   pub serial: Option<SmolStr>,
   pub sku: Option<SmolStr>,
}

impl Identity {
   pub fn from_serial(serial: Option<SmolStr>) -> Self {
      let sku = serial.as_deref().and_then(sku_from_serial);
      Self { serial, sku }
   }
}

/// Resolved model of the connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceModel {
   pub base: ModelBase,
   pub model_id: Option<SmolStr>,
   pub name: SmolStr,
   pub sku: Option<SmolStr>,
   pub serial: Option<SmolStr>,
   pub capabilities: CapabilitySet,
}

impl DeviceModel {
   pub fn unknown() -> Self {
      Self {
         base: ModelBase::Unknown,
         model_id: None,
         name: SmolStr::new_static("Unknown"),
         sku: None,
         serial: None,
         capabilities: ModelBase::Unknown.capabilities(),
      }
   }

   pub fn from_info(info: &ModelInfo) -> Self {
      Self {
         base: info.base,
         model_id: Some(SmolStr::new_static(info.id)),
         name: SmolStr::new_static(info.name),
         sku: None,
         serial: None,
         capabilities: info.base.capabilities(),
      }
   }

   /// Bare base override with no catalog entry.
   pub fn from_base(base: ModelBase) -> Self {
      Self {
         base,
         name: SmolStr::new(base.to_string()),
         capabilities: base.capabilities(),
         ..Self::unknown()
      }
   }

   /// Maps a handshake identity onto the catalog. Unknown SKUs keep the
   /// identity but resolve to [`ModelBase::Unknown`].
   pub fn from_identity(identity: &Identity) -> Self {
      let model = identity
         .sku
         .as_deref()
         .and_then(model_by_sku)
         .map_or_else(Self::unknown, Self::from_info);
      model.with_identity(identity)
   }

   pub fn with_identity(mut self, identity: &Identity) -> Self {
      self.serial.clone_from(&identity.serial);
      self.sku.clone_from(&identity.sku);
      self
   }

   pub fn is_known(&self) -> bool {
      self.base != ModelBase::Unknown
   }

   pub fn supports(&self, cap: Capability) -> bool {
      self.capabilities.contains(cap)
   }
}

impl fmt::Display for DeviceModel {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match &self.model_id {
         Some(id) => write!(f, "{} ({id}, {})", self.name, self.base),
         None => write!(f, "{} ({})", self.name, self.base),
      }
   }
}

/// Operator-supplied model override. The first populated field wins in
/// the order model id, SKU, base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelector {
   #[serde(default)]
   pub model_id: Option<String>,
   #[serde(default)]
   pub sku: Option<String>,
   #[serde(default)]
   pub base: Option<ModelBase>,
}

impl ModelSelector {
   pub fn is_empty(&self) -> bool {
      self.model_id.is_none() && self.sku.is_none() && self.base.is_none()
   }

   pub fn resolve(&self) -> Result<DeviceModel> {
      if let Some(id) = &self.model_id {
         return model_by_id(id)
            .map(DeviceModel::from_info)
            .ok_or_else(|| EarError::UnknownModel(format!("model id {id}")));
      }
      if let Some(sku) = &self.sku {
         return model_by_sku(sku)
            .map(|info| DeviceModel {
               sku: Some(SmolStr::new(sku)),
               ..DeviceModel::from_info(info)
            })
            .ok_or_else(|| EarError::UnknownModel(format!("sku {sku}")));
      }
      match self.base {
         Some(ModelBase::Unknown) | None => {
            Err(EarError::InvalidArgument("empty model selector".to_string()))
         },
         Some(base) => Ok(DeviceModel::from_base(base)),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_sku_from_serial() {
      assert_eq!(sku_from_serial("12345678901234567").as_deref(), Some("01"));
      assert_eq!(sku_from_serial("SH10171234567890").as_deref(), Some("17"));
      assert_eq!(sku_from_serial("1300621234").as_deref(), Some("62"));
      assert_eq!(sku_from_serial("MA0000231234").as_deref(), Some("14"));
      assert_eq!(sku_from_serial("MA0000241234").as_deref(), Some("11200005"));
      assert_eq!(sku_from_serial("MA000099"), None);
      assert_eq!(sku_from_serial("SH1"), None);
      assert_eq!(sku_from_serial("XX12345678"), None);
   }

   #[test]
   fn test_catalog_entries_resolve() {
      for (sku, id) in SKUS {
         let info = model_by_sku(sku).unwrap();
         assert_eq!(info.id, *id);
      }
      assert_eq!(model_by_sku("99"), None);
      assert_eq!(model_by_id("ESPEON_BLUE").map(|m| m.base), Some(ModelBase::B172));
   }

   #[test]
   fn test_capabilities_by_base() {
      let ear1 = ModelBase::B181.capabilities();
      assert!(ear1.contains(Capability::LedCase));
      assert!(!ear1.contains(Capability::CustomEq));
      assert!(ear1.contains(Capability::Anc));

      let ear2 = ModelBase::B155.capabilities();
      assert!(ear2.contains(Capability::PersonalizedAnc));
      assert!(!ear2.contains(Capability::LedCase));
      assert!(!ear2.contains(Capability::EnhancedBass));

      let open = ModelBase::B174.capabilities();
      assert!(!open.contains(Capability::Anc));
      assert!(!open.contains(Capability::InEarDetection));

      assert!(ModelBase::B168.capabilities().contains(Capability::EnhancedBass));
      assert!(ModelBase::B168.capabilities().contains(Capability::ListeningModes));
      assert_eq!(
         ModelBase::B172.capabilities().iter().collect::<Vec<_>>(),
         [
            Capability::Anc,
            Capability::CustomEq,
            Capability::EnhancedBass,
            Capability::InEarDetection,
            Capability::ListeningModes,
         ]
      );
      assert!(!ear2.contains(Capability::ListeningModes));
      assert!(!ear1.contains(Capability::ListeningModes));
      assert!(!ModelBase::B157.capabilities().contains(Capability::Anc));
      assert_eq!(ModelBase::Unknown.capabilities(), CapabilitySet::empty());
   }

   #[test]
   fn test_capability_set_serializes_in_order() {
      let caps: CapabilitySet = [Capability::LedCase, Capability::Anc].into_iter().collect();
      assert_eq!(
         serde_json::to_value(caps).unwrap(),
         serde_json::json!(["anc", "led_case"])
      );
   }

   #[test]
   fn test_model_from_identity() {
      let identity = Identity::from_serial(Some(SmolStr::new("SH10171234567890")));
      let model = DeviceModel::from_identity(&identity);
      assert_eq!(model.base, ModelBase::B155);
      assert_eq!(model.model_id.as_deref(), Some("ear_2_white"));
      assert_eq!(model.sku.as_deref(), Some("17"));

      let stranger = DeviceModel::from_identity(&Identity::from_serial(Some(SmolStr::new("SH1099"))));
      assert!(!stranger.is_known());
      assert_eq!(stranger.serial.as_deref(), Some("SH1099"));
      assert_eq!(stranger.sku.as_deref(), Some("99"));
   }

   #[test]
   fn test_selector_precedence() {
      let sel = ModelSelector {
         model_id: Some("ear_1_black".into()),
         sku: Some("17".into()),
         base: Some(ModelBase::B172),
      };
      assert_eq!(sel.resolve().unwrap().base, ModelBase::B181);

      let sel = ModelSelector {
         sku: Some("80".into()),
         ..Default::default()
      };
      assert_eq!(sel.resolve().unwrap().model_id.as_deref(), Some("espeon_blue"));

      let sel = ModelSelector {
         base: Some(ModelBase::B168),
         ..Default::default()
      };
      let model = sel.resolve().unwrap();
      assert!(model.supports(Capability::EnhancedBass));
      assert_eq!(model.model_id, None);

      assert!(ModelSelector::default().resolve().is_err());
      assert!(matches!(
         ModelSelector {
            model_id: Some("ear_9".into()),
            ..Default::default()
         }
         .resolve(),
         Err(EarError::UnknownModel(_))
      ));
   }
}
