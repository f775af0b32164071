//! Opcodes and typed payloads of the Nothing earbud protocol.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::nothing::codec::{ProtocolError, check_range};

// Read requests
pub const REQ_SERIAL: u16 = 0xC006;
pub const REQ_BATTERY: u16 = 0xC007;
pub const REQ_IN_EAR: u16 = 0xC00E;
pub const REQ_LED: u16 = 0xC017;
pub const REQ_GESTURES: u16 = 0xC018;
pub const REQ_ANC: u16 = 0xC01E;
pub const REQ_EQ: u16 = 0xC01F;
pub const REQ_PERSONALIZED_ANC: u16 = 0xC020;
pub const REQ_LATENCY: u16 = 0xC041;
pub const REQ_FIRMWARE: u16 = 0xC042;
pub const REQ_CUSTOM_EQ: u16 = 0xC044;
pub const REQ_ENHANCED_BASS: u16 = 0xC04E;

// Writes
pub const CMD_RING: u16 = 0xF002;
pub const CMD_SET_GESTURE: u16 = 0xF003;
pub const CMD_SET_IN_EAR: u16 = 0xF004;
pub const CMD_SET_LED: u16 = 0xF00D;
pub const CMD_SET_ANC: u16 = 0xF00F;
pub const CMD_SET_EQ: u16 = 0xF010;
pub const CMD_SET_PERSONALIZED_ANC: u16 = 0xF011;
pub const CMD_EAR_FIT: u16 = 0xF014;
pub const CMD_SET_LATENCY: u16 = 0xF040;
pub const CMD_SET_CUSTOM_EQ: u16 = 0xF041;
pub const CMD_SET_ENHANCED_BASS: u16 = 0xF051;

// Responses and notifications
pub const RSP_SERIAL: u16 = 0x4006;
pub const RSP_BATTERY: u16 = 0x4007;
pub const RSP_BATTERY_NOTIFY: u16 = 0xE001;
pub const RSP_ANC: u16 = 0x401E;
pub const RSP_ANC_NOTIFY: u16 = 0xE003;
pub const RSP_EAR_FIT: u16 = 0xE00D;
pub const RSP_IN_EAR: u16 = 0x400E;
pub const RSP_LED: u16 = 0x4017;
pub const RSP_GESTURES: u16 = 0x4018;
pub const RSP_EQ: u16 = 0x401F;
pub const RSP_PERSONALIZED_ANC: u16 = 0x4020;
pub const RSP_LATENCY: u16 = 0x4041;
pub const RSP_FIRMWARE: u16 = 0x4042;
pub const RSP_CUSTOM_EQ: u16 = 0x4044;
pub const RSP_ENHANCED_BASS: u16 = 0x404E;
pub const RSP_LISTENING_MODE: u16 = 0x4050;

fn need(payload: &[u8], len: usize, what: &str) -> Result<(), ProtocolError> {
   if payload.len() < len {
      return Err(ProtocolError::malformed(format!(
         "{what} payload needs {len} bytes, got {}",
         payload.len()
      )));
   }
   Ok(())
}

// ---------------------------------------------------------------------------
// Battery
// ---------------------------------------------------------------------------

/// Battery-bearing components, tagged by their wire id.
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
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Component {
   Left = 0x02,
   Right = 0x03,
   Case = 0x04,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryState {
   pub level: u8,
   pub charging: bool,
}

impl BatteryState {
   const CHARGING_BIT: u8 = 0x80;

   fn from_byte(byte: u8) -> Self {
      Self {
         level: byte & !Self::CHARGING_BIT,
         charging: byte & Self::CHARGING_BIT != 0,
      }
   }

   fn to_byte(self) -> u8 {
      let level = self.level.min(100);
      if self.charging { level | Self::CHARGING_BIT } else { level }
   }
}

/// Per-component battery levels. Absent components are out of range or docked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryInfo {
   pub left: Option<BatteryState>,
   pub right: Option<BatteryState>,
   pub case: Option<BatteryState>,
}

impl BatteryInfo {
   pub fn get(&self, component: Component) -> Option<BatteryState> {
      match component {
         Component::Left => self.left,
         Component::Right => self.right,
         Component::Case => self.case,
      }
   }

   pub fn set(&mut self, component: Component, state: Option<BatteryState>) {
      match component {
         Component::Left => self.left = state,
         Component::Right => self.right = state,
         Component::Case => self.case = state,
      }
   }

   /// `count, (component, level)*`; unknown component ids are skipped.
   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, 1, "battery")?;
      let count = payload[0] as usize;
      need(payload, 1 + count * 2, "battery")?;

      let mut info = Self::default();
      for pair in payload[1..1 + count * 2].chunks_exact(2) {
         if let Some(component) = Component::from_repr(pair[0]) {
            info.set(component, Some(BatteryState::from_byte(pair[1])));
         }
      }
      Ok(info)
   }

   pub fn encode(&self) -> Vec<u8> {
      let mut out = vec![0];
      for component in [Component::Left, Component::Right, Component::Case] {
         if let Some(state) = self.get(component) {
            out.push(component as u8);
            out.push(state.to_byte());
            out[0] += 1;
         }
      }
      out
   }
}

// ---------------------------------------------------------------------------
// Noise control
// ---------------------------------------------------------------------------

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
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum AncLevel {
   #[strum(to_string = "nc-high", serialize = "high")]
   High = 0x01,
   #[strum(to_string = "nc-mid", serialize = "mid")]
   Mid = 0x02,
   #[strum(to_string = "nc-low", serialize = "low")]
   Low = 0x03,
   #[strum(to_string = "adaptive")]
   Adaptive = 0x04,
   #[strum(to_string = "off")]
   Off = 0x05,
   #[strum(to_string = "transparency", serialize = "transparent")]
   Transparency = 0x07,
}

impl AncLevel {
   pub fn encode(self) -> [u8; 3] {
      [0x01, self as u8, 0x00]
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, 2, "anc")?;
      Self::from_repr(payload[1])
         .ok_or_else(|| ProtocolError::malformed(format!("unknown anc level 0x{:02x}", payload[1])))
   }
}

// ---------------------------------------------------------------------------
// Equalizer
// ---------------------------------------------------------------------------

/// Device preset index. Meaning of each index varies between models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EqPreset(pub u8);

impl EqPreset {
   pub fn encode(self) -> [u8; 2] {
      [self.0, 0x00]
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, 1, "eq")?;
      Ok(Self(payload[0]))
   }
}

/// A band gain in tenths of a decibel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct EqGain(i16);

impl EqGain {
   pub const MIN: Self = Self(-60);
   pub const MAX: Self = Self(60);

   pub fn from_db(db: f32) -> Self {
      // NaN would cast to 0; infinities saturate out of range on their own
      if db.is_nan() {
         return Self(i16::MIN);
      }
      Self((db * 10.0).round() as i16)
   }

   pub const fn tenths(self) -> i16 {
      self.0
   }

   pub fn db(self) -> f32 {
      f32::from(self.0) / 10.0
   }

   fn check(self, field: &'static str) -> Result<(), ProtocolError> {
      check_range(
         field,
         i64::from(self.0),
         i64::from(Self::MIN.0),
         i64::from(Self::MAX.0),
      )
   }
}

impl From<f32> for EqGain {
   fn from(db: f32) -> Self {
      Self::from_db(db)
   }
}

impl From<EqGain> for f32 {
   fn from(gain: EqGain) -> Self {
      gain.db()
   }
}

/// Three-band custom equalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomEq {
   pub bass: EqGain,
   pub mid: EqGain,
   pub treble: EqGain,
}

const CUSTOM_EQ_TEMPLATE: [u8; 53] = [
   0x03, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x75, 0x44, 0xc3, 0xf5,
   0x28, 0x3f, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x5a, 0x45, 0x00, 0x00, 0x80, 0x3f, 0x00,
   0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x43, 0xcd, 0xcc, 0x4c, 0x3f, 0x00, 0x00, 0x00, 0x00,
   0x00, 0x00, 0x00, 0x00, 0x00,
];
const CUSTOM_EQ_MIN_LEN: usize = 45;
// Band order on the wire is mid, treble, bass
const CUSTOM_EQ_BANDS: [usize; 3] = [6, 19, 32];

impl CustomEq {
   pub fn new(bass: f32, mid: f32, treble: f32) -> Self {
      Self {
         bass: EqGain::from_db(bass),
         mid: EqGain::from_db(mid),
         treble: EqGain::from_db(treble),
      }
   }

   pub fn validate(&self) -> Result<(), ProtocolError> {
      self.bass.check("bass gain (0.1 dB)")?;
      self.mid.check("mid gain (0.1 dB)")?;
      self.treble.check("treble gain (0.1 dB)")
   }

   pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
      self.validate()?;
      let bands = [self.mid.db(), self.treble.db(), self.bass.db()];
      // Header gain is the negated loudest boost, so positive bands never clip
      let headroom = -bands.iter().fold(0.0f32, |acc, &v| acc.max(v));

      let mut out = CUSTOM_EQ_TEMPLATE.to_vec();
      out[1..5].copy_from_slice(&headroom.to_le_bytes());
      for (offset, value) in CUSTOM_EQ_BANDS.into_iter().zip(bands) {
         out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
      }
      Ok(out)
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, CUSTOM_EQ_MIN_LEN, "custom eq")?;
      let band = |idx: usize| {
         let offset = CUSTOM_EQ_BANDS[idx];
         let mut raw = [0u8; 4];
         raw.copy_from_slice(&payload[offset..offset + 4]);
         let db = f32::from_le_bytes(raw);
         if !db.is_finite() {
            return Err(ProtocolError::malformed(format!(
               "custom eq band at offset {offset} is {db}"
            )));
         }
         Ok(EqGain::from_db(db))
      };
      Ok(Self {
         mid: band(0)?,
         treble: band(1)?,
         bass: band(2)?,
      })
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnhancedBass {
   pub enabled: bool,
   pub level: u8,
}

impl EnhancedBass {
   /// Level is doubled on the wire.
   pub const MAX_LEVEL: u8 = u8::MAX / 2;

   pub fn encode(&self) -> Result<[u8; 2], ProtocolError> {
      check_range(
         "enhanced bass level",
         i64::from(self.level),
         0,
         i64::from(Self::MAX_LEVEL),
      )?;
      Ok([u8::from(self.enabled), self.level * 2])
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, 2, "enhanced bass")?;
      Ok(Self {
         enabled: payload[0] == 0x01,
         level: payload[1] / 2,
      })
   }
}

// ---------------------------------------------------------------------------
// Toggles
// ---------------------------------------------------------------------------

pub fn encode_personalized_anc(enabled: bool) -> [u8; 1] {
   [u8::from(enabled)]
}

pub fn decode_personalized_anc(payload: &[u8]) -> Result<bool, ProtocolError> {
   need(payload, 1, "personalized anc")?;
   Ok(payload[0] == 0x01)
}

pub fn encode_in_ear(enabled: bool) -> [u8; 3] {
   [0x01, 0x01, u8::from(enabled)]
}

pub fn decode_in_ear(payload: &[u8]) -> Result<bool, ProtocolError> {
   need(payload, 3, "in-ear")?;
   Ok(payload[2] != 0x00)
}

pub fn encode_latency(low_latency: bool) -> [u8; 2] {
   [if low_latency { 0x01 } else { 0x02 }, 0x00]
}

pub fn decode_latency(payload: &[u8]) -> Result<bool, ProtocolError> {
   need(payload, 1, "latency")?;
   Ok(payload[0] == 0x01)
}

pub fn decode_firmware(payload: &[u8]) -> SmolStr {
   SmolStr::new(String::from_utf8_lossy(payload).trim_matches(|c: char| c.is_whitespace() || c == '\0'))
}

// ---------------------------------------------------------------------------
// Gestures
// ---------------------------------------------------------------------------

/// One gesture binding, kept as raw wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GestureSlot {
   pub device: u8,
   pub common: u8,
   pub gesture_type: u8,
   pub action: u8,
}

impl GestureSlot {
   pub fn encode(&self) -> [u8; 5] {
      [0x01, self.device, self.common, self.gesture_type, self.action]
   }

   pub fn same_slot(&self, other: &Self) -> bool {
      self.device == other.device && self.common == other.common && self.gesture_type == other.gesture_type
   }

   pub fn decode_list(payload: &[u8]) -> Result<Vec<Self>, ProtocolError> {
      need(payload, 1, "gestures")?;
      let count = payload[0] as usize;
      need(payload, 1 + count * 4, "gestures")?;
      Ok(payload[1..1 + count * 4]
         .chunks_exact(4)
         .map(|c| Self {
            device: c[0],
            common: c[1],
            gesture_type: c[2],
            action: c[3],
         })
         .collect())
   }

   pub fn encode_list(slots: &[Self]) -> Result<Vec<u8>, ProtocolError> {
      check_range("gesture count", slots.len() as i64, 0, i64::from(u8::MAX))?;
      let mut out = Vec::with_capacity(1 + slots.len() * 4);
      out.push(slots.len() as u8);
      for slot in slots {
         out.extend_from_slice(&[slot.device, slot.common, slot.gesture_type, slot.action]);
      }
      Ok(out)
   }
}

// ---------------------------------------------------------------------------
// Case LEDs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LedColor {
   pub r: u8,
   pub g: u8,
   pub b: u8,
}

/// Case LED pixels; `count, (index + 1, r, g, b)*`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedColors(pub Vec<LedColor>);

impl LedColors {
   pub const MAX_PIXELS: usize = 63;

   pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
      check_range("led pixel count", self.0.len() as i64, 0, Self::MAX_PIXELS as i64)?;
      let mut out = Vec::with_capacity(1 + self.0.len() * 4);
      out.push(self.0.len() as u8);
      for (idx, color) in self.0.iter().enumerate() {
         out.extend_from_slice(&[idx as u8 + 1, color.r, color.g, color.b]);
      }
      Ok(out)
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, 1, "led")?;
      let count = payload[0] as usize;
      need(payload, 1 + count * 4, "led")?;
      Ok(Self(
         payload[1..1 + count * 4]
            .chunks_exact(4)
            .map(|c| LedColor {
               r: c[1],
               g: c[2],
               b: c[3],
            })
            .collect(),
      ))
   }
}

// ---------------------------------------------------------------------------
// Ring / ear fit / identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Bud {
   Left,
   Right,
}

impl Bud {
   fn wire(self) -> u8 {
      match self {
         Self::Left => Component::Left as u8,
         Self::Right => Component::Right as u8,
      }
   }

   fn from_wire(byte: u8) -> Self {
      if byte == Component::Left as u8 { Self::Left } else { Self::Right }
   }
}

/// Ring request. `bud` is `None` on models that ring both buds together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
   pub enabled: bool,
   #[serde(default)]
   pub bud: Option<Bud>,
}

impl Ring {
   pub fn encode(&self) -> Vec<u8> {
      match self.bud {
         Some(bud) => vec![bud.wire(), u8::from(self.enabled)],
         None => vec![u8::from(self.enabled)],
      }
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      match *payload {
         [enabled] => Ok(Self {
            enabled: enabled != 0,
            bud: None,
         }),
         [side, enabled] => Ok(Self {
            enabled: enabled != 0,
            bud: Some(Bud::from_wire(side)),
         }),
         _ => Err(ProtocolError::malformed(format!(
            "ring payload of {} bytes",
            payload.len()
         ))),
      }
   }
}

/// Seal quality reported for each bud after an ear-fit test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarFitResult {
   pub left: u8,
   pub right: u8,
}

impl EarFitResult {
   pub fn encode(&self) -> [u8; 2] {
      [self.left, self.right]
   }

   pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
      need(payload, 2, "ear fit")?;
      Ok(Self {
         left: payload[0],
         right: payload[1],
      })
   }
}

/// Serial reply: a 7-byte preamble followed by `group,field,value` lines.
/// Field `4` carries the serial number.
const SERIAL_PREAMBLE_LEN: usize = 7;
const SERIAL_FIELD: &str = "4";

pub fn decode_serial(payload: &[u8]) -> Result<Option<SmolStr>, ProtocolError> {
   need(payload, SERIAL_PREAMBLE_LEN, "serial")?;
   let text = String::from_utf8_lossy(&payload[SERIAL_PREAMBLE_LEN..]);
   Ok(text.lines().find_map(|line| {
      let mut parts = line.split(',');
      match (parts.next(), parts.next(), parts.next(), parts.next()) {
         (Some(_), Some(field), Some(value), None) if field.trim() == SERIAL_FIELD => {
            let value = value.trim().trim_end_matches('\0');
            (!value.is_empty()).then(|| SmolStr::new(value))
         },
         _ => None,
      }
   }))
}

pub fn encode_serial(serial: &str) -> Vec<u8> {
   let mut out = vec![0u8; SERIAL_PREAMBLE_LEN];
   out.extend_from_slice(format!("1,{SERIAL_FIELD},{serial}\n").as_bytes());
   out
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_battery_decode() {
      let info = BatteryInfo::decode(&[0x03, 0x02, 0x55, 0x03, 0xE4, 0x04, 0x30]).unwrap();
      assert_eq!(
         info.left,
         Some(BatteryState {
            level: 0x55,
            charging: false
         })
      );
      assert_eq!(
         info.right,
         Some(BatteryState {
            level: 100,
            charging: true
         })
      );
      assert_eq!(info.case.map(|c| c.level), Some(48));
   }

   #[test]
   fn test_battery_skips_unknown_and_missing() {
      let info = BatteryInfo::decode(&[0x02, 0x09, 0x10, 0x03, 0x20]).unwrap();
      assert_eq!(info.left, None);
      assert_eq!(info.right.map(|r| r.level), Some(0x20));
      assert!(BatteryInfo::decode(&[0x02, 0x02, 0x10]).is_err());
   }

   #[test]
   fn test_anc_names() {
      assert_eq!("transparency".parse::<AncLevel>().unwrap(), AncLevel::Transparency);
      assert_eq!("Transparent".parse::<AncLevel>().unwrap(), AncLevel::Transparency);
      assert_eq!("nc-high".parse::<AncLevel>().unwrap(), AncLevel::High);
      assert_eq!("low".parse::<AncLevel>().unwrap(), AncLevel::Low);
      assert_eq!(AncLevel::Mid.to_string(), "nc-mid");
      assert!("loud".parse::<AncLevel>().is_err());
   }

   #[test]
   fn test_anc_wire() {
      assert_eq!(AncLevel::Transparency.encode(), [0x01, 0x07, 0x00]);
      assert_eq!(AncLevel::decode(&[0x01, 0x05]).unwrap(), AncLevel::Off);
      assert!(AncLevel::decode(&[0x01, 0x06]).is_err());
   }

   #[test]
   fn test_custom_eq_encode() {
      let eq = CustomEq::new(2.0, 0.0, -1.0);
      let bytes = eq.encode().unwrap();
      assert_eq!(bytes.len(), 53);
      assert_eq!(&bytes[1..5], &(-2.0f32).to_le_bytes());
      assert_eq!(&bytes[6..10], &0.0f32.to_le_bytes());
      assert_eq!(&bytes[19..23], &(-1.0f32).to_le_bytes());
      assert_eq!(&bytes[32..36], &2.0f32.to_le_bytes());
      assert_eq!(CustomEq::decode(&bytes).unwrap(), eq);
   }

   #[test]
   fn test_custom_eq_headroom_without_boost() {
      let bytes = CustomEq::new(-3.0, -1.5, 0.0).encode().unwrap();
      // -0.0 on the wire
      assert_eq!(&bytes[1..5], &[0x00, 0x00, 0x00, 0x80]);
   }

   #[test]
   fn test_custom_eq_out_of_range() {
      let err = CustomEq::new(6.5, 0.0, 0.0).encode().unwrap_err();
      assert!(matches!(err, ProtocolError::OutOfRange { value: 65, .. }));
      assert!(CustomEq::new(-6.0, 6.0, 0.0).encode().is_ok());
      assert!(CustomEq::decode(&[0u8; 44]).is_err());
   }

   #[test]
   fn test_custom_eq_rejects_non_finite_bands() {
      let mut bytes = CustomEq::new(1.0, 0.0, 0.0).encode().unwrap();
      bytes[19..23].copy_from_slice(&f32::NAN.to_le_bytes());
      let err = CustomEq::decode(&bytes).unwrap_err();
      assert!(matches!(err, ProtocolError::Malformed(_)));

      bytes[19..23].copy_from_slice(&f32::INFINITY.to_le_bytes());
      assert!(CustomEq::decode(&bytes).is_err());

      let err = CustomEq::new(0.0, f32::NAN, 0.0).encode().unwrap_err();
      assert!(matches!(err, ProtocolError::OutOfRange { .. }));
   }

   #[test]
   fn test_eq_gain_serde() {
      let eq: CustomEq = serde_json::from_str(r#"{"bass":2,"mid":0,"treble":-1.5}"#).unwrap();
      assert_eq!(eq.treble.tenths(), -15);
      assert_eq!(serde_json::to_value(eq.bass).unwrap(), serde_json::json!(2.0));
   }

   #[test]
   fn test_enhanced_bass() {
      let bass = EnhancedBass {
         enabled: true,
         level: 3,
      };
      assert_eq!(bass.encode().unwrap(), [0x01, 0x06]);
      assert_eq!(EnhancedBass::decode(&[0x01, 0x06]).unwrap(), bass);
      assert!(
         EnhancedBass {
            enabled: true,
            level: 200
         }
         .encode()
         .is_err()
      );
   }

   #[test]
   fn test_toggles() {
      assert_eq!(encode_in_ear(true), [0x01, 0x01, 0x01]);
      assert!(!decode_in_ear(&[0x01, 0x01, 0x00]).unwrap());
      assert_eq!(encode_latency(false), [0x02, 0x00]);
      assert!(decode_latency(&[0x01]).unwrap());
      assert!(!decode_personalized_anc(&[0x00]).unwrap());
      assert_eq!(decode_firmware(b" 1.0.2.117\0\n"), "1.0.2.117");
   }

   #[test]
   fn test_gestures() {
      let payload = [0x02, 0x02, 0x01, 0x02, 0x0B, 0x03, 0x01, 0x02, 0x0A];
      let slots = GestureSlot::decode_list(&payload).unwrap();
      assert_eq!(slots.len(), 2);
      assert_eq!(slots[1].action, 0x0A);
      assert_eq!(slots[0].encode(), [0x01, 0x02, 0x01, 0x02, 0x0B]);
      assert_eq!(GestureSlot::encode_list(&slots).unwrap(), payload);
   }

   #[test]
   fn test_led_layout() {
      let colors = LedColors(vec![
         LedColor { r: 255, g: 0, b: 0 },
         LedColor { r: 0, g: 0, b: 255 },
      ]);
      let bytes = colors.encode().unwrap();
      assert_eq!(bytes, [0x02, 0x01, 255, 0, 0, 0x02, 0, 0, 255]);
      assert_eq!(LedColors::decode(&bytes).unwrap(), colors);
      assert!(LedColors(vec![LedColor::default(); 64]).encode().is_err());
   }

   #[test]
   fn test_ring_payloads() {
      let both = Ring {
         enabled: true,
         bud: None,
      };
      assert_eq!(both.encode(), [0x01]);
      let left = Ring {
         enabled: false,
         bud: Some(Bud::Left),
      };
      assert_eq!(left.encode(), [0x02, 0x00]);
      assert_eq!(Ring::decode(&left.encode()).unwrap(), left);
   }

   #[test]
   fn test_serial_lines() {
      let mut payload = vec![0u8; 7];
      payload.extend_from_slice(b"1,2,abc\n2,4,SH10171234567890\n");
      assert_eq!(decode_serial(&payload).unwrap().as_deref(), Some("SH10171234567890"));

      let mut payload = vec![0u8; 7];
      payload.extend_from_slice(b"1,4\n");
      assert_eq!(decode_serial(&payload).unwrap(), None);
      assert!(decode_serial(&[0u8; 3]).is_err());

      assert_eq!(
         decode_serial(&encode_serial("MA2223")).unwrap().as_deref(),
         Some("MA2223")
      );
   }
}
