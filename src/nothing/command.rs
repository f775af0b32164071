//! Typed commands and responses, and their mapping onto frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use crate::nothing::{
   codec::{Frame, ProtocolError},
   models::{Capability, Identity},
   protocol::*,
};

/// Setting or action addressed by a command.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   PartialOrd,
   Ord,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Category {
   Identity,
   Battery,
   Anc,
   Eq,
   CustomEq,
   EnhancedBass,
   PersonalizedAnc,
   InEar,
   Latency,
   Gestures,
   Led,
   Firmware,
   Ring,
   EarFit,
}

impl Category {
   pub const fn required_capability(self) -> Option<Capability> {
      match self {
         Self::Anc => Some(Capability::Anc),
         Self::CustomEq => Some(Capability::CustomEq),
         Self::EnhancedBass => Some(Capability::EnhancedBass),
         Self::PersonalizedAnc => Some(Capability::PersonalizedAnc),
         Self::InEar => Some(Capability::InEarDetection),
         Self::Led => Some(Capability::LedCase),
         _ => None,
      }
   }

   /// Opcodes that answer a read of this category, solicited or not.
   pub const fn response_opcodes(self) -> &'static [u16] {
      match self {
         Self::Identity => &[RSP_SERIAL],
         Self::Battery => &[RSP_BATTERY, RSP_BATTERY_NOTIFY],
         Self::Anc => &[RSP_ANC, RSP_ANC_NOTIFY],
         Self::Eq => &[RSP_EQ, RSP_LISTENING_MODE],
         Self::CustomEq => &[RSP_CUSTOM_EQ],
         Self::EnhancedBass => &[RSP_ENHANCED_BASS],
         Self::PersonalizedAnc => &[RSP_PERSONALIZED_ANC],
         Self::InEar => &[RSP_IN_EAR],
         Self::Latency => &[RSP_LATENCY],
         Self::Gestures => &[RSP_GESTURES],
         Self::Led => &[RSP_LED],
         Self::Firmware => &[RSP_FIRMWARE],
         Self::EarFit => &[RSP_EAR_FIT],
         Self::Ring => &[],
      }
   }

   pub fn from_response_opcode(opcode: u16) -> Option<Self> {
      <Self as strum::IntoEnumIterator>::iter().find(|c| c.response_opcodes().contains(&opcode))
   }

   /// The read command for this category, if it can be read.
   pub const fn read(self) -> Option<Command> {
      Some(match self {
         Self::Identity => Command::Identify,
         Self::Battery => Command::ReadBattery,
         Self::Anc => Command::ReadAnc,
         Self::Eq => Command::ReadEq,
         Self::CustomEq => Command::ReadCustomEq,
         Self::EnhancedBass => Command::ReadEnhancedBass,
         Self::PersonalizedAnc => Command::ReadPersonalizedAnc,
         Self::InEar => Command::ReadInEar,
         Self::Latency => Command::ReadLatency,
         Self::Gestures => Command::ReadGestures,
         Self::Led => Command::ReadLed,
         Self::Firmware => Command::ReadFirmware,
         Self::EarFit => Command::ReadEarFit,
         Self::Ring => return None,
      })
   }

   /// Builds the write command for this category from its JSON value.
   pub fn write_from_json(self, value: Value) -> Result<Command, serde_json::Error> {
      use serde::de::Error as _;

      Ok(match self {
         Self::Anc => Command::SetAnc(serde_json::from_value(value)?),
         Self::Eq => Command::SetEq(serde_json::from_value(value)?),
         Self::CustomEq => Command::SetCustomEq(serde_json::from_value(value)?),
         Self::EnhancedBass => Command::SetEnhancedBass(serde_json::from_value(value)?),
         Self::PersonalizedAnc => Command::SetPersonalizedAnc(serde_json::from_value(value)?),
         Self::InEar => Command::SetInEar(serde_json::from_value(value)?),
         Self::Latency => Command::SetLatency(serde_json::from_value(value)?),
         Self::Gestures => Command::SetGesture(serde_json::from_value(value)?),
         Self::Led => Command::SetLed(serde_json::from_value(value)?),
         Self::Ring => Command::Ring(serde_json::from_value(value)?),
         Self::EarFit => Command::StartEarFit,
         Self::Identity | Self::Battery | Self::Firmware => {
            return Err(serde_json::Error::custom(format!("{self} is read-only")));
         },
      })
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
   Read,
   Write,
}

/// A single request to the earbuds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
   Identify,
   ReadBattery,
   ReadAnc,
   SetAnc(AncLevel),
   ReadEq,
   SetEq(EqPreset),
   ReadCustomEq,
   SetCustomEq(CustomEq),
   ReadEnhancedBass,
   SetEnhancedBass(EnhancedBass),
   ReadPersonalizedAnc,
   SetPersonalizedAnc(bool),
   ReadInEar,
   SetInEar(bool),
   ReadLatency,
   SetLatency(bool),
   ReadGestures,
   SetGesture(GestureSlot),
   ReadLed,
   SetLed(LedColors),
   ReadFirmware,
   Ring(Ring),
   StartEarFit,
   ReadEarFit,
}

impl Command {
   pub const fn category(&self) -> Category {
      match self {
         Self::Identify => Category::Identity,
         Self::ReadBattery => Category::Battery,
         Self::ReadAnc | Self::SetAnc(_) => Category::Anc,
         Self::ReadEq | Self::SetEq(_) => Category::Eq,
         Self::ReadCustomEq | Self::SetCustomEq(_) => Category::CustomEq,
         Self::ReadEnhancedBass | Self::SetEnhancedBass(_) => Category::EnhancedBass,
         Self::ReadPersonalizedAnc | Self::SetPersonalizedAnc(_) => Category::PersonalizedAnc,
         Self::ReadInEar | Self::SetInEar(_) => Category::InEar,
         Self::ReadLatency | Self::SetLatency(_) => Category::Latency,
         Self::ReadGestures | Self::SetGesture(_) => Category::Gestures,
         Self::ReadLed | Self::SetLed(_) => Category::Led,
         Self::ReadFirmware => Category::Firmware,
         Self::Ring(_) => Category::Ring,
         Self::StartEarFit | Self::ReadEarFit => Category::EarFit,
      }
   }

   pub const fn direction(&self) -> Direction {
      match self {
         Self::Identify
         | Self::ReadBattery
         | Self::ReadAnc
         | Self::ReadEq
         | Self::ReadCustomEq
         | Self::ReadEnhancedBass
         | Self::ReadPersonalizedAnc
         | Self::ReadInEar
         | Self::ReadLatency
         | Self::ReadGestures
         | Self::ReadLed
         | Self::ReadFirmware
         | Self::ReadEarFit => Direction::Read,
         _ => Direction::Write,
      }
   }

   pub const fn is_read(&self) -> bool {
      matches!(self.direction(), Direction::Read)
   }

   pub const fn opcode(&self) -> u16 {
      match self {
         Self::Identify => REQ_SERIAL,
         Self::ReadBattery => REQ_BATTERY,
         Self::ReadAnc => REQ_ANC,
         Self::SetAnc(_) => CMD_SET_ANC,
         Self::ReadEq => REQ_EQ,
         Self::SetEq(_) => CMD_SET_EQ,
         Self::ReadCustomEq => REQ_CUSTOM_EQ,
         Self::SetCustomEq(_) => CMD_SET_CUSTOM_EQ,
         Self::ReadEnhancedBass => REQ_ENHANCED_BASS,
         Self::SetEnhancedBass(_) => CMD_SET_ENHANCED_BASS,
         Self::ReadPersonalizedAnc => REQ_PERSONALIZED_ANC,
         Self::SetPersonalizedAnc(_) => CMD_SET_PERSONALIZED_ANC,
         Self::ReadInEar => REQ_IN_EAR,
         Self::SetInEar(_) => CMD_SET_IN_EAR,
         Self::ReadLatency => REQ_LATENCY,
         Self::SetLatency(_) => CMD_SET_LATENCY,
         Self::ReadGestures => REQ_GESTURES,
         Self::SetGesture(_) => CMD_SET_GESTURE,
         Self::ReadLed => REQ_LED,
         Self::SetLed(_) => CMD_SET_LED,
         Self::ReadFirmware => REQ_FIRMWARE,
         Self::Ring(_) => CMD_RING,
         Self::StartEarFit | Self::ReadEarFit => CMD_EAR_FIT,
      }
   }

   /// Encodes the request frame. Range checks happen here, before any I/O.
   pub fn encode(&self) -> Result<Frame, ProtocolError> {
      let payload: Vec<u8> = match self {
         Self::SetAnc(level) => level.encode().to_vec(),
         Self::SetEq(preset) => preset.encode().to_vec(),
         Self::SetCustomEq(eq) => eq.encode()?,
         Self::SetEnhancedBass(bass) => bass.encode()?.to_vec(),
         Self::SetPersonalizedAnc(on) => encode_personalized_anc(*on).to_vec(),
         Self::SetInEar(on) => encode_in_ear(*on).to_vec(),
         Self::SetLatency(low) => encode_latency(*low).to_vec(),
         Self::SetGesture(slot) => slot.encode().to_vec(),
         Self::SetLed(colors) => colors.encode()?,
         Self::Ring(ring) => ring.encode(),
         Self::StartEarFit => vec![0x01],
         Self::ReadEarFit => vec![0x00],
         _ => Vec::new(),
      };
      Frame::new(self.opcode(), &payload)
   }

   /// Recovers the command from a request frame.
   pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
      let p = frame.payload.as_slice();
      let unexpected = |len: usize| {
         if p.len() < len {
            Err(ProtocolError::malformed(format!(
               "request 0x{:04x} needs {len} bytes, got {}",
               frame.opcode,
               p.len()
            )))
         } else {
            Ok(())
         }
      };

      Ok(match frame.opcode {
         REQ_SERIAL => Self::Identify,
         REQ_BATTERY => Self::ReadBattery,
         REQ_ANC => Self::ReadAnc,
         CMD_SET_ANC => Self::SetAnc(AncLevel::decode(p)?),
         REQ_EQ => Self::ReadEq,
         CMD_SET_EQ => Self::SetEq(EqPreset::decode(p)?),
         REQ_CUSTOM_EQ => Self::ReadCustomEq,
         CMD_SET_CUSTOM_EQ => Self::SetCustomEq(CustomEq::decode(p)?),
         REQ_ENHANCED_BASS => Self::ReadEnhancedBass,
         CMD_SET_ENHANCED_BASS => Self::SetEnhancedBass(EnhancedBass::decode(p)?),
         REQ_PERSONALIZED_ANC => Self::ReadPersonalizedAnc,
         CMD_SET_PERSONALIZED_ANC => Self::SetPersonalizedAnc(decode_personalized_anc(p)?),
         REQ_IN_EAR => Self::ReadInEar,
         CMD_SET_IN_EAR => Self::SetInEar(decode_in_ear(p)?),
         REQ_LATENCY => Self::ReadLatency,
         CMD_SET_LATENCY => Self::SetLatency(decode_latency(p)?),
         REQ_GESTURES => Self::ReadGestures,
         CMD_SET_GESTURE => {
            unexpected(5)?;
            Self::SetGesture(GestureSlot {
               device: p[1],
               common: p[2],
               gesture_type: p[3],
               action: p[4],
            })
         },
         REQ_LED => Self::ReadLed,
         CMD_SET_LED => Self::SetLed(LedColors::decode(p)?),
         REQ_FIRMWARE => Self::ReadFirmware,
         CMD_RING => Self::Ring(Ring::decode(p)?),
         CMD_EAR_FIT => {
            unexpected(1)?;
            if p[0] == 0x00 { Self::ReadEarFit } else { Self::StartEarFit }
         },
         other => {
            return Err(ProtocolError::malformed(format!("unknown request opcode 0x{other:04x}")));
         },
      })
   }

   /// Whether `opcode` answers this command.
   pub fn expects(&self, opcode: u16) -> bool {
      self.is_read() && self.category().response_opcodes().contains(&opcode)
   }

   pub fn decode_response(&self, frame: &Frame) -> Result<Response, ProtocolError> {
      if !self.expects(frame.opcode) {
         return Err(ProtocolError::UnexpectedResponse {
            opcode: frame.opcode,
            expected: self.category().into(),
         });
      }
      Response::decode(self.category(), frame)
   }

   /// Value the category holds once this write has been accepted, given the
   /// previously cached value. `None` means the cached entry is stale.
   pub fn written_value(&self, previous: Option<&Response>) -> Option<Response> {
      Some(match self {
         Self::SetAnc(level) => Response::Anc(*level),
         Self::SetEq(preset) => Response::Eq(*preset),
         Self::SetCustomEq(eq) => Response::CustomEq(*eq),
         Self::SetEnhancedBass(bass) => Response::EnhancedBass(*bass),
         Self::SetPersonalizedAnc(on) => Response::PersonalizedAnc(*on),
         Self::SetInEar(on) => Response::InEar(*on),
         Self::SetLatency(low) => Response::Latency(*low),
         Self::SetLed(colors) => Response::Led(colors.clone()),
         Self::SetGesture(slot) => {
            let Some(Response::Gestures(slots)) = previous else {
               return None;
            };
            let mut slots = slots.clone();
            match slots.iter_mut().find(|s| s.same_slot(slot)) {
               Some(existing) => *existing = *slot,
               None => slots.push(*slot),
            }
            Response::Gestures(slots)
         },
         _ => return None,
      })
   }
}

/// Decoded device reply, also the value type held by the state cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
   Identity(Identity),
   Battery(BatteryInfo),
   Anc(AncLevel),
   Eq(EqPreset),
   CustomEq(CustomEq),
   EnhancedBass(EnhancedBass),
   PersonalizedAnc(bool),
   InEar(bool),
   Latency(bool),
   Gestures(Vec<GestureSlot>),
   Led(LedColors),
   Firmware(SmolStr),
   EarFit(EarFitResult),
   /// A write the link accepted.
   Ack(Category),
}

impl Response {
   pub fn decode(category: Category, frame: &Frame) -> Result<Self, ProtocolError> {
      let p = frame.payload.as_slice();
      Ok(match category {
         Category::Identity => Self::Identity(Identity::from_serial(decode_serial(p)?)),
         Category::Battery => Self::Battery(BatteryInfo::decode(p)?),
         Category::Anc => Self::Anc(AncLevel::decode(p)?),
         Category::Eq => Self::Eq(EqPreset::decode(p)?),
         Category::CustomEq => Self::CustomEq(CustomEq::decode(p)?),
         Category::EnhancedBass => Self::EnhancedBass(EnhancedBass::decode(p)?),
         Category::PersonalizedAnc => Self::PersonalizedAnc(decode_personalized_anc(p)?),
         Category::InEar => Self::InEar(decode_in_ear(p)?),
         Category::Latency => Self::Latency(decode_latency(p)?),
         Category::Gestures => Self::Gestures(GestureSlot::decode_list(p)?),
         Category::Led => Self::Led(LedColors::decode(p)?),
         Category::Firmware => Self::Firmware(decode_firmware(p)),
         Category::EarFit => Self::EarFit(EarFitResult::decode(p)?),
         Category::Ring => {
            return Err(ProtocolError::UnexpectedResponse {
               opcode: frame.opcode,
               expected: "ring",
            });
         },
      })
   }

   /// Classifies a frame that arrived without a pending read.
   pub fn decode_unsolicited(frame: &Frame) -> Option<Result<Self, ProtocolError>> {
      Category::from_response_opcode(frame.opcode).map(|category| Self::decode(category, frame))
   }

   /// Builds the device-side frame carrying this value.
   pub fn encode(&self) -> Result<Frame, ProtocolError> {
      let category = self.category();
      let opcode = category.response_opcodes().first().copied().ok_or(ProtocolError::UnexpectedResponse {
         opcode: 0,
         expected: "readable category",
      })?;
      let payload = match self {
         Self::Identity(identity) => encode_serial(identity.serial.as_deref().unwrap_or_default()),
         Self::Battery(info) => info.encode(),
         Self::Anc(level) => level.encode()[..2].to_vec(),
         Self::Eq(preset) => vec![preset.0],
         Self::CustomEq(eq) => eq.encode()?,
         Self::EnhancedBass(bass) => bass.encode()?.to_vec(),
         Self::PersonalizedAnc(on) => encode_personalized_anc(*on).to_vec(),
         Self::InEar(on) => encode_in_ear(*on).to_vec(),
         Self::Latency(low) => encode_latency(*low).to_vec(),
         Self::Gestures(slots) => GestureSlot::encode_list(slots)?,
         Self::Led(colors) => colors.encode()?,
         Self::Firmware(version) => version.as_bytes().to_vec(),
         Self::EarFit(result) => result.encode().to_vec(),
         Self::Ack(_) => Vec::new(),
      };
      Frame::new(opcode, &payload)
   }

   pub const fn category(&self) -> Category {
      match self {
         Self::Identity(_) => Category::Identity,
         Self::Battery(_) => Category::Battery,
         Self::Anc(_) => Category::Anc,
         Self::Eq(_) => Category::Eq,
         Self::CustomEq(_) => Category::CustomEq,
         Self::EnhancedBass(_) => Category::EnhancedBass,
         Self::PersonalizedAnc(_) => Category::PersonalizedAnc,
         Self::InEar(_) => Category::InEar,
         Self::Latency(_) => Category::Latency,
         Self::Gestures(_) => Category::Gestures,
         Self::Led(_) => Category::Led,
         Self::Firmware(_) => Category::Firmware,
         Self::EarFit(_) => Category::EarFit,
         Self::Ack(category) => *category,
      }
   }

   pub fn to_json(&self) -> Value {
      match self {
         Self::Ack(category) => serde_json::json!({ "ok": true, "category": category }),
         other => serde_json::to_value(other).unwrap_or(Value::Null),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn every_command() -> Vec<Command> {
      vec![
         Command::Identify,
         Command::ReadBattery,
         Command::ReadAnc,
         Command::SetAnc(AncLevel::Transparency),
         Command::ReadEq,
         Command::SetEq(EqPreset(3)),
         Command::ReadCustomEq,
         Command::SetCustomEq(CustomEq::new(2.0, 0.0, -1.0)),
         Command::ReadEnhancedBass,
         Command::SetEnhancedBass(EnhancedBass {
            enabled: true,
            level: 4,
         }),
         Command::ReadPersonalizedAnc,
         Command::SetPersonalizedAnc(true),
         Command::ReadInEar,
         Command::SetInEar(false),
         Command::ReadLatency,
         Command::SetLatency(true),
         Command::ReadGestures,
         Command::SetGesture(GestureSlot {
            device: 0x02,
            common: 0x01,
            gesture_type: 0x02,
            action: 0x0B,
         }),
         Command::ReadLed,
         Command::SetLed(LedColors(vec![LedColor { r: 1, g: 2, b: 3 }])),
         Command::ReadFirmware,
         Command::Ring(Ring {
            enabled: true,
            bud: Some(Bud::Right),
         }),
         Command::StartEarFit,
         Command::ReadEarFit,
      ]
   }

   #[test]
   fn test_every_command_survives_the_wire() {
      for command in every_command() {
         let frame = command.encode().unwrap();
         let bytes = frame.encode();
         let decoded = Command::decode(&Frame::decode(&bytes).unwrap()).unwrap();
         assert_eq!(decoded, command, "{command:?}");
      }
   }

   #[test]
   fn test_out_of_range_rejected_before_encoding() {
      let cmd = Command::SetCustomEq(CustomEq::new(0.0, 9.0, 0.0));
      assert!(matches!(cmd.encode(), Err(ProtocolError::OutOfRange { .. })));
   }

   #[test]
   fn test_anc_response_from_notification() {
      let frame = Frame::new(RSP_ANC_NOTIFY, &[0x01, 0x07]).unwrap();
      assert_eq!(
         Response::decode_unsolicited(&frame),
         Some(Ok(Response::Anc(AncLevel::Transparency)))
      );
      assert_eq!(
         Command::ReadAnc.decode_response(&frame),
         Ok(Response::Anc(AncLevel::Transparency))
      );
   }

   #[test]
   fn test_response_mismatch() {
      let frame = Frame::new(RSP_LATENCY, &[0x01, 0x00]).unwrap();
      assert!(!Command::ReadAnc.expects(frame.opcode));
      assert!(matches!(
         Command::ReadAnc.decode_response(&frame),
         Err(ProtocolError::UnexpectedResponse { .. })
      ));
      assert!(!Command::SetLatency(true).expects(RSP_LATENCY));
      assert_eq!(Response::decode_unsolicited(&Frame::new(0x1234, &[]).unwrap()), None);
   }

   #[test]
   fn test_response_encoding_matches_reads() {
      let values = [
         Response::Anc(AncLevel::High),
         Response::Eq(EqPreset(2)),
         Response::CustomEq(CustomEq::new(-2.0, 1.0, 0.5)),
         Response::Latency(true),
         Response::InEar(false),
         Response::Firmware("1.0.2.117".into()),
         Response::EarFit(EarFitResult { left: 1, right: 2 }),
      ];
      for value in values {
         let frame = value.encode().unwrap();
         let read = value.category().read().unwrap();
         assert_eq!(read.decode_response(&frame).unwrap(), value);
      }
   }

   #[test]
   fn test_gesture_write_merges_into_cached_list() {
      let slot = |action| GestureSlot {
         device: 0x02,
         common: 0x01,
         gesture_type: 0x02,
         action,
      };
      let other = GestureSlot {
         device: 0x03,
         ..slot(0x01)
      };
      let previous = Response::Gestures(vec![slot(0x01), other]);

      let merged = Command::SetGesture(slot(0x0B)).written_value(Some(&previous));
      assert_eq!(merged, Some(Response::Gestures(vec![slot(0x0B), other])));
      assert_eq!(Command::SetGesture(slot(0x0B)).written_value(None), None);
   }

   #[test]
   fn test_category_names() {
      assert_eq!("custom-eq".parse::<Category>().unwrap(), Category::CustomEq);
      assert_eq!(Category::EnhancedBass.to_string(), "enhanced-bass");
      assert_eq!(Category::Led.required_capability(), Some(Capability::LedCase));
      assert_eq!(Category::Battery.required_capability(), None);
      assert_eq!(Category::Ring.read(), None);
   }

   #[test]
   fn test_write_from_json() {
      let cmd = Category::Anc
         .write_from_json(serde_json::json!("transparency"))
         .unwrap();
      assert_eq!(cmd, Command::SetAnc(AncLevel::Transparency));

      let cmd = Category::CustomEq
         .write_from_json(serde_json::json!({"bass": 2, "mid": 0, "treble": -1}))
         .unwrap();
      assert_eq!(cmd, Command::SetCustomEq(CustomEq::new(2.0, 0.0, -1.0)));

      assert!(Category::Battery.write_from_json(Value::Null).is_err());
   }
}
