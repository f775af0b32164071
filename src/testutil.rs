//! Simulated earbuds and discovery for tests.

use std::{
   collections::VecDeque,
   io,
   sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   },
   time::Duration,
};

use bluer::Address;
use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::{sync::mpsc, task::JoinSet, time};

use crate::{
   bluetooth::{
      discovery::{DiscoveredDevice, Discovery, ServiceHint, filter_by_name},
      rfcomm::{Connector, FrameReceiver, FrameSender, Link, LinkCommand},
   },
   config::Config,
   error::{DiscoveryError, EarError, Result},
   event::{EarEvent, EventBus},
   nothing::{
      codec::Frame,
      command::{Command, Response},
      models::Identity,
      protocol::*,
      session::EarSession,
   },
};

pub fn address() -> Address {
   Address::new([0x3C, 0xB0, 0xED, 0xC4, 0xB0, 0x31])
}

/// Collects every emitted event.
#[derive(Default)]
pub struct RecordingBus {
   events: Mutex<Vec<EarEvent>>,
}

impl RecordingBus {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn events(&self) -> Vec<EarEvent> {
      self.events.lock().clone()
   }
}

impl EventBus for RecordingBus {
   fn emit(&self, event: EarEvent) {
      self.events.lock().push(event);
   }
}

pub async fn open_session(buds: &SimulatedBuds, config: Config) -> (EarSession, Arc<RecordingBus>) {
   let bus = RecordingBus::new();
   let session = EarSession::open(buds, address(), 15, Arc::new(config), bus.clone(), None)
      .await
      .expect("simulated session opens");
   (session, bus)
}

struct Device {
   serial: SmolStr,
   battery: BatteryInfo,
   anc: AncLevel,
   eq: EqPreset,
   custom_eq: CustomEq,
   enhanced_bass: EnhancedBass,
   personalized_anc: bool,
   in_ear: bool,
   latency: bool,
   gestures: Vec<GestureSlot>,
   led: LedColors,
   firmware: SmolStr,

   silent: bool,
   drop_replies: usize,
   hang_up_on: Option<u16>,
   refuse: bool,
   reply_delay: Duration,

   received: Vec<Frame>,
   max_outstanding: usize,
   opened: usize,
   notify: Option<mpsc::Sender<Result<Frame>>>,
}

impl Device {
   fn value_for(&mut self, command: Command) -> Option<Response> {
      Some(match command {
         Command::Identify => Response::Identity(Identity::from_serial(Some(self.serial.clone()))),
         Command::ReadBattery => Response::Battery(self.battery),
         Command::ReadAnc => Response::Anc(self.anc),
         Command::ReadEq => Response::Eq(self.eq),
         Command::ReadCustomEq => Response::CustomEq(self.custom_eq),
         Command::ReadEnhancedBass => Response::EnhancedBass(self.enhanced_bass),
         Command::ReadPersonalizedAnc => Response::PersonalizedAnc(self.personalized_anc),
         Command::ReadInEar => Response::InEar(self.in_ear),
         Command::ReadLatency => Response::Latency(self.latency),
         Command::ReadGestures => Response::Gestures(self.gestures.clone()),
         Command::ReadLed => Response::Led(self.led.clone()),
         Command::ReadFirmware => Response::Firmware(self.firmware.clone()),
         Command::ReadEarFit => Response::EarFit(EarFitResult { left: 1, right: 1 }),
         Command::SetAnc(level) => return self.write(|d| d.anc = level),
         Command::SetEq(preset) => return self.write(|d| d.eq = preset),
         Command::SetCustomEq(eq) => return self.write(|d| d.custom_eq = eq),
         Command::SetEnhancedBass(bass) => return self.write(|d| d.enhanced_bass = bass),
         Command::SetPersonalizedAnc(on) => return self.write(|d| d.personalized_anc = on),
         Command::SetInEar(on) => return self.write(|d| d.in_ear = on),
         Command::SetLatency(low) => return self.write(|d| d.latency = low),
         Command::SetGesture(slot) => {
            return self.write(|d| match d.gestures.iter_mut().find(|s| s.same_slot(&slot)) {
               Some(existing) => *existing = slot,
               None => d.gestures.push(slot),
            });
         },
         Command::SetLed(colors) => return self.write(|d| d.led = colors),
         Command::Ring(_) | Command::StartEarFit => return None,
      })
   }

   fn write(&mut self, f: impl FnOnce(&mut Self)) -> Option<Response> {
      f(self);
      None
   }

   fn respond(&mut self, frame: &Frame) -> Option<Frame> {
      let command = Command::decode(frame).expect("dispatcher sent an unknown request");
      let value = self.value_for(command)?;
      if self.silent {
         return None;
      }
      if self.drop_replies > 0 {
         self.drop_replies -= 1;
         return None;
      }
      Some(value.encode().expect("simulated value encodes"))
   }
}

/// In-memory earbuds speaking the frame protocol over a fake link.
#[derive(Clone)]
pub struct SimulatedBuds {
   device: Arc<Mutex<Device>>,
}

impl SimulatedBuds {
   pub fn new(serial: &str) -> Self {
      let state = BatteryState {
         level: 80,
         charging: false,
      };
      Self {
         device: Arc::new(Mutex::new(Device {
            serial: serial.into(),
            battery: BatteryInfo {
               left: Some(state),
               right: Some(state),
               case: None,
            },
            anc: AncLevel::Off,
            eq: EqPreset(0),
            custom_eq: CustomEq::default(),
            enhanced_bass: EnhancedBass::default(),
            personalized_anc: false,
            in_ear: true,
            latency: false,
            gestures: Vec::new(),
            led: LedColors::default(),
            firmware: "1.0.2.117".into(),
            silent: false,
            drop_replies: 0,
            hang_up_on: None,
            refuse: false,
            reply_delay: Duration::ZERO,
            received: Vec::new(),
            max_outstanding: 0,
            opened: 0,
            notify: None,
         })),
      }
   }

   pub fn set_silent(&self, silent: bool) {
      self.device.lock().silent = silent;
   }

   pub fn drop_next_replies(&self, count: usize) {
      self.device.lock().drop_replies = count;
   }

   pub fn hang_up_on(&self, opcode: u16) {
      self.device.lock().hang_up_on = Some(opcode);
   }

   pub fn refuse_connections(&self) {
      self.device.lock().refuse = true;
   }

   pub fn set_reply_delay(&self, delay: Duration) {
      self.device.lock().reply_delay = delay;
   }

   pub fn set_anc(&self, level: AncLevel) {
      self.device.lock().anc = level;
   }

   /// Every request frame received, across all links.
   pub fn received(&self) -> Vec<Frame> {
      self.device.lock().received.clone()
   }

   /// Most frames that arrived while a read reply was still pending.
   pub fn max_outstanding(&self) -> usize {
      self.device.lock().max_outstanding
   }

   pub fn opened(&self) -> usize {
      self.device.lock().opened
   }

   /// Sends a frame the host did not ask for.
   pub async fn push_notification(&self, opcode: u16, payload: &[u8]) {
      let notify = self.device.lock().notify.clone().expect("link is open");
      let frame = Frame::new(opcode, payload).unwrap();
      notify.send(Ok(frame)).await.expect("link is open");
   }

   fn open_link(&self) -> Result<Link> {
      let mut device = self.device.lock();
      if device.refuse {
         return Err(EarError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
         )));
      }
      device.opened += 1;

      let (cmd_tx, cmd_rx) = mpsc::channel(32);
      let (frame_tx, frame_rx) = mpsc::channel(128);
      device.notify = Some(frame_tx.clone());
      drop(device);

      let mut tasks = JoinSet::new();
      tasks.spawn(serve(self.device.clone(), cmd_rx, frame_tx));
      Ok(Link::new(
         FrameReceiver::new(frame_rx),
         FrameSender::new(cmd_tx),
         tasks,
      ))
   }
}

impl Connector for SimulatedBuds {
   fn open(&self, _address: Address, _channel: u8) -> BoxFuture<'_, Result<Link>> {
      futures::future::ready(self.open_link()).boxed()
   }
}

async fn serve(
   device: Arc<Mutex<Device>>,
   mut commands: mpsc::Receiver<LinkCommand>,
   frames: mpsc::Sender<Result<Frame>>,
) {
   let mut backlog = VecDeque::new();
   loop {
      let command = match backlog.pop_front() {
         Some(command) => command,
         None => match commands.recv().await {
            Some(command) => command,
            None => return,
         },
      };
      let LinkCommand::Send { data, then } = command;
      let _ = then.send(Ok(()));
      let frame = Frame::decode(&data).expect("dispatcher sent a malformed frame");

      let (reply, delay, hang_up) = {
         let mut device = device.lock();
         device.received.push(frame.clone());
         if device.hang_up_on == Some(frame.opcode) {
            (None, Duration::ZERO, true)
         } else {
            (device.respond(&frame), device.reply_delay, false)
         }
      };
      if hang_up {
         let _ = frames.send(Err(EarError::ConnectionLost)).await;
         return;
      }
      let Some(reply) = reply else {
         continue;
      };

      if !delay.is_zero() {
         time::sleep(delay).await;
      }
      while let Ok(next) = commands.try_recv() {
         backlog.push_back(next);
      }
      {
         let mut device = device.lock();
         device.max_outstanding = device.max_outstanding.max(backlog.len());
      }
      if frames.send(Ok(reply)).await.is_err() {
         return;
      }
   }
}

/// Discovery returning a fixed device list and channel.
pub struct SimDiscovery {
   devices: Vec<DiscoveredDevice>,
   channel: Option<u8>,
   stall: bool,
   lookups: AtomicUsize,
}

impl SimDiscovery {
   pub fn new(devices: Vec<DiscoveredDevice>, channel: Option<u8>) -> Self {
      Self {
         devices,
         channel,
         stall: false,
         lookups: AtomicUsize::new(0),
      }
   }

   /// Channel lookups never complete.
   pub fn stalled(mut self) -> Self {
      self.stall = true;
      self
   }

   pub fn lookups(&self) -> usize {
      self.lookups.load(Ordering::Relaxed)
   }
}

impl Discovery for SimDiscovery {
   fn connected_devices(
      &self,
      name_filter: Option<String>,
   ) -> BoxFuture<'_, std::result::Result<Vec<DiscoveredDevice>, DiscoveryError>> {
      let devices = filter_by_name(self.devices.clone(), name_filter.as_deref());
      futures::future::ready(Ok(devices)).boxed()
   }

   fn resolve_channel(
      &self,
      address: Address,
      _hint: ServiceHint,
   ) -> BoxFuture<'_, std::result::Result<u8, DiscoveryError>> {
      self.lookups.fetch_add(1, Ordering::Relaxed);
      if self.stall {
         return futures::future::pending().boxed();
      }
      futures::future::ready(self.channel.ok_or(DiscoveryError::NotFound(address))).boxed()
   }
}
