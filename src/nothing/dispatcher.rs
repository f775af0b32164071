//! Per-session command dispatcher.
//!
//! One task per session owns the link. It takes requests off a FIFO queue
//! and keeps at most one frame in flight. While idle it applies unsolicited
//! frames to the state cache. A second timeout on the same command, or any
//! transport failure, tears the session down.

use std::sync::{Arc, atomic::Ordering};

use log::{debug, info, warn};
use tokio::{
   select,
   sync::{mpsc, oneshot},
   time::{self, Duration, Instant},
};

use crate::{
   bluetooth::rfcomm::Link,
   error::{DispatchError, EarError},
   event::{EarEvent, SessionClosed},
   nothing::{
      codec::Frame,
      command::{Command, Response},
      session::{Exchange, Request, SessionStatus, Shared},
   },
};

/// Operation ids cycle through 1..=OPERATION_ID_MAX
const OPERATION_ID_MAX: u8 = 250;

pub(crate) struct Dispatcher {
   shared: Arc<Shared>,
   link: Link,
   inbox: mpsc::Receiver<Request>,
   operation_id: u8,
   closers: Vec<oneshot::Sender<()>>,
}

impl Dispatcher {
   pub fn new(shared: Arc<Shared>, link: Link, inbox: mpsc::Receiver<Request>) -> Self {
      Self {
         shared,
         link,
         inbox,
         operation_id: 0,
         closers: Vec::new(),
      }
   }

   pub async fn run(mut self) {
      let reason = loop {
         select! {
            request = self.inbox.recv() => match request {
               Some(Request::Exchange(exchange)) => {
                  if let Err(reason) = self.dispatch(exchange).await {
                     break reason;
                  }
               },
               Some(Request::Close(then)) => {
                  self.closers.push(then);
                  break "closed by request".to_string();
               },
               None => break "all handles dropped".to_string(),
            },
            frame = self.link.rx.recv() => match frame {
               Ok(frame) => self.on_unsolicited(&frame),
               Err(EarError::Protocol(e)) => debug!("Ignoring undecodable frame: {e}"),
               Err(e) => break format!("link lost: {e}"),
            },
         }
      };
      self.teardown(reason).await;
   }

   fn next_operation_id(&mut self) -> u8 {
      self.operation_id = self.operation_id % OPERATION_ID_MAX + 1;
      self.operation_id
   }

   /// Runs one queued exchange. `Err` carries the reason the session must end.
   async fn dispatch(&mut self, exchange: Exchange) -> Result<(), String> {
      let Exchange {
         command,
         frame,
         timeout,
         reply,
      } = exchange;
      let category = command.category();

      if reply.is_closed() {
         debug!("Skipping {category} request cancelled while queued");
         return Ok(());
      }
      let status = self.shared.status.load();
      let admitted = match status {
         SessionStatus::Connected => true,
         SessionStatus::Connecting => command == Command::Identify,
         SessionStatus::Closing | SessionStatus::Disconnected => false,
      };
      if !admitted {
         let _ = reply.send(Err(DispatchError::SessionClosed));
         return Ok(());
      }

      let frame = frame.with_operation_id(self.next_operation_id());
      let result = match self.exchange(&command, &frame, timeout).await {
         Err(DispatchError::Timeout(_)) => {
            warn!("No {category} response within {timeout:?}, retrying once");
            self.exchange(&command, &frame, timeout).await
         },
         other => other,
      };

      let fatal = match &result {
         Ok(response) => {
            self.apply(&command, response);
            None
         },
         Err(e) => {
            if !command.is_read() {
               self.shared.cache.invalidate(category);
            }
            e.is_fatal().then(|| e.to_string())
         },
      };
      if fatal.is_some() {
         // Callers must not observe cached values once they see the failure
         self.mark_down();
      }
      let _ = reply.send(result);
      fatal.map_or(Ok(()), Err)
   }

   /// One request/response round trip bounded by `timeout`.
   async fn exchange(
      &mut self,
      command: &Command,
      frame: &Frame,
      timeout: Duration,
   ) -> Result<Response, DispatchError> {
      let category = command.category();
      let deadline = Instant::now() + timeout;

      match time::timeout_at(deadline, self.link.tx.send(frame)).await {
         Ok(Ok(())) => {},
         Err(_) | Ok(Err(EarError::RequestTimeout)) => return Err(DispatchError::Timeout(category)),
         Ok(Err(e)) => return Err(DispatchError::LinkLost(e.to_string())),
      }
      // The device does not acknowledge writes
      if !command.is_read() {
         return Ok(Response::Ack(category));
      }

      loop {
         let frame = match time::timeout_at(deadline, self.link.rx.recv()).await {
            Err(_) => return Err(DispatchError::Timeout(category)),
            Ok(Ok(frame)) => frame,
            Ok(Err(EarError::Protocol(e))) => return Err(DispatchError::Protocol(e)),
            Ok(Err(e)) => return Err(DispatchError::LinkLost(e.to_string())),
         };
         if command.expects(frame.opcode) {
            return command.decode_response(&frame).map_err(DispatchError::from);
         }
         self.on_unsolicited(&frame);
      }
   }

   /// Folds a successful exchange into the cache.
   fn apply(&self, command: &Command, response: &Response) {
      let category = command.category();
      let value = if command.is_read() {
         Some(response.clone())
      } else {
         let previous = self.shared.cache.get(category).map(|c| c.value);
         command.written_value(previous.as_ref())
      };
      match value {
         Some(value) => self.store(value),
         None if !command.is_read() => self.shared.cache.invalidate(category),
         None => {},
      }
   }

   fn store(&self, value: Response) {
      if self.shared.cache.put(value.clone()) {
         self
            .shared
            .events
            .emit(EarEvent::SettingChanged(value.category(), value));
      }
   }

   fn on_unsolicited(&self, frame: &Frame) {
      match Response::decode_unsolicited(frame) {
         Some(Ok(value)) => {
            debug!("Unsolicited {} update: {value:?}", value.category());
            self.store(value);
         },
         Some(Err(e)) => debug!("Undecodable notification 0x{:04x}: {e}", frame.opcode),
         None => debug!("Ignoring frame 0x{:04x}", frame.opcode),
      }
   }

   fn mark_down(&self) {
      self.shared.status.store(SessionStatus::Disconnected);
      self.shared.cache.invalidate_all();
   }

   async fn teardown(mut self, reason: String) {
      info!(
         "Session {} to {} ended: {reason}",
         self.shared.id, self.shared.address
      );
      self.mark_down();

      self.inbox.close();
      while let Some(request) = self.inbox.recv().await {
         match request {
            Request::Exchange(exchange) => {
               let _ = exchange.reply.send(Err(DispatchError::SessionClosed));
            },
            Request::Close(then) => self.closers.push(then),
         }
      }

      let Self {
         shared,
         link,
         closers,
         ..
      } = self;
      drop(link);

      if shared.announced.load(Ordering::Acquire) {
         shared.events.emit(EarEvent::SessionClosed(SessionClosed {
            id: shared.id,
            address: shared.address.to_string(),
            reason,
         }));
      }
      for then in closers {
         let _ = then.send(());
      }
   }
}

#[cfg(test)]
mod tests {
   use tokio::time::Duration;

   use crate::{
      config::Config,
      error::DispatchError,
      event::EarEvent,
      nothing::{
         command::{Category, Command, Response},
         protocol::{AncLevel, EqPreset, RSP_ANC_NOTIFY, RSP_LATENCY},
         session::{CachePolicy, SessionStatus},
      },
      testutil::{SimulatedBuds, open_session},
   };

   #[tokio::test]
   async fn test_commands_run_in_submission_order() {
      let buds = SimulatedBuds::new("SH10171234567890");
      buds.set_reply_delay(Duration::from_millis(5));
      let (session, _) = open_session(&buds, Config::default()).await;
      let skip = buds.received().len();

      let (a, b, c, d) = tokio::join!(
         session.execute(Command::SetAnc(AncLevel::Off)),
         session.execute(Command::ReadLatency),
         session.execute(Command::SetEq(EqPreset(2))),
         session.execute(Command::ReadAnc),
      );
      assert!(a.is_ok() && b.is_ok() && c.is_ok());
      assert_eq!(d.unwrap(), Response::Anc(AncLevel::Off));

      let opcodes: Vec<u16> = buds.received()[skip..].iter().map(|f| f.opcode).collect();
      assert_eq!(opcodes, [0xF00F, 0xC041, 0xF010, 0xC01E]);
      assert_eq!(buds.max_outstanding(), 0);
   }

   #[tokio::test(start_paused = true)]
   async fn test_repeated_timeout_tears_down_session() {
      let buds = SimulatedBuds::new("SH10171234567890");
      let (session, bus) = open_session(&buds, Config::default()).await;
      session.read(Category::Latency, CachePolicy::Device).await.unwrap();
      assert!(session.cache().get(Category::Latency).is_some());

      buds.set_silent(true);
      let err = session.execute(Command::ReadAnc).await.unwrap_err();
      assert_eq!(err, DispatchError::Timeout(Category::Anc));

      // Original frame plus exactly one retry
      let tail: Vec<u16> = buds.received().iter().rev().take(2).map(|f| f.opcode).collect();
      assert_eq!(tail, [0xC01E, 0xC01E]);

      assert_eq!(session.status(), SessionStatus::Disconnected);
      assert!(session.cache().is_empty());
      assert_eq!(
         session.read(Category::Latency, CachePolicy::PreferCached).await.unwrap_err().kind(),
         "no_session"
      );
      tokio::task::yield_now().await;
      assert!(bus.events().iter().any(|e| matches!(e, EarEvent::SessionClosed(_))));
   }

   #[tokio::test(start_paused = true)]
   async fn test_single_timeout_recovers_on_retry() {
      let buds = SimulatedBuds::new("SH10171234567890");
      let (session, _) = open_session(&buds, Config::default()).await;

      buds.drop_next_replies(1);
      let value = session.execute(Command::ReadLatency).await.unwrap();
      assert_eq!(value, Response::Latency(false));
      assert!(session.is_connected());
   }

   #[tokio::test(start_paused = true)]
   async fn test_queued_commands_fail_when_link_dies() {
      let buds = SimulatedBuds::new("SH10171234567890");
      let (session, _) = open_session(&buds, Config::default()).await;
      buds.hang_up_on(0xC041);

      let (first, second) = tokio::join!(
         session.execute(Command::ReadLatency),
         session.execute(Command::ReadAnc),
      );
      assert!(matches!(first, Err(DispatchError::LinkLost(_))));
      assert_eq!(second, Err(DispatchError::SessionClosed));
      assert_eq!(session.status(), SessionStatus::Disconnected);
   }

   #[tokio::test]
   async fn test_disconnect_cancels_queued_commands() {
      let buds = SimulatedBuds::new("SH10171234567890");
      buds.set_reply_delay(Duration::from_millis(20));
      let (session, _) = open_session(&buds, Config::default()).await;
      let closer = session.clone();

      let (first, second, ()) = tokio::join!(
         session.execute(Command::ReadLatency),
         session.execute(Command::ReadAnc),
         async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            closer.close().await;
         },
      );
      // The in-flight read drains; the queued one is cancelled
      assert_eq!(first, Ok(Response::Latency(false)));
      assert_eq!(second, Err(DispatchError::SessionClosed));
      assert_eq!(session.status(), SessionStatus::Disconnected);
   }

   #[tokio::test]
   async fn test_unsolicited_update_refreshes_cache() {
      let buds = SimulatedBuds::new("SH10171234567890");
      buds.set_anc(AncLevel::Low);
      let (session, bus) = open_session(&buds, Config::default()).await;

      buds.push_notification(RSP_ANC_NOTIFY, &[0x01, 0x03]).await;
      // Unrelated notification interleaved with a read
      buds.push_notification(RSP_LATENCY, &[0x01, 0x00]).await;
      let value = session.read(Category::Anc, CachePolicy::Device).await.unwrap();
      assert_eq!(value, Response::Anc(AncLevel::Low));

      assert_eq!(
         session.cache().get(Category::Latency).map(|c| c.value),
         Some(Response::Latency(true))
      );
      assert!(bus.events().iter().any(|e| matches!(
         e,
         EarEvent::SettingChanged(Category::Anc, Response::Anc(AncLevel::Low))
      )));
   }

   #[tokio::test]
   async fn test_dropped_caller_does_not_block_queue() {
      let buds = SimulatedBuds::new("SH10171234567890");
      buds.set_reply_delay(Duration::from_millis(10));
      let (session, _) = open_session(&buds, Config::default()).await;

      let cancelled = {
         let session = session.clone();
         tokio::spawn(async move { session.execute(Command::ReadBattery).await })
      };
      tokio::task::yield_now().await;
      cancelled.abort();

      let value = session.execute(Command::ReadLatency).await;
      assert_eq!(value, Ok(Response::Latency(false)));
   }
}
