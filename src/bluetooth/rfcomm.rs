//! RFCOMM stream transport for the earbuds' SPP control channel.
//!
//! This module provides an async RFCOMM link with separate sender and
//! receiver channels. The receiver side reassembles the byte stream into
//! protocol frames.

use std::time::Duration;

use bluer::{
   Address,
   rfcomm::{SocketAddr, Stream, stream},
};
use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::{
   io::{AsyncReadExt, AsyncWriteExt},
   sync::{mpsc, oneshot},
   task::JoinSet,
   time,
};

use crate::{
   error::{EarError, Result},
   nothing::codec::{Frame, FrameBuffer},
};

/// Largest chunk read from the socket at once
const READ_CHUNK: usize = 1024;
/// Timeout for write operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum LinkCommand {
   Send {
      data: Vec<u8>,
      then: oneshot::Sender<Result<()>>,
   },
}

/// Receiver half of an RFCOMM link.
#[derive(Debug)]
pub struct FrameReceiver {
   rx: mpsc::Receiver<Result<Frame>>,
}

impl FrameReceiver {
   pub(crate) const fn new(rx: mpsc::Receiver<Result<Frame>>) -> Self {
      Self { rx }
   }

   /// Next frame; decode failures are reported inline, transport failures end the stream.
   pub async fn recv(&mut self) -> Result<Frame> {
      self.rx.recv().await.ok_or(EarError::ConnectionClosed)?
   }
}

/// Sender half of an RFCOMM link.
///
/// This type is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct FrameSender {
   tx: mpsc::Sender<LinkCommand>,
}

impl FrameSender {
   pub(crate) const fn new(tx: mpsc::Sender<LinkCommand>) -> Self {
      Self { tx }
   }

   pub fn is_connected(&self) -> bool {
      !self.tx.is_closed()
   }

   /// Writes one frame and waits until the socket accepted it.
   pub async fn send(&self, frame: &Frame) -> Result<()> {
      if !self.is_connected() {
         return Err(EarError::ConnectionClosed);
      }

      let (tx, rx) = oneshot::channel();
      self
         .tx
         .send(LinkCommand::Send {
            data: frame.encode(),
            then: tx,
         })
         .await
         .map_err(|_| EarError::ConnectionClosed)?;

      time::timeout(WRITE_TIMEOUT, rx)
         .await
         .map_err(|_| EarError::RequestTimeout)?
         .map_err(|_| EarError::ConnectionClosed)?
   }
}

/// An open link. Dropping it stops the I/O tasks and closes the socket.
pub struct Link {
   pub rx: FrameReceiver,
   pub tx: FrameSender,
   tasks: JoinSet<()>,
}

impl Link {
   pub(crate) const fn new(rx: FrameReceiver, tx: FrameSender, tasks: JoinSet<()>) -> Self {
      Self { rx, tx, tasks }
   }
}

impl Drop for Link {
   fn drop(&mut self) {
      self.tasks.abort_all();
   }
}

/// Opens links to a device. Implemented over RFCOMM in production and by
/// a simulated device in tests.
pub trait Connector: Send + Sync {
   fn open(&self, address: Address, channel: u8) -> BoxFuture<'_, Result<Link>>;
}

/// Connects over a BlueZ RFCOMM socket.
#[derive(Debug, Clone, Copy)]
pub struct RfcommConnector {
   connect_timeout: Duration,
}

impl RfcommConnector {
   pub const fn new(connect_timeout: Duration) -> Self {
      Self { connect_timeout }
   }
}

impl Connector for RfcommConnector {
   fn open(&self, address: Address, channel: u8) -> BoxFuture<'_, Result<Link>> {
      Box::pin(connect(address, channel, self.connect_timeout))
   }
}

pub async fn connect(address: Address, channel: u8, timeout: Duration) -> Result<Link> {
   debug!("Connecting to {address} channel {channel}");

   let stream = time::timeout(timeout, Stream::connect(SocketAddr::new(address, channel)))
      .await
      .map_err(|_| EarError::RequestTimeout)??;
   let (reader, writer) = stream.into_split();

   let (cmd_tx, cmd_rx) = mpsc::channel(32);
   let (in_tx, in_rx) = mpsc::channel(128);

   let mut tasks = JoinSet::new();
   tasks.spawn(recv_thread(address, in_tx, reader));
   tasks.spawn(send_thread(address, cmd_rx, writer));

   Ok(Link::new(
      FrameReceiver::new(in_rx),
      FrameSender::new(cmd_tx),
      tasks,
   ))
}

async fn recv_thread(
   adr: Address,
   tx: mpsc::Sender<Result<Frame>>,
   mut reader: stream::OwnedReadHalf,
) {
   let mut frames = FrameBuffer::new();
   let mut chunk = [0u8; READ_CHUNK];
   loop {
      let n = match reader.read(&mut chunk).await {
         Ok(0) => {
            warn!("Connection lost");
            let _ = tx.send(Err(EarError::ConnectionLost)).await;
            return;
         },
         Ok(n) => n,
         Err(e) => {
            warn!("Read failed: {e}");
            let _ = tx.send(Err(EarError::Io(e))).await;
            return;
         },
      };
      debug!("← {adr}: {}", hex::encode(&chunk[..n]));
      frames.extend(&chunk[..n]);

      while let Some(frame) = frames.next_frame() {
         if let Err(e) = tx.send(frame.map_err(EarError::from)).await {
            warn!("Failed to deliver frame: {e:?}");
            return;
         }
      }
   }
}

async fn send_thread(
   adr: Address,
   mut rx: mpsc::Receiver<LinkCommand>,
   mut writer: stream::OwnedWriteHalf,
) {
   while let Some(cmd) = rx.recv().await {
      match cmd {
         LinkCommand::Send { data, then } => {
            debug!("→ {adr}: {}", hex::encode(&data));
            let written = match writer.write_all(&data).await {
               Ok(()) => writer.flush().await,
               Err(e) => Err(e),
            };
            if let Err(e) = written {
               warn!("Failed to send data: {e}");
               let _ = then.send(Err(EarError::Io(e)));
            } else {
               _ = then.send(Ok(()));
            }
         },
      }
   }
   debug!("Link to {adr} shut down");
}
