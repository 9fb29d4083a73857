//! Command server: receives administrator commands over the credential
//! channel and dispatches them one at a time.

mod dispatch;

use std::{
   os::fd::{AsFd, OwnedFd},
   sync::Arc,
};

pub use dispatch::{Dispatcher, Verdict};
use tokio::{io::unix::AsyncFd, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   channel::{Channel, ChannelError, Received},
   error::Error,
   ipc::CommandMessage,
};

pub struct CommandServer;

impl CommandServer {
   /// Opens the channel called `name` and spawns the dispatch loop.
   ///
   /// Must be called from within a tokio runtime. On error nothing is left
   /// running and the socket is closed.
   pub fn start(name: &str, dispatcher: Dispatcher) -> Result<ServerHandle> {
      let channel = Channel::open(name)?;
      let channel = AsyncFd::new(channel).map_err(ChannelError::Register)?;

      let cancel = CancellationToken::new();
      let task = tokio::spawn(serve(channel, Arc::new(dispatcher), cancel.clone()));
      tracing::info!("Command server listening on @{name}");

      Ok(ServerHandle { name: name.to_string(), cancel, task: Some(task) })
   }
}

/// Owner-side handle of a running command server. Dropping it cancels the
/// loop without waiting for it.
#[derive(Debug)]
pub struct ServerHandle {
   name:   String,
   cancel: CancellationToken,
   task:   Option<JoinHandle<()>>,
}

impl ServerHandle {
   pub fn name(&self) -> &str {
      &self.name
   }

   /// True once the loop has exited, e.g. after a `Shutdown` command.
   pub fn is_finished(&self) -> bool {
      self.task.as_ref().is_none_or(JoinHandle::is_finished)
   }

   /// Cancels the loop and waits until it has exited and the channel is
   /// closed. Safe to call while the loop is idle in receive.
   pub async fn stop(mut self) -> Result<()> {
      self.cancel.cancel();
      self.join().await
   }

   /// Waits for the loop to exit on its own.
   pub async fn wait(mut self) -> Result<()> {
      self.join().await
   }

   async fn join(&mut self) -> Result<()> {
      match self.task.take() {
         Some(task) => task
            .await
            .map_err(|e| Error::Server { op: "stop", reason: e.to_string() }),
         None => Ok(()),
      }
   }
}

impl Drop for ServerHandle {
   fn drop(&mut self) {
      self.cancel.cancel();
   }
}

/// Logs teardown on every exit path of the loop, cancellation included.
struct ServerState {
   name: String,
}

impl Drop for ServerState {
   fn drop(&mut self) {
      tracing::info!("Shutdown command server @{}", self.name);
   }
}

async fn serve(channel: AsyncFd<Channel>, dispatcher: Arc<Dispatcher>, cancel: CancellationToken) {
   let _state = ServerState { name: channel.get_ref().name().to_string() };

   loop {
      let received = tokio::select! {
         () = cancel.cancelled() => break,
         ready = channel.readable() => {
            let mut guard = match ready {
               Ok(guard) => guard,
               Err(e) => {
                  tracing::error!("Command channel poll failed: {e}");
                  continue;
               },
            };
            match guard.try_io(|inner| inner.get_ref().recv()) {
               Ok(Ok(received)) => received,
               Ok(Err(e)) => {
                  if e.kind() != std::io::ErrorKind::Interrupted {
                     tracing::warn!("Receive failed: {e}");
                  }
                  continue;
               },
               Err(_would_block) => continue,
            }
         }
      };

      if handle(&channel, &dispatcher, received).await == Verdict::Shutdown {
         break;
      }
   }
}

async fn handle(channel: &AsyncFd<Channel>, dispatcher: &Arc<Dispatcher>, received: Received) -> Verdict {
   let Received { datagram, peer, fd, origin } = received;
   let message = CommandMessage::decode(&datagram);

   let worker = Arc::clone(dispatcher);
   let outcome = tokio::task::spawn_blocking(move || {
      let verdict = worker.dispatch(&message, peer.as_ref(), fd.as_ref().map(AsFd::as_fd));
      (verdict, fd)
   })
   .await;
   let (verdict, fd): (Verdict, Option<OwnedFd>) = match outcome {
      Ok(outcome) => outcome,
      Err(e) => {
         tracing::error!("Dispatch failed: {e}");
         (Verdict::Reply(libc::EIO as u8), None)
      },
   };

   if let Some(status) = verdict.status()
      && let Err(e) = channel.get_ref().reply(&origin, status)
   {
      tracing::error!("Reply to {} failed: {e}", origin.name());
   }
   drop(fd);
   verdict
}
