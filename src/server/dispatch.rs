//! Per-request command handling.

use std::{os::fd::BorrowedFd, path::Path, sync::Arc};

use crate::{
   backend::{AccessMonitor, Backend, CheckState, status_code},
   channel::PeerCredentials,
   ipc::{Command, CommandMessage, STATUS_OK},
   supervisor::ExitSignal,
};

/// What the server loop does after a request has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
   /// Unauthorized sender: no reply.
   Dropped,
   Reply(u8),
   /// Reply with success, then leave the loop.
   Shutdown,
}

impl Verdict {
   pub const fn status(self) -> Option<u8> {
      match self {
         Self::Dropped => None,
         Self::Reply(status) => Some(status),
         Self::Shutdown => Some(STATUS_OK),
      }
   }
}

pub struct Dispatcher {
   backend: Arc<dyn Backend>,
   monitor: Arc<dyn AccessMonitor>,
   exit:    ExitSignal,
}

impl Dispatcher {
   pub fn new(backend: Arc<dyn Backend>, monitor: Arc<dyn AccessMonitor>, exit: ExitSignal) -> Self {
      Self { backend, monitor, exit }
   }

   /// Handles one request. `source` is the descriptor passed alongside the
   /// message, if any; the caller keeps ownership and closes it afterwards.
   pub fn dispatch(
      &self,
      message: &CommandMessage,
      peer: Option<&PeerCredentials>,
      source: Option<BorrowedFd<'_>>,
   ) -> Verdict {
      match peer {
         Some(peer) if peer.is_admin() => {},
         Some(peer) => {
            tracing::warn!("Dropping command from unauthorized uid {} (pid {})", peer.uid, peer.pid);
            return Verdict::Dropped;
         },
         None => {
            tracing::warn!("Dropping command without sender credentials");
            return Verdict::Dropped;
         },
      }

      let command = message.effective_command();
      let path = message.path.as_deref().unwrap_or(Path::new(""));
      match command {
         Command::NoFile => Verdict::Reply(libc::EINVAL as u8),
         Command::Shutdown => {
            self.exit.trigger("shutdown command");
            Verdict::Shutdown
         },
         Command::Migrate => self.migrate(path, source),
         Command::Check => self.check(path),
         Command::Monitor => match self.monitor.monitor(path) {
            Ok(()) => Verdict::Reply(STATUS_OK),
            Err(e) => {
               tracing::error!("{}: monitor failed: {e}", path.display());
               Verdict::Reply(status_code(&e))
            },
         },
         Command::Setup => self.migrate(path, None),
         Command::Unknown(tag) => {
            tracing::error!("Invalid command {tag}");
            Verdict::Reply(libc::EINVAL as u8)
         },
      }
   }

   fn migrate(&self, path: &Path, source: Option<BorrowedFd<'_>>) -> Verdict {
      match self.backend.migrate(path, source) {
         Ok(()) => Verdict::Reply(STATUS_OK),
         Err(e) => {
            tracing::error!("{}: migrate failed: {e}", path.display());
            Verdict::Reply(status_code(&e))
         },
      }
   }

   fn check(&self, path: &Path) -> Verdict {
      match self.backend.check(path) {
         Ok(CheckState::NeedsMigration) => Verdict::Reply(STATUS_OK),
         Ok(CheckState::UpToDate) => Verdict::Reply(libc::EALREADY as u8),
         Err(e) => {
            tracing::error!("{}: check failed: {e}", path.display());
            Verdict::Reply(status_code(&e))
         },
      }
   }
}
