//! Command datagram format shared by the command server and its clients.
//!
//! A datagram is at most [`MESSAGE_SIZE`] bytes: byte 0 carries the command
//! tag and the remaining bytes a NUL-terminated path. The reply is a single
//! status byte, `0` on success or an errno value otherwise.

use std::{
   ffi::OsStr,
   os::unix::ffi::OsStrExt,
   path::{Path, PathBuf},
};

use crate::error::ProtocolError;

/// Size of the receive buffer and upper bound of an encoded command.
pub const MESSAGE_SIZE: usize = 1024;

/// Longest path that fits behind the tag byte with its terminating NUL.
pub const MAX_PATH_BYTES: usize = MESSAGE_SIZE - 2;

/// Reply status for success.
pub const STATUS_OK: u8 = 0;

/// Commands understood by the command server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
   NoFile,
   Shutdown,
   Migrate,
   Check,
   Monitor,
   Setup,
   Unknown(u8),
}

impl Command {
   pub const fn tag(self) -> u8 {
      match self {
         Self::NoFile => 0,
         Self::Shutdown => 1,
         Self::Migrate => 2,
         Self::Check => 3,
         Self::Monitor => 4,
         Self::Setup => 5,
         Self::Unknown(tag) => tag,
      }
   }

   /// Every command except `Shutdown` operates on a path.
   pub const fn needs_path(self) -> bool {
      !matches!(self, Self::Shutdown)
   }
}

impl From<u8> for Command {
   fn from(tag: u8) -> Self {
      match tag {
         0 => Self::NoFile,
         1 => Self::Shutdown,
         2 => Self::Migrate,
         3 => Self::Check,
         4 => Self::Monitor,
         5 => Self::Setup,
         other => Self::Unknown(other),
      }
   }
}

/// A decoded command datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
   pub command: Command,
   pub path:    Option<PathBuf>,
}

impl CommandMessage {
   pub fn new(command: Command, path: Option<&Path>) -> Self {
      Self { command, path: path.map(Path::to_path_buf) }
   }

   pub const fn shutdown() -> Self {
      Self { command: Command::Shutdown, path: None }
   }

   /// Decodes a received datagram. An empty datagram decodes as `NoFile`.
   pub fn decode(datagram: &[u8]) -> Self {
      let Some((&tag, rest)) = datagram.split_first() else {
         return Self { command: Command::NoFile, path: None };
      };
      let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
      let path = (end > 0).then(|| PathBuf::from(OsStr::from_bytes(&rest[..end])));
      Self { command: Command::from(tag), path }
   }

   pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
      let path = self
         .path
         .as_deref()
         .map(|p| p.as_os_str().as_bytes())
         .unwrap_or_default();
      if path.len() > MAX_PATH_BYTES {
         return Err(ProtocolError::PathTooLong { len: path.len(), max: MAX_PATH_BYTES });
      }
      if path.contains(&0) {
         return Err(ProtocolError::InteriorNul);
      }

      let mut out = Vec::with_capacity(path.len() + 2);
      out.push(self.command.tag());
      out.extend_from_slice(path);
      out.push(0);
      Ok(out)
   }

   /// The command that will actually run: path-bound commands without a path
   /// degrade to `NoFile`.
   pub fn effective_command(&self) -> Command {
      let has_path = self
         .path
         .as_deref()
         .is_some_and(|p| !p.as_os_str().is_empty());
      if self.command.needs_path() && !has_path {
         Command::NoFile
      } else {
         self.command
      }
   }
}

/// Decodes a reply datagram. A zero-length reply counts as success.
pub fn decode_reply(datagram: &[u8]) -> u8 {
   datagram.first().copied().unwrap_or(STATUS_OK)
}
