use std::io;

use thiserror::Error;

use crate::{channel::ChannelError, schedule::ScheduleError};

/// Main error type for the dredger daemon and trawler.
///
/// Per-request failures inside the command server never surface here; they
/// are folded into a reply status. This type covers startup, configuration,
/// client-side and walk-level failures.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or socket operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// Command channel setup or transfer failed.
   #[error("channel error: {0}")]
   Channel(#[from] ChannelError),

   /// A command message could not be encoded.
   #[error("protocol error: {0}")]
   Protocol(#[from] ProtocolError),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// Relative time specification could not be turned into an interval.
   #[error("schedule error: {0}")]
   Schedule(#[from] ScheduleError),

   /// File watch backend error.
   #[error("watch error: {0}")]
   Watch(#[from] notify::Error),

   /// Server error occurred during a specific operation.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },

   /// Error already reported to the user (e.g., a non-zero reply status).
   #[error("{message}")]
   Reported { message: String, exit_code: i32 },
}

impl Error {
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::Reported { exit_code, .. } => *exit_code,
         Self::Io(e) => e.raw_os_error().unwrap_or(1),
         Self::Channel(ChannelError::Timeout) => libc::ETIMEDOUT,
         Self::Protocol(_) | Self::Schedule(_) => libc::EINVAL,
         _ => 1,
      }
   }
}

/// Errors raised while encoding a command message for the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
   /// The path does not fit into a single command datagram.
   #[error("path too long: {len} bytes (max {max})")]
   PathTooLong { len: usize, max: usize },

   /// The path contains a NUL byte and cannot be NUL-terminated.
   #[error("path contains an interior NUL byte")]
   InteriorNul,
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// A configuration value is out of range or malformed.
   #[error("invalid config value for {key}: {reason}")]
   InvalidValue { key: &'static str, reason: String },
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
