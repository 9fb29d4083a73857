//! One-shot administrator commands sent to a running daemon.

use std::{
   fs::File,
   io,
   os::fd::AsFd,
   path::PathBuf,
};

use console::style;

use crate::{
   Result,
   channel::{self, ChannelError},
   config,
   error::Error,
   ipc::{Command, CommandMessage, STATUS_OK},
};

/// Sends `command` for `path`. `Migrate` also passes an open descriptor of
/// the file so the daemon reads exactly what the caller sees.
pub fn execute(command: Command, path: Option<PathBuf>) -> Result<()> {
   let cfg = config::get();
   let path = path.map(std::path::absolute).transpose()?;

   let source = match (command, path.as_deref()) {
      (Command::Migrate, Some(path)) => Some(File::open(path)?),
      _ => None,
   };
   let message = CommandMessage::new(command, path.as_deref());

   let status = channel::send_command(
      &cfg.socket_name,
      &message,
      source.as_ref().map(AsFd::as_fd),
      cfg.reply_timeout(),
   )?
   .ok_or(ChannelError::Timeout)?;

   let subject = path
      .as_deref()
      .map_or_else(|| "dredger".to_string(), |p| p.display().to_string());
   if status == STATUS_OK {
      println!("{} {subject}", style("ok").green());
      return Ok(());
   }

   let message = format!("{subject}: {}", io::Error::from_raw_os_error(status.into()));
   eprintln!("{}", style(&message).red());
   Err(Error::Reported { message, exit_code: status.into() })
}
