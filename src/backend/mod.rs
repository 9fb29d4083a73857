//! Storage backend and access interception contracts used by the command
//! server.

use std::{io, os::fd::BorrowedFd, path::Path};

mod fanotify;
mod local;

pub use fanotify::FanotifyMonitor;
pub use local::LocalBackend;

/// Result of comparing a file against its migrated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
   NeedsMigration,
   UpToDate,
}

/// Storage tier that migrated file data is moved to.
pub trait Backend: Send + Sync {
   /// Migrates `path`. When `source` is present the data is read from that
   /// descriptor instead of reopening the path.
   fn migrate(&self, path: &Path, source: Option<BorrowedFd<'_>>) -> io::Result<()>;

   /// Reports whether `path` needs to be migrated again.
   fn check(&self, path: &Path) -> io::Result<CheckState>;
}

/// Marks files so that later accesses can trigger on-demand migration.
pub trait AccessMonitor: Send + Sync {
   fn monitor(&self, path: &Path) -> io::Result<()>;
}

/// Maps a collaborator error onto the one-byte reply status.
pub fn status_code(err: &io::Error) -> u8 {
   err.raw_os_error()
      .and_then(|code| u8::try_from(code.unsigned_abs()).ok())
      .filter(|&code| code != 0)
      .unwrap_or(libc::EIO as u8)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn os_errors_map_to_their_errno() {
      assert_eq!(status_code(&io::Error::from_raw_os_error(libc::ENOENT)), libc::ENOENT as u8);
      assert_eq!(status_code(&io::Error::from_raw_os_error(-libc::EACCES)), libc::EACCES as u8);
   }

   #[test]
   fn unmappable_errors_become_eio() {
      assert_eq!(status_code(&io::Error::other("boom")), libc::EIO as u8);
      assert_eq!(status_code(&io::Error::from_raw_os_error(0)), libc::EIO as u8);
      assert_eq!(status_code(&io::Error::from_raw_os_error(4096)), libc::EIO as u8);
   }
}
