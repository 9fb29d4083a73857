//! fanotify-based access monitor.

use std::{
   ffi::CString,
   io,
   os::{
      fd::{AsRawFd, FromRawFd, OwnedFd},
      unix::ffi::OsStrExt,
   },
   path::Path,
};

use super::AccessMonitor;

/// A fanotify notification group; `monitor` adds per-file marks to it.
#[derive(Debug)]
pub struct FanotifyMonitor {
   fd: OwnedFd,
}

impl FanotifyMonitor {
   /// Creates the notification group. Needs `CAP_SYS_ADMIN`.
   pub fn open() -> io::Result<Self> {
      let flags = (libc::FAN_CLOEXEC | libc::FAN_NONBLOCK | libc::FAN_CLASS_NOTIF) as libc::c_uint;
      let event_flags = (libc::O_RDONLY | libc::O_LARGEFILE | libc::O_CLOEXEC) as libc::c_uint;
      // SAFETY: plain syscall; the result is checked before use.
      let raw = unsafe { libc::fanotify_init(flags, event_flags) };
      if raw < 0 {
         return Err(io::Error::last_os_error());
      }
      // SAFETY: `raw` is a freshly created descriptor nobody else owns.
      Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(raw) } })
   }
}

impl AccessMonitor for FanotifyMonitor {
   fn monitor(&self, path: &Path) -> io::Result<()> {
      let cpath = CString::new(path.as_os_str().as_bytes())
         .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
      let mask = (libc::FAN_OPEN | libc::FAN_ACCESS) as u64;
      // SAFETY: `cpath` is a valid NUL-terminated string for the call.
      let rc = unsafe {
         libc::fanotify_mark(
            self.fd.as_raw_fd(),
            libc::FAN_MARK_ADD as libc::c_uint,
            mask,
            libc::AT_FDCWD,
            cpath.as_ptr(),
         )
      };
      if rc < 0 {
         return Err(io::Error::last_os_error());
      }
      tracing::info!("Monitoring '{}'", path.display());
      Ok(())
   }
}
