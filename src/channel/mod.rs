//! Local datagram channel carrying administrator commands.
//!
//! The channel lives in the Linux abstract socket namespace, so it has no
//! filesystem presence and is reachable only by name. Every datagram arrives
//! with kernel-verified sender credentials and, optionally, one passed file
//! descriptor.

use std::{fmt, io, mem};

#[cfg(target_os = "linux")]
mod unix;

#[cfg(target_os = "linux")]
pub use unix::*;

/// Longest abstract name: `sun_path` minus the leading NUL.
pub const MAX_NAME_LEN: usize = 107;

/// The only user allowed to issue commands.
pub const ADMIN_UID: u32 = 0;

/// Errors that can occur while setting up or using the channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
   #[error("channel name must be 1..={MAX_NAME_LEN} bytes, got {0}")]
   InvalidName(usize),

   #[error("failed to open socket: {0}")]
   Open(#[source] io::Error),

   #[error("failed to bind: {0}")]
   Bind(#[source] io::Error),

   #[error("failed to enable credential passing: {0}")]
   PassCred(#[source] io::Error),

   #[error("failed to register with the runtime: {0}")]
   Register(#[source] io::Error),

   #[error("failed to send: {0}")]
   Send(#[source] io::Error),

   #[error("failed to receive: {0}")]
   Recv(#[source] io::Error),

   #[error("no reply from server")]
   Timeout,
}

/// Sender identity as reported by the kernel, never by the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
   pub pid: i32,
   pub uid: u32,
   pub gid: u32,
}

impl PeerCredentials {
   pub const fn is_admin(&self) -> bool {
      self.uid == ADMIN_UID
   }
}

/// A socket address in the abstract namespace, or the (possibly unnamed)
/// address a datagram came from.
#[derive(Clone, Copy)]
pub struct Address {
   addr: libc::sockaddr_un,
   len:  libc::socklen_t,
}

impl Address {
   const PATH_OFFSET: usize = mem::offset_of!(libc::sockaddr_un, sun_path);

   fn zeroed() -> Self {
      // SAFETY: sockaddr_un is plain old data; all zeroes is a valid value.
      let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
      addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
      Self { addr, len: mem::size_of::<libc::sockaddr_un>() as libc::socklen_t }
   }

   /// Builds the address for `name` in the abstract namespace.
   pub fn abstract_name(name: &str) -> Result<Self, ChannelError> {
      let bytes = name.as_bytes();
      if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
         return Err(ChannelError::InvalidName(bytes.len()));
      }
      let mut out = Self::zeroed();
      for (dst, &src) in out.addr.sun_path[1..].iter_mut().zip(bytes) {
         *dst = src as libc::c_char;
      }
      out.len = (Self::PATH_OFFSET + 1 + bytes.len()) as libc::socklen_t;
      Ok(out)
   }

   /// Binding to this address asks the kernel for a unique abstract name.
   fn autobind() -> Self {
      let mut out = Self::zeroed();
      out.len = mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
      out
   }

   pub const fn is_unnamed(&self) -> bool {
      (self.len as usize) <= Self::PATH_OFFSET
   }

   /// Printable name; abstract names are shown with a leading `@`.
   pub fn name(&self) -> String {
      if self.is_unnamed() {
         return String::from("(unnamed)");
      }
      let end = (self.len as usize - Self::PATH_OFFSET).min(self.addr.sun_path.len());
      let raw: Vec<u8> = self.addr.sun_path[..end].iter().map(|&c| c as u8).collect();
      match raw.split_first() {
         Some((0, rest)) => format!("@{}", String::from_utf8_lossy(rest)),
         _ => String::from_utf8_lossy(&raw).into_owned(),
      }
   }

   fn as_ptr(&self) -> *const libc::sockaddr {
      (&raw const self.addr).cast()
   }
}

impl fmt::Debug for Address {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_tuple("Address").field(&self.name()).finish()
   }
}
