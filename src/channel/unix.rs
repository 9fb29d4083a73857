//! `AF_UNIX` datagram implementation with credential and descriptor passing

use std::{
   io, mem,
   os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
   ptr,
   time::Duration,
};

use super::{Address, ChannelError, PeerCredentials};
use crate::{
   Result,
   ipc::{CommandMessage, MESSAGE_SIZE, decode_reply},
};

/// Descriptors accepted per datagram; any beyond the first are closed.
const MAX_PASSED_FDS: usize = 4;

/// Server side of the command channel.
#[derive(Debug)]
pub struct Channel {
   fd:   OwnedFd,
   name: String,
}

/// One datagram together with its out-of-band data.
#[derive(Debug)]
pub struct Received {
   pub datagram: Vec<u8>,
   pub peer:     Option<PeerCredentials>,
   pub fd:       Option<OwnedFd>,
   pub origin:   Address,
}

impl Channel {
   /// Binds a non-blocking datagram socket to `name` in the abstract
   /// namespace and enables `SO_PASSCRED`.
   pub fn open(name: &str) -> Result<Self, ChannelError> {
      let addr = Address::abstract_name(name)?;
      let fd = socket(libc::SOCK_NONBLOCK).map_err(ChannelError::Open)?;

      // SAFETY: `addr` is a valid sockaddr_un of `addr.len` bytes.
      if unsafe { libc::bind(fd.as_raw_fd(), addr.as_ptr(), addr.len) } < 0 {
         return Err(ChannelError::Bind(io::Error::last_os_error()));
      }

      let on: libc::c_int = 1;
      // SAFETY: the option value points at a live c_int of the given size.
      let rc = unsafe {
         libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PASSCRED,
            (&raw const on).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
         )
      };
      if rc < 0 {
         return Err(ChannelError::PassCred(io::Error::last_os_error()));
      }

      Ok(Self { fd, name: name.to_string() })
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   /// Receives one datagram. Returns `WouldBlock` when nothing is queued.
   pub fn recv(&self) -> io::Result<Received> {
      let mut buf = [0u8; MESSAGE_SIZE];
      let mut origin = Address::zeroed();
      let mut control = ControlBuffer::new(recv_control_len());

      let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() };
      // SAFETY: msghdr is plain old data; all zeroes is a valid value.
      let mut msg: libc::msghdr = unsafe { mem::zeroed() };
      msg.msg_name = (&raw mut origin.addr).cast();
      msg.msg_namelen = origin.len;
      msg.msg_iov = &raw mut iov;
      msg.msg_iovlen = 1;
      msg.msg_control = control.as_mut_ptr();
      msg.msg_controllen = control.len() as _;

      // SAFETY: every pointer in `msg` refers to a live buffer of the
      // advertised length for the duration of the call.
      let n = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &raw mut msg, libc::MSG_CMSG_CLOEXEC) };
      if n < 0 {
         return Err(io::Error::last_os_error());
      }
      origin.len = msg.msg_namelen;

      // SAFETY: the kernel filled `msg_control` with `msg_controllen` bytes
      // of well-formed control messages.
      let (peer, mut fds) = unsafe { take_control(&msg) };
      if msg.msg_flags & libc::MSG_CTRUNC != 0 {
         tracing::warn!("control data from {} truncated", origin.name());
      }
      if msg.msg_flags & libc::MSG_TRUNC != 0 {
         tracing::warn!("oversized datagram from {} truncated", origin.name());
      }
      if fds.len() > 1 {
         tracing::warn!("{} passed {} descriptors, keeping one", origin.name(), fds.len());
      }
      let fd = (!fds.is_empty()).then(|| fds.swap_remove(0));

      Ok(Received { datagram: buf[..n as usize].to_vec(), peer, fd, origin })
   }

   /// Sends the one-byte status reply to `to`.
   pub fn reply(&self, to: &Address, status: u8) -> io::Result<()> {
      if to.is_unnamed() {
         return Err(io::Error::new(io::ErrorKind::NotConnected, "peer is unnamed"));
      }
      let byte = [status];
      // SAFETY: `byte` and `to` outlive the call and have the given lengths.
      let n = unsafe {
         libc::sendto(
            self.fd.as_raw_fd(),
            byte.as_ptr().cast(),
            byte.len(),
            libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
            to.as_ptr(),
            to.len,
         )
      };
      if n < 0 {
         return Err(io::Error::last_os_error());
      }
      Ok(())
   }
}

impl AsRawFd for Channel {
   fn as_raw_fd(&self) -> RawFd {
      self.fd.as_raw_fd()
   }
}

impl AsFd for Channel {
   fn as_fd(&self) -> BorrowedFd<'_> {
      self.fd.as_fd()
   }
}

/// Sends `message` to the channel called `name`, optionally passing `fd`, and
/// waits up to `timeout` for the status reply.
///
/// Returns `Ok(None)` when no reply arrives in time; the server stays silent
/// towards senders it does not trust.
pub fn send_command(
   name: &str,
   message: &CommandMessage,
   fd: Option<BorrowedFd<'_>>,
   timeout: Duration,
) -> Result<Option<u8>> {
   let payload = message.encode()?;
   let server = Address::abstract_name(name)?;
   let sock = socket(0).map_err(ChannelError::Open)?;

   let local = Address::autobind();
   // SAFETY: `local` is a valid sockaddr_un prefix of `local.len` bytes.
   if unsafe { libc::bind(sock.as_raw_fd(), local.as_ptr(), local.len) } < 0 {
      return Err(ChannelError::Bind(io::Error::last_os_error()).into());
   }

   send_datagram(&sock, &server, &payload, fd).map_err(ChannelError::Send)?;

   if !wait_readable(&sock, timeout).map_err(ChannelError::Recv)? {
      return Ok(None);
   }
   let mut reply = [0u8; 16];
   // SAFETY: `reply` is a live buffer of the given length.
   let n = unsafe { libc::recv(sock.as_raw_fd(), reply.as_mut_ptr().cast(), reply.len(), 0) };
   if n < 0 {
      return Err(ChannelError::Recv(io::Error::last_os_error()).into());
   }
   Ok(Some(decode_reply(&reply[..n as usize])))
}

fn socket(flags: libc::c_int) -> io::Result<OwnedFd> {
   // SAFETY: plain syscall; the result is checked before use.
   let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | flags, 0) };
   if raw < 0 {
      return Err(io::Error::last_os_error());
   }
   // SAFETY: `raw` is a freshly created descriptor nobody else owns.
   Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn send_datagram(
   sock: &OwnedFd,
   to: &Address,
   payload: &[u8],
   fd: Option<BorrowedFd<'_>>,
) -> io::Result<()> {
   let mut iov = libc::iovec { iov_base: payload.as_ptr().cast_mut().cast(), iov_len: payload.len() };
   // SAFETY: msghdr is plain old data; all zeroes is a valid value.
   let mut msg: libc::msghdr = unsafe { mem::zeroed() };
   msg.msg_name = to.as_ptr().cast_mut().cast();
   msg.msg_namelen = to.len;
   msg.msg_iov = &raw mut iov;
   msg.msg_iovlen = 1;

   let fd_len = mem::size_of::<libc::c_int>() as libc::c_uint;
   // SAFETY: CMSG_SPACE is pure arithmetic.
   let space = unsafe { libc::CMSG_SPACE(fd_len) } as usize;
   let mut control = ControlBuffer::new(if fd.is_some() { space } else { 0 });
   if let Some(fd) = fd {
      msg.msg_control = control.as_mut_ptr();
      msg.msg_controllen = control.len() as _;
      // SAFETY: the control buffer is aligned and large enough for one
      // SCM_RIGHTS message carrying a single descriptor.
      unsafe {
         let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
         (*cmsg).cmsg_level = libc::SOL_SOCKET;
         (*cmsg).cmsg_type = libc::SCM_RIGHTS;
         (*cmsg).cmsg_len = libc::CMSG_LEN(fd_len) as _;
         ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>(), fd.as_raw_fd());
      }
   }

   // SAFETY: all buffers referenced by `msg` are alive for the call.
   let n = unsafe { libc::sendmsg(sock.as_raw_fd(), &raw const msg, libc::MSG_NOSIGNAL) };
   if n < 0 {
      return Err(io::Error::last_os_error());
   }
   Ok(())
}

fn wait_readable(sock: &OwnedFd, timeout: Duration) -> io::Result<bool> {
   let mut pfd = libc::pollfd { fd: sock.as_raw_fd(), events: libc::POLLIN, revents: 0 };
   let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
   loop {
      // SAFETY: `pfd` is a single live pollfd.
      let rc = unsafe { libc::poll(&raw mut pfd, 1, millis) };
      if rc < 0 {
         let err = io::Error::last_os_error();
         if err.kind() == io::ErrorKind::Interrupted {
            continue;
         }
         return Err(err);
      }
      return Ok(rc > 0);
   }
}

fn recv_control_len() -> usize {
   let cred_len = mem::size_of::<libc::ucred>() as libc::c_uint;
   let fds_len = (MAX_PASSED_FDS * mem::size_of::<libc::c_int>()) as libc::c_uint;
   // SAFETY: CMSG_SPACE is pure arithmetic.
   unsafe { (libc::CMSG_SPACE(cred_len) + libc::CMSG_SPACE(fds_len)) as usize }
}

/// Walks the control messages of a received `msghdr`, taking ownership of
/// every passed descriptor so none can leak.
///
/// # Safety
///
/// `msg` must describe a buffer just filled by `recvmsg`.
unsafe fn take_control(msg: &libc::msghdr) -> (Option<PeerCredentials>, Vec<OwnedFd>) {
   let mut peer = None;
   let mut fds = Vec::new();

   // SAFETY: guaranteed by the caller.
   let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
   while !cmsg.is_null() {
      // SAFETY: non-null headers returned by CMSG_FIRSTHDR/CMSG_NXTHDR lie
      // within the control buffer.
      let (hdr, data, header_len) =
         unsafe { (&*cmsg, libc::CMSG_DATA(cmsg), libc::CMSG_LEN(0) as usize) };
      let payload = (hdr.cmsg_len as usize).saturating_sub(header_len);

      if hdr.cmsg_level == libc::SOL_SOCKET {
         match hdr.cmsg_type {
            libc::SCM_CREDENTIALS if payload >= mem::size_of::<libc::ucred>() => {
               // SAFETY: the payload holds a whole ucred.
               let cred: libc::ucred = unsafe { ptr::read_unaligned(data.cast()) };
               peer = Some(PeerCredentials { pid: cred.pid, uid: cred.uid, gid: cred.gid });
            },
            libc::SCM_RIGHTS => {
               for i in 0..payload / mem::size_of::<libc::c_int>() {
                  // SAFETY: each slot holds a descriptor installed for us by
                  // the kernel; wrapping it makes this process its owner.
                  let fd = unsafe {
                     let raw = ptr::read_unaligned(data.cast::<libc::c_int>().add(i));
                     OwnedFd::from_raw_fd(raw)
                  };
                  fds.push(fd);
               }
            },
            _ => {},
         }
      }

      // SAFETY: `cmsg` is a valid header within `msg`'s control buffer.
      cmsg = unsafe { libc::CMSG_NXTHDR(msg, cmsg) };
   }

   (peer, fds)
}

/// Control message storage with `cmsghdr` alignment.
struct ControlBuffer {
   words: Vec<u64>,
   len:   usize,
}

impl ControlBuffer {
   fn new(len: usize) -> Self {
      Self { words: vec![0; len.div_ceil(mem::size_of::<u64>())], len }
   }

   fn as_mut_ptr(&mut self) -> *mut libc::c_void {
      self.words.as_mut_ptr().cast()
   }

   const fn len(&self) -> usize {
      self.len
   }
}
