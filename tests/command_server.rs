use std::{
   os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd},
   path::{Path, PathBuf},
   sync::Arc,
   time::Duration,
};

use dredger::{
   backend::CheckState,
   channel::{self, Channel},
   ipc::{Command, CommandMessage},
   server::{CommandServer, Dispatcher, ServerHandle},
   supervisor::ExitSignal,
};
use support::{RecordingBackend, RecordingMonitor};

mod support;

const NO_REPLY_WAIT: Duration = Duration::from_millis(300);
const REPLY_WAIT: Duration = Duration::from_secs(5);

struct Fixture {
   name:    String,
   backend: Arc<RecordingBackend>,
   monitor: Arc<RecordingMonitor>,
   exit:    ExitSignal,
   handle:  ServerHandle,
}

fn start(tag: &str, backend: RecordingBackend) -> Fixture {
   let name = support::unique_name(tag);
   let backend = Arc::new(backend);
   let monitor = Arc::new(RecordingMonitor::default());
   let exit = ExitSignal::new();
   let dispatcher = Dispatcher::new(backend.clone(), monitor.clone(), exit.clone());
   let handle = CommandServer::start(&name, dispatcher).expect("start server");
   Fixture { name, backend, monitor, exit, handle }
}

async fn send(name: &str, message: CommandMessage, fd: Option<OwnedFd>) -> Option<u8> {
   let name = name.to_string();
   let timeout = if support::is_root() { REPLY_WAIT } else { NO_REPLY_WAIT };
   tokio::task::spawn_blocking(move || {
      channel::send_command(&name, &message, fd.as_ref().map(AsFd::as_fd), timeout)
         .expect("send command")
   })
   .await
   .expect("join client")
}

fn msg(command: Command, path: &str) -> CommandMessage {
   CommandMessage::new(command, Some(Path::new(path)))
}

fn pipe() -> (OwnedFd, OwnedFd) {
   let mut fds = [0; 2];
   // SAFETY: `fds` has room for the two descriptors pipe2 writes.
   let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
   assert_eq!(rc, 0, "pipe2 failed");
   // SAFETY: both descriptors were just created and are owned by nobody else.
   unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// True once every copy of the read end has been closed.
async fn reader_gone(writer: &OwnedFd) -> bool {
   for _ in 0..100 {
      // SAFETY: one byte from a static buffer into a live descriptor.
      let n = unsafe { libc::write(writer.as_raw_fd(), b"x".as_ptr().cast(), 1) };
      if n < 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EPIPE) {
         return true;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
   }
   false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn migrate_with_descriptor() {
   let fx = start("migrate", RecordingBackend::new());
   let (reader, writer) = pipe();

   let reply = send(&fx.name, msg(Command::Migrate, "/data/a"), Some(reader)).await;

   if support::is_root() {
      assert_eq!(reply, Some(0));
      assert_eq!(fx.backend.calls(), vec![("migrate", PathBuf::from("/data/a"), true)]);
   } else {
      assert_eq!(reply, None);
      assert!(fx.backend.calls().is_empty());
   }
   assert!(reader_gone(&writer).await, "passed descriptor left open");
   fx.handle.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn descriptor_closed_on_error_branches() {
   let fx = start("fd-errors", RecordingBackend::failing(libc::EROFS));

   for message in [
      msg(Command::Migrate, "/data/a"),
      CommandMessage::new(Command::Migrate, None),
      msg(Command::Unknown(42), "/data/a"),
      msg(Command::Check, "/data/a"),
   ] {
      let (reader, writer) = pipe();
      let _ = send(&fx.name, message, Some(reader)).await;
      assert!(reader_gone(&writer).await, "passed descriptor left open");
   }
   fx.handle.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replies_follow_dispatch_rules() {
   let mut backend = RecordingBackend::new();
   backend.check = Ok(CheckState::UpToDate);
   let fx = start("rules", backend);

   let no_file = send(&fx.name, CommandMessage::new(Command::Check, None), None).await;
   let unknown = send(&fx.name, msg(Command::Unknown(9), "/data/a"), None).await;
   let check = send(&fx.name, msg(Command::Check, "/data/a"), None).await;
   let monitor = send(&fx.name, msg(Command::Monitor, "/data/a"), None).await;
   let setup = send(&fx.name, msg(Command::Setup, "/data/b"), None).await;

   if support::is_root() {
      assert_eq!(no_file, Some(libc::EINVAL as u8));
      assert_eq!(unknown, Some(libc::EINVAL as u8));
      assert_eq!(check, Some(libc::EALREADY as u8));
      assert_eq!(monitor, Some(0));
      assert_eq!(setup, Some(0));
      assert_eq!(fx.backend.calls(), vec![
         ("check", PathBuf::from("/data/a"), false),
         ("migrate", PathBuf::from("/data/b"), false),
      ]);
      assert_eq!(fx.monitor.paths.lock().clone(), vec![PathBuf::from("/data/a")]);
   } else {
      for reply in [no_file, unknown, check, monitor, setup] {
         assert_eq!(reply, None);
      }
      assert!(fx.backend.calls().is_empty());
      assert!(fx.monitor.paths.lock().is_empty());
   }
   fx.handle.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_errors_become_status() {
   let fx = start("errno", RecordingBackend::failing(libc::ENOSPC));
   let reply = send(&fx.name, msg(Command::Migrate, "/data/a"), None).await;
   if support::is_root() {
      assert_eq!(reply, Some(libc::ENOSPC as u8));
   } else {
      assert_eq!(reply, None);
   }
   fx.handle.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_command_ends_the_loop() {
   let fx = start("shutdown", RecordingBackend::new());
   let reply = send(&fx.name, CommandMessage::shutdown(), None).await;

   if support::is_root() {
      assert_eq!(reply, Some(0));
      assert!(fx.exit.is_triggered());
      tokio::time::timeout(REPLY_WAIT, fx.handle.wait())
         .await
         .expect("loop exits")
         .expect("clean exit");
      Channel::open(&fx.name).expect("channel closed after shutdown");
   } else {
      assert_eq!(reply, None);
      assert!(!fx.exit.is_triggered());
      assert!(!fx.handle.is_finished());
      fx.handle.stop().await.expect("stop");
   }
}

/// Sends `payload` from an unbound socket, bypassing the command encoder.
fn send_raw(name: &str, payload: &[u8]) {
   use std::os::{
      linux::net::SocketAddrExt,
      unix::net::{SocketAddr, UnixDatagram},
   };
   let addr = SocketAddr::from_abstract_name(name.as_bytes()).expect("abstract address");
   let socket = UnixDatagram::unbound().expect("socket");
   socket.send_to_addr(payload, &addr).expect("send datagram");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_datagrams_do_not_end_the_loop() {
   let fx = start("malformed", RecordingBackend::new());

   send_raw(&fx.name, b"");
   send_raw(&fx.name, &[0xff; 2000]);
   send_raw(&fx.name, &[Command::Migrate.tag()]);
   tokio::time::sleep(Duration::from_millis(100)).await;
   assert!(!fx.handle.is_finished());

   let reply = send(&fx.name, msg(Command::Setup, "/data/a"), None).await;
   if support::is_root() {
      assert_eq!(reply, Some(0));
      assert_eq!(fx.backend.calls(), vec![("migrate", PathBuf::from("/data/a"), false)]);
   } else {
      assert_eq!(reply, None);
   }
   assert!(!fx.handle.is_finished());
   fx.handle.stop().await.expect("stop");
}

/// Sends `message` from a thread whose credentials are dropped to
/// `nobody`. Only that thread changes identity; the raw syscalls bypass the
/// process-wide broadcast of the libc wrappers.
fn send_as_nobody(name: &str, message: CommandMessage) -> std::thread::JoinHandle<Option<u8>> {
   const NOBODY: libc::c_long = 65534;
   let name = name.to_string();
   std::thread::spawn(move || {
      // SAFETY: plain credential syscalls affecting only the calling thread.
      unsafe {
         assert_eq!(libc::syscall(libc::SYS_setresgid, NOBODY, NOBODY, NOBODY), 0);
         assert_eq!(libc::syscall(libc::SYS_setresuid, NOBODY, NOBODY, NOBODY), 0);
      }
      channel::send_command(&name, &message, None, NO_REPLY_WAIT).expect("send command")
   })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admin_and_unprivileged_senders_share_one_server() {
   if !support::is_root() {
      return;
   }
   let fx = start("mixed", RecordingBackend::new());

   let intruder = send_as_nobody(&fx.name, msg(Command::Setup, "/data/b"));
   let (reader, writer) = pipe();
   let admin = send(&fx.name, msg(Command::Migrate, "/data/a"), Some(reader)).await;
   let intruder = tokio::task::spawn_blocking(move || intruder.join().expect("join sender"))
      .await
      .expect("join client");
   let shutdown = send_as_nobody(&fx.name, CommandMessage::shutdown());
   let shutdown = tokio::task::spawn_blocking(move || shutdown.join().expect("join sender"))
      .await
      .expect("join client");

   assert_eq!(admin, Some(0));
   assert_eq!(intruder, None);
   assert_eq!(shutdown, None);
   assert_eq!(fx.backend.calls(), vec![("migrate", PathBuf::from("/data/a"), true)]);
   assert!(!fx.exit.is_triggered());
   assert!(!fx.handle.is_finished());
   assert!(reader_gone(&writer).await, "passed descriptor left open");

   let again = send(&fx.name, msg(Command::Check, "/data/c"), None).await;
   assert_eq!(again, Some(0));
   fx.handle.stop().await.expect("stop");
}

#[tokio::test]
async fn stop_cancels_idle_receive() {
   let fx = start("stop", RecordingBackend::new());
   tokio::time::timeout(REPLY_WAIT, fx.handle.stop())
      .await
      .expect("stop returns")
      .expect("clean stop");
   Channel::open(&fx.name).expect("channel closed after stop");
}

#[tokio::test]
async fn start_fails_when_name_taken() {
   let name = support::unique_name("taken");
   let _holder = Channel::open(&name).expect("open");
   let dispatcher = Dispatcher::new(
      Arc::new(RecordingBackend::new()),
      Arc::new(RecordingMonitor::default()),
      ExitSignal::new(),
   );
   assert!(CommandServer::start(&name, dispatcher).is_err());
}
