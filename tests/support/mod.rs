#![allow(dead_code)]

use std::{
   io,
   os::fd::BorrowedFd,
   path::{Path, PathBuf},
   sync::atomic::{AtomicUsize, Ordering},
};

use dredger::{
   backend::{AccessMonitor, Backend, CheckState},
   file::{WatchRegistrar, WatchSubsystem},
};
use notify::RecursiveMode;
use parking_lot::Mutex;

/// A call observed by [`RecordingBackend`]: operation, path, and whether a
/// descriptor came along.
pub type Call = (&'static str, PathBuf, bool);

pub struct RecordingBackend {
   pub calls:   Mutex<Vec<Call>>,
   pub check:   Result<CheckState, i32>,
   pub failure: Option<i32>,
}

impl RecordingBackend {
   pub fn new() -> Self {
      Self { calls: Mutex::new(Vec::new()), check: Ok(CheckState::NeedsMigration), failure: None }
   }

   pub fn failing(errno: i32) -> Self {
      Self { failure: Some(errno), ..Self::new() }
   }

   pub fn calls(&self) -> Vec<Call> {
      self.calls.lock().clone()
   }
}

impl Backend for RecordingBackend {
   fn migrate(&self, path: &Path, source: Option<BorrowedFd<'_>>) -> io::Result<()> {
      self
         .calls
         .lock()
         .push(("migrate", path.to_path_buf(), source.is_some()));
      match self.failure {
         Some(errno) => Err(io::Error::from_raw_os_error(errno)),
         None => Ok(()),
      }
   }

   fn check(&self, path: &Path) -> io::Result<CheckState> {
      self
         .calls
         .lock()
         .push(("check", path.to_path_buf(), false));
      self.check.map_err(io::Error::from_raw_os_error)
   }
}

#[derive(Default)]
pub struct RecordingMonitor {
   pub paths: Mutex<Vec<PathBuf>>,
}

impl AccessMonitor for RecordingMonitor {
   fn monitor(&self, path: &Path) -> io::Result<()> {
      self.paths.lock().push(path.to_path_buf());
      Ok(())
   }
}

/// Registrar that accepts everything and remembers the order.
#[derive(Default)]
pub struct RecordingRegistrar {
   pub dirs:    Mutex<Vec<PathBuf>>,
   pub started: AtomicUsize,
   pub stopped: AtomicUsize,
}

impl RecordingRegistrar {
   pub fn dirs(&self) -> Vec<PathBuf> {
      self.dirs.lock().clone()
   }
}

impl WatchRegistrar for RecordingRegistrar {
   fn register(&self, dir: &Path, _mode: RecursiveMode) -> dredger::Result<()> {
      self.dirs.lock().push(dir.to_path_buf());
      Ok(())
   }
}

impl WatchSubsystem for RecordingRegistrar {
   fn start(&self) -> dredger::Result<()> {
      self.started.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   fn stop(&self) {
      self.stopped.fetch_add(1, Ordering::SeqCst);
   }
}

/// Registrar that refuses one directory.
pub struct FailingRegistrar {
   pub refuse: PathBuf,
   pub inner:  RecordingRegistrar,
}

impl WatchRegistrar for FailingRegistrar {
   fn register(&self, dir: &Path, mode: RecursiveMode) -> dredger::Result<()> {
      if dir == self.refuse {
         return Err(io::Error::from_raw_os_error(libc::ENOSPC).into());
      }
      self.inner.register(dir, mode)
   }
}

/// Abstract socket name unique to this process and call site.
pub fn unique_name(tag: &str) -> String {
   static NEXT: AtomicUsize = AtomicUsize::new(0);
   format!(
      "/org/kernel/trawler/test/{}/{tag}/{}",
      std::process::id(),
      NEXT.fetch_add(1, Ordering::SeqCst)
   )
}

pub fn is_root() -> bool {
   // SAFETY: geteuid has no preconditions.
   unsafe { libc::geteuid() == 0 }
}
