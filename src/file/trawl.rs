//! Depth-first directory walk that registers every directory for change
//! notification and counts regular files.

use std::{
   fs::{self, Metadata},
   io,
   os::unix::ffi::OsStrExt,
   path::{Path, PathBuf},
   time::SystemTime,
};

use notify::RecursiveMode;

use super::watcher::WatchRegistrar;
use crate::events::EventStore;

/// Filesystem node kinds the walk distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
   Directory,
   File,
   Other,
}

impl EntryKind {
   pub fn of(meta: &Metadata) -> Self {
      let ft = meta.file_type();
      if ft.is_dir() {
         Self::Directory
      } else if ft.is_file() {
         Self::File
      } else {
         Self::Other
      }
   }
}

#[derive(Debug, Clone)]
pub struct TrawlEntry {
   pub path:           PathBuf,
   pub kind:           EntryKind,
   pub reference_time: SystemTime,
}

impl TrawlEntry {
   pub fn from_metadata(path: PathBuf, meta: &Metadata) -> io::Result<Self> {
      Ok(Self { path, kind: EntryKind::of(meta), reference_time: reference_time(meta)? })
   }
}

/// The earlier of access and modification time. Falls back to the
/// modification time when the access time is unavailable.
pub fn reference_time(meta: &Metadata) -> io::Result<SystemTime> {
   let modified = meta.modified()?;
   Ok(match meta.accessed() {
      Ok(accessed) => accessed.min(modified),
      Err(_) => modified,
   })
}

pub struct Trawler<'a> {
   registrar:    &'a dyn WatchRegistrar,
   events:       Option<&'a EventStore>,
   max_path_len: usize,
}

impl<'a> Trawler<'a> {
   pub fn new(registrar: &'a dyn WatchRegistrar) -> Self {
      Self { registrar, events: None, max_path_len: libc::PATH_MAX as usize }
   }

   /// Forwards the reference time of every visited file to `events`.
   pub fn record_into(mut self, events: &'a EventStore) -> Self {
      self.events = Some(events);
      self
   }

   pub fn max_path_len(mut self, max: usize) -> Self {
      self.max_path_len = max;
      self
   }

   /// Walks `root` and returns the number of regular files found. Symlinks
   /// below the root are not followed.
   pub fn trawl(&self, root: &Path) -> usize {
      match fs::metadata(root) {
         Ok(meta) => self.visit(root, &meta),
         Err(e) => {
            tracing::error!("Cannot stat {}: {e}", root.display());
            0
         },
      }
   }

   fn visit(&self, path: &Path, meta: &Metadata) -> usize {
      match EntryKind::of(meta) {
         EntryKind::Directory => self.visit_dir(path),
         EntryKind::File => {
            self.visit_file(path, meta);
            1
         },
         EntryKind::Other => 0,
      }
   }

   fn visit_file(&self, path: &Path, meta: &Metadata) {
      let Some(events) = self.events else {
         return;
      };
      match TrawlEntry::from_metadata(path.to_path_buf(), meta) {
         Ok(entry) => events.record(&entry.path, entry.reference_time),
         Err(e) => tracing::warn!("No timestamps for {}: {e}", path.display()),
      }
   }

   fn visit_dir(&self, dir: &Path) -> usize {
      if let Err(e) = self.registrar.register(dir, RecursiveMode::NonRecursive) {
         tracing::error!("Cannot watch {}: {e}", dir.display());
         return 0;
      }

      let entries = match fs::read_dir(dir) {
         Ok(entries) => entries,
         Err(e) => {
            tracing::error!("Cannot open directory {}: {e}", dir.display());
            return 0;
         },
      };

      let mut count = 0;
      for entry in entries {
         let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
               tracing::warn!("Cannot read entry in {}: {e}", dir.display());
               continue;
            },
         };
         let child = dir.join(entry.file_name());
         let len = child.as_os_str().as_bytes().len();
         if len >= self.max_path_len {
            tracing::error!(
               "Path too long ({len} bytes): {}/{}",
               dir.display(),
               entry.file_name().to_string_lossy()
            );
            continue;
         }
         match fs::symlink_metadata(&child) {
            Ok(meta) => count += self.visit(&child, &meta),
            Err(e) => tracing::warn!("Cannot stat {}: {e}", child.display()),
         }
      }
      count
   }
}
