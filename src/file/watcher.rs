//! Per-directory change notification feeding the event store.

use std::{
   collections::HashSet,
   path::{Path, PathBuf},
   sync::Arc,
   thread::{self, JoinHandle},
   time::SystemTime,
};

use notify::{
   EventKind, RecommendedWatcher, RecursiveMode, Watcher as _,
   event::{CreateKind, ModifyKind},
};
use parking_lot::Mutex;

use crate::{
   Result,
   error::Error,
   events::EventStore,
};

/// Registers directories for change notification.
pub trait WatchRegistrar {
   fn register(&self, dir: &Path, mode: RecursiveMode) -> Result<()>;
}

/// A watch backend that must be running before directories can be
/// registered.
pub trait WatchSubsystem {
   fn start(&self) -> Result<()>;
   fn stop(&self);
}

struct Shared {
   events:   Arc<EventStore>,
   notifier: Mutex<Option<RecommendedWatcher>>,
   watched:  Mutex<HashSet<PathBuf>>,
}

/// notify-backed watch subsystem. Events are applied to the [`EventStore`]
/// on a dedicated worker thread.
pub struct Watcher {
   shared: Arc<Shared>,
   worker: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
   pub fn new(events: Arc<EventStore>) -> Self {
      Self {
         shared: Arc::new(Shared {
            events,
            notifier: Mutex::new(None),
            watched: Mutex::new(HashSet::new()),
         }),
         worker: Mutex::new(None),
      }
   }

   pub fn is_running(&self) -> bool {
      self.shared.notifier.lock().is_some()
   }

   pub fn is_watched(&self, dir: &Path) -> bool {
      self.shared.watched.lock().contains(dir)
   }

   pub fn watched_count(&self) -> usize {
      self.shared.watched.lock().len()
   }
}

impl WatchRegistrar for Watcher {
   fn register(&self, dir: &Path, mode: RecursiveMode) -> Result<()> {
      self.shared.register(dir, mode)
   }
}

impl WatchSubsystem for Watcher {
   fn start(&self) -> Result<()> {
      let mut notifier = self.shared.notifier.lock();
      if notifier.is_some() {
         tracing::warn!("watch subsystem already running");
         return Ok(());
      }

      let (tx, rx) = crossbeam_channel::unbounded();
      let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
         let _ = tx.send(res);
      })?;

      let shared = Arc::clone(&self.shared);
      let worker = thread::Builder::new()
         .name("watcher".into())
         .spawn(move || {
            for res in rx {
               match res {
                  Ok(event) => shared.apply(&event),
                  Err(e) => tracing::warn!("watch error: {e}"),
               }
            }
            tracing::debug!("watch worker exiting");
         })?;

      *notifier = Some(watcher);
      *self.worker.lock() = Some(worker);
      tracing::info!("Started watch subsystem");
      Ok(())
   }

   fn stop(&self) {
      // Dropping the notifier closes the event channel, which ends the worker.
      let notifier = self.shared.notifier.lock().take();
      if notifier.is_none() {
         return;
      }
      drop(notifier);

      if let Some(worker) = self.worker.lock().take()
         && worker.join().is_err()
      {
         tracing::error!("watch worker panicked");
      }
      self.shared.watched.lock().clear();
      tracing::info!("Stopped watch subsystem");
   }
}

impl Drop for Watcher {
   fn drop(&mut self) {
      self.stop();
   }
}

impl Shared {
   fn register(&self, dir: &Path, mode: RecursiveMode) -> Result<()> {
      let mut notifier = self.notifier.lock();
      let Some(watcher) = notifier.as_mut() else {
         return Err(Error::Server { op: "watch", reason: "watch subsystem not started".into() });
      };
      if self.watched.lock().contains(dir) {
         return Ok(());
      }
      watcher.watch(dir, mode)?;
      self.watched.lock().insert(dir.to_path_buf());
      tracing::debug!("watching '{}'", dir.display());
      Ok(())
   }

   fn apply(&self, event: &notify::Event) {
      let now = SystemTime::now();
      match event.kind {
         EventKind::Create(CreateKind::Folder) => {
            for path in &event.paths {
               self.register_new(path);
            }
         },
         EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            for path in &event.paths {
               if path.is_dir() {
                  self.register_new(path);
               } else if path.exists() {
                  self.events.record(path, now);
               } else {
                  self.forget(path);
               }
            }
         },
         EventKind::Access(_) | EventKind::Modify(_) => {
            for path in event.paths.iter().filter(|p| p.is_file()) {
               self.events.record(path, now);
            }
         },
         EventKind::Remove(_) => {
            for path in &event.paths {
               self.forget(path);
            }
         },
         _ => {},
      }
   }

   fn register_new(&self, dir: &Path) {
      if let Err(e) = self.register(dir, RecursiveMode::NonRecursive) {
         tracing::error!("Cannot watch new directory {}: {e}", dir.display());
      }
   }

   fn forget(&self, path: &Path) {
      self.events.forget(path);
      self.watched.lock().retain(|p| !p.starts_with(path));
   }
}
