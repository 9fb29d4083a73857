//! Process-level coordination: exit signalling and the trawl-then-wait
//! lifecycle shared by the daemon and the standalone trawler.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
   time::{Duration, Instant, SystemTime},
};

use tokio::{
   signal::unix::{SignalKind, signal},
   task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   error::Error,
   events::EventStore,
   file::{Trawler, WatchRegistrar, WatchSubsystem},
};

/// Process-scoped termination condition.
///
/// Cloned into the command server and the signal listener. Triggering is
/// sticky: a `wait` that starts after `trigger` returns immediately.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal {
   token: CancellationToken,
}

impl ExitSignal {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn trigger(&self, reason: &str) {
      if !self.token.is_cancelled() {
         tracing::info!("Exit requested: {reason}");
      }
      self.token.cancel();
   }

   pub fn is_triggered(&self) -> bool {
      self.token.is_cancelled()
   }

   pub async fn wait(&self) {
      self.token.cancelled().await;
   }

   /// Turns SIGINT and SIGTERM into a trigger. The listener task ends once
   /// the signal fires for any reason.
   pub fn listen_for_signals(&self) -> Result<JoinHandle<()>> {
      let mut term = signal(SignalKind::terminate())?;
      let mut int = signal(SignalKind::interrupt())?;
      let exit = self.clone();
      Ok(tokio::spawn(async move {
         let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            () = exit.wait() => return,
         };
         exit.trigger(name);
      }))
   }
}

/// Outcome of the initial trawl.
#[derive(Debug, Clone, Copy)]
pub struct TrawlReport {
   pub files:   usize,
   pub elapsed: Duration,
}

/// Canonicalizes the trawl root. An empty root means `/`.
pub fn resolve_root(root: &Path) -> Result<PathBuf> {
   let root = if root.as_os_str().is_empty() { Path::new("/") } else { root };
   Ok(root.canonicalize()?)
}

pub struct Supervisor {
   root:           PathBuf,
   check_interval: Duration,
   record_files:   bool,
   max_path_len:   usize,
   events:         Arc<EventStore>,
}

impl Supervisor {
   pub fn new(root: &Path, check_interval: Duration, events: Arc<EventStore>) -> Result<Self> {
      Ok(Self {
         root: resolve_root(root)?,
         check_interval,
         record_files: false,
         max_path_len: libc::PATH_MAX as usize,
         events,
      })
   }

   pub fn record_files(mut self, on: bool) -> Self {
      self.record_files = on;
      self
   }

   pub fn max_path_len(mut self, max: usize) -> Self {
      self.max_path_len = max;
      self
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   /// Starts `watcher`, trawls the root once, then blocks until `exit`
   /// fires and stops the watcher again.
   pub async fn run<W>(&self, watcher: Arc<W>, exit: &ExitSignal) -> Result<TrawlReport>
   where
      W: WatchRegistrar + WatchSubsystem + Send + Sync + 'static,
   {
      watcher.start()?;
      let report = match self.trawl_once(Arc::clone(&watcher)).await {
         Ok(report) => report,
         Err(e) => {
            watcher.stop();
            return Err(e);
         },
      };
      self.list_events();

      exit.wait().await;
      watcher.stop();
      Ok(report)
   }

   /// Runs one trawl on a blocking thread and logs its statistics.
   pub async fn trawl_once<W>(&self, watcher: Arc<W>) -> Result<TrawlReport>
   where
      W: WatchRegistrar + Send + Sync + 'static,
   {
      let root = self.root.clone();
      let events = self.record_files.then(|| Arc::clone(&self.events));
      let max_path_len = self.max_path_len;

      tracing::info!("Starting at '{}'", root.display());
      let start = Instant::now();
      let files = tokio::task::spawn_blocking(move || {
         let trawler = Trawler::new(&*watcher).max_path_len(max_path_len);
         match events.as_deref() {
            Some(events) => trawler.record_into(events).trawl(&root),
            None => trawler.trawl(&root),
         }
      })
      .await
      .map_err(|e| Error::Server { op: "trawl", reason: e.to_string() })?;

      let elapsed = start.elapsed();
      tracing::info!("Checked {files} files in {:.3} seconds", elapsed.as_secs_f64());
      Ok(TrawlReport { files, elapsed })
   }

   fn list_events(&self) {
      let now = SystemTime::now();
      for event in self.events.list() {
         let age = now
            .duration_since(event.reference_time)
            .unwrap_or_default();
         tracing::debug!("{} (idle {}s)", event.path.display(), age.as_secs());
      }
      let due = self.events.due(now, self.check_interval).len();
      tracing::info!("{} files tracked, {due} due for recheck", self.events.len());
   }
}
