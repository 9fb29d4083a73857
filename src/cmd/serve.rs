//! Daemon variant: command server plus trawler.
//!
//! Listens for administrator commands on the credential channel while the
//! supervisor trawls the configured root. Stops on SIGINT, SIGTERM or a
//! `Shutdown` command.

use std::{path::PathBuf, sync::Arc};

use console::style;

use crate::{
   Result,
   backend::{FanotifyMonitor, LocalBackend},
   config,
   error::Error,
   events::EventStore,
   file::Watcher,
   server::{CommandServer, Dispatcher},
   supervisor::ExitSignal,
};

pub async fn execute(dir: Option<PathBuf>, check_interval: Option<String>) -> Result<()> {
   let cfg = config::get();
   cfg.validate()?;

   let events = Arc::new(EventStore::new());
   let supervisor = super::supervisor(dir, check_interval, Arc::clone(&events))?;

   let exit = ExitSignal::new();
   let _signals = exit.listen_for_signals()?;

   let monitor = FanotifyMonitor::open()
      .map_err(|e| Error::Server { op: "fanotify", reason: e.to_string() })?;
   let backend = LocalBackend::new(&cfg.backend_dir);
   let dispatcher = Dispatcher::new(Arc::new(backend), Arc::new(monitor), exit.clone());
   let server = CommandServer::start(&cfg.socket_name, dispatcher)?;

   println!("{}", style("Starting dredger...").green().bold());
   println!("Listening: {}", style(format!("@{}", server.name())).cyan());
   println!("Root: {}", style(supervisor.root().display()).dim());
   println!("Backend: {}", style(cfg.backend_dir.display()).dim());

   let result = supervisor
      .run(Arc::new(Watcher::new(events)), &exit)
      .await;
   server.stop().await?;
   let report = result?;

   println!(
      "{}",
      style(format!("Dredger stopped ({} files trawled)", report.files)).green()
   );
   Ok(())
}
