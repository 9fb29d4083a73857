//! Standalone trawler: watch the tree until SIGINT or SIGTERM.

use std::{path::PathBuf, sync::Arc};

use console::style;

use crate::{
   Result,
   events::EventStore,
   file::Watcher,
   supervisor::ExitSignal,
};

pub async fn execute(dir: Option<PathBuf>, check_interval: Option<String>) -> Result<()> {
   let events = Arc::new(EventStore::new());
   let supervisor = super::supervisor(dir, check_interval, Arc::clone(&events))?;

   let exit = ExitSignal::new();
   let _signals = exit.listen_for_signals()?;

   println!("Trawling: {}", style(supervisor.root().display()).cyan());
   let report = supervisor
      .run(Arc::new(Watcher::new(events)), &exit)
      .await?;

   println!(
      "{}",
      style(format!(
         "Trawler stopped ({} files, initial pass {:.3}s)",
         report.files,
         report.elapsed.as_secs_f64()
      ))
      .green()
   );
   Ok(())
}
