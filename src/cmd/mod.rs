//! CLI command implementations for dredger.
//!
//! `serve` and `trawl` are the two long-running variants; `client` sends
//! one administrator command to a running daemon.

pub mod client;
pub mod serve;
pub mod trawl;

use std::{path::PathBuf, sync::Arc};

use crate::{Result, config, events::EventStore, schedule, supervisor::Supervisor};

/// Builds the supervisor from config, with CLI flags taking precedence.
fn supervisor(
   dir: Option<PathBuf>,
   check_interval: Option<String>,
   events: Arc<EventStore>,
) -> Result<Supervisor> {
   let cfg = config::get();
   let spec = check_interval.unwrap_or_else(|| cfg.check_interval.clone());
   let interval = schedule::recheck_interval(&spec)?;
   let root = dir.unwrap_or_else(|| cfg.root.clone());

   Ok(
      Supervisor::new(&root, interval, events)?
         .record_files(cfg.record_files)
         .max_path_len(cfg.max_path_len),
   )
}
