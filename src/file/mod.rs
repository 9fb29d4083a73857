//! Filesystem walking and change notification.

mod trawl;
mod watcher;

pub use trawl::{EntryKind, TrawlEntry, Trawler, reference_time};
pub use watcher::{WatchRegistrar, WatchSubsystem, Watcher};
