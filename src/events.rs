//! Staleness bookkeeping: the reference time last seen for each path.

use std::{
   collections::HashMap,
   path::{Path, PathBuf},
   time::{Duration, SystemTime},
};

use parking_lot::Mutex;

/// A path together with the time its staleness is measured from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
   pub path:           PathBuf,
   pub reference_time: SystemTime,
}

#[derive(Debug, Default)]
pub struct EventStore {
   entries: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl EventStore {
   pub fn new() -> Self {
      Self::default()
   }

   /// Records (or replaces) the reference time of `path`.
   pub fn record(&self, path: &Path, reference_time: SystemTime) {
      self
         .entries
         .lock()
         .insert(path.to_path_buf(), reference_time);
   }

   /// Drops `path` and everything below it. Returns the number of entries
   /// removed.
   pub fn forget(&self, path: &Path) -> usize {
      let mut entries = self.entries.lock();
      let before = entries.len();
      entries.retain(|p, _| !p.starts_with(path));
      before - entries.len()
   }

   /// All entries, oldest reference time first.
   pub fn list(&self) -> Vec<Event> {
      let mut events: Vec<Event> = self
         .entries
         .lock()
         .iter()
         .map(|(path, &reference_time)| Event { path: path.clone(), reference_time })
         .collect();
      events.sort_by(|a, b| {
         a.reference_time
            .cmp(&b.reference_time)
            .then_with(|| a.path.cmp(&b.path))
      });
      events
   }

   /// Entries whose reference time lies at least `interval` before `now`.
   pub fn due(&self, now: SystemTime, interval: Duration) -> Vec<Event> {
      self
         .list()
         .into_iter()
         .filter(|e| {
            e.reference_time
               .checked_add(interval)
               .is_some_and(|deadline| deadline <= now)
         })
         .collect()
   }

   pub fn len(&self) -> usize {
      self.entries.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.lock().is_empty()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn t(secs: u64) -> SystemTime {
      SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
   }

   #[test]
   fn list_is_ordered_by_reference_time() {
      let store = EventStore::new();
      store.record(Path::new("/b"), t(20));
      store.record(Path::new("/a"), t(30));
      store.record(Path::new("/c"), t(10));
      let paths: Vec<_> = store.list().into_iter().map(|e| e.path).collect();
      assert_eq!(paths, vec![PathBuf::from("/c"), PathBuf::from("/b"), PathBuf::from("/a")]);
   }

   #[test]
   fn record_replaces_previous_time() {
      let store = EventStore::new();
      store.record(Path::new("/a"), t(10));
      store.record(Path::new("/a"), t(50));
      assert_eq!(store.len(), 1);
      assert_eq!(store.list()[0].reference_time, t(50));
   }

   #[test]
   fn forget_removes_subtree() {
      let store = EventStore::new();
      store.record(Path::new("/data/a"), t(1));
      store.record(Path::new("/data/sub/b"), t(2));
      store.record(Path::new("/other"), t(3));
      assert_eq!(store.forget(Path::new("/data")), 2);
      assert_eq!(store.len(), 1);
   }

   #[test]
   fn due_respects_interval() {
      let store = EventStore::new();
      store.record(Path::new("/old"), t(100));
      store.record(Path::new("/new"), t(950));
      let due = store.due(t(1000), Duration::from_secs(60));
      assert_eq!(due.len(), 1);
      assert_eq!(due[0].path, PathBuf::from("/old"));
   }
}
