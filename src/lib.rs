//! Hierarchical storage migration: an administrator command server that
//! hands files to a storage backend, and a trawler that keeps watch over a
//! directory tree.

pub mod backend;
pub mod channel;
pub mod cmd;
pub mod config;
pub mod error;
pub mod events;
pub mod file;
pub mod ipc;
pub mod schedule;
pub mod server;
pub mod supervisor;

pub use error::{Error, Result};
