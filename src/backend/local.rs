//! Backend keeping migrated copies in a local directory tree.

use std::{
   fs::{self, File},
   io::{self, Seek, SeekFrom},
   os::fd::BorrowedFd,
   path::{Component, Path, PathBuf},
};

use super::{Backend, CheckState};

/// Mirrors absolute source paths below `root`: `/data/a` is stored as
/// `<root>/data/a`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
   root: PathBuf,
}

impl LocalBackend {
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   /// Location of the migrated copy of `path`.
   pub fn target_for(&self, path: &Path) -> io::Result<PathBuf> {
      if !path.is_absolute() {
         return Err(io::Error::from_raw_os_error(libc::EINVAL));
      }
      let mut target = self.root.clone();
      for component in path.components() {
         match component {
            Component::Normal(part) => target.push(part),
            Component::RootDir => {},
            _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
         }
      }
      Ok(target)
   }

   fn open_source(path: &Path, source: Option<BorrowedFd<'_>>) -> io::Result<File> {
      match source {
         Some(fd) => {
            let mut file = File::from(fd.try_clone_to_owned()?);
            file.seek(SeekFrom::Start(0))?;
            Ok(file)
         },
         None => File::open(path),
      }
   }
}

impl Backend for LocalBackend {
   fn migrate(&self, path: &Path, source: Option<BorrowedFd<'_>>) -> io::Result<()> {
      let target = self.target_for(path)?;
      let mut input = Self::open_source(path, source)?;
      let meta = input.metadata()?;
      if !meta.is_file() {
         return Err(io::Error::from_raw_os_error(libc::EINVAL));
      }

      let parent = target
         .parent()
         .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
      fs::create_dir_all(parent)?;

      let mut staging = target.clone().into_os_string();
      staging.push(".dredger-tmp");
      let staging = PathBuf::from(staging);
      let result = write_copy(&mut input, &staging, &target, &meta);
      if result.is_err() {
         let _ = fs::remove_file(&staging);
      }
      result?;

      tracing::info!("Migrated '{}' to '{}'", path.display(), target.display());
      Ok(())
   }

   fn check(&self, path: &Path) -> io::Result<CheckState> {
      let target = self.target_for(path)?;
      let source = fs::metadata(path)?;
      let copy = match fs::metadata(&target) {
         Ok(meta) => meta,
         Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CheckState::NeedsMigration),
         Err(e) => return Err(e),
      };

      let stale = copy.len() != source.len() || copy.modified()? < source.modified()?;
      Ok(if stale { CheckState::NeedsMigration } else { CheckState::UpToDate })
   }
}

/// Copies `input` to `staging` and renames it over `target`.
fn write_copy(input: &mut File, staging: &Path, target: &Path, meta: &fs::Metadata) -> io::Result<()> {
   let mut output = File::create(staging)?;
   io::copy(input, &mut output)?;
   output.set_modified(meta.modified()?)?;
   output.sync_all()?;
   fs::rename(staging, target)
}
