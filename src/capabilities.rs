//! Narrow interfaces over the external tools the engine drives.
//!
//! Production implementations shell out (see `shell.rs`); tests use the fakes in
//! `testing.rs`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::CommandError;

pub(crate) type CmdResult<T> = Result<T, CommandError>;

pub(crate) trait CompressionService {
    /// Writes `<path>.xz` next to `path` and returns it.
    fn compress(&self, path: &Path) -> CmdResult<PathBuf>;
    /// Writes the decompressed file next to `compressed` (without `.xz`) and returns it.
    fn decompress(&self, compressed: &Path) -> CmdResult<PathBuf>;
}

pub(crate) trait ValidationService {
    /// `Ok(false)` means the validator ran and rejected the file.
    fn validate(&self, merged: &Path) -> CmdResult<bool>;
}

/// Backend for the daily and monthly tiers.
pub(crate) trait ReleaseStore {
    fn exists(&self, name: &str) -> CmdResult<bool>;
    fn create(&self, name: &str, file: &Path, title: &str, notes: &str) -> CmdResult<()>;
    /// Downloads the compressed asset of release `name` into `dest_dir`.
    fn download(&self, name: &str, dest_dir: &Path) -> CmdResult<PathBuf>;
    fn delete(&self, name: &str) -> CmdResult<()>;
}

/// Backend for the yearly tier.
pub(crate) trait LongTermStore {
    fn is_authenticated(&self) -> CmdResult<bool>;
    fn authenticate(&self, identity: &str, secret: &str) -> CmdResult<()>;
    fn list_objects(&self, item_id: &str) -> CmdResult<BTreeSet<String>>;
    fn upload(&self, item_id: &str, file: &Path) -> CmdResult<()>;
}

pub(crate) trait VersionControl {
    fn has_commit_message(&self, message: &str) -> CmdResult<bool>;
    fn commit(&self, paths: &[&Path], message: &str) -> CmdResult<()>;
    fn push(&self) -> CmdResult<()>;
    fn tag_exists(&self, tag: &str) -> CmdResult<bool>;
    fn tag(&self, name: &str) -> CmdResult<()>;
    fn push_tag(&self, name: &str) -> CmdResult<()>;
    fn delete_remote_tag(&self, name: &str) -> CmdResult<()>;
    fn delete_local_tag(&self, name: &str) -> CmdResult<()>;
}

/// All collaborators of one engine run.
pub(crate) struct Backends<C, V, R, L, G> {
    pub(crate) compression: C,
    pub(crate) validation: V,
    pub(crate) releases: R,
    pub(crate) long_term: L,
    pub(crate) vcs: G,
}
