//! In-memory stand-ins for the external tools, with call recording.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capabilities::{
    CmdResult, CompressionService, LongTermStore, ReleaseStore, ValidationService, VersionControl,
};
use crate::error::CommandError;
use crate::types::COMPRESSED_EXT;
use crate::util::with_suffix;

const FAKE_XZ_MAGIC: &[u8] = b"FAKEXZ\n";

pub(crate) fn failed(program: &str, stderr: &str) -> CommandError {
    CommandError::Failed {
        program: program.to_string(),
        status: "status 1".to_string(),
        stderr: stderr.to_string(),
    }
}

// ── compression ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct FakeCompression {
    pub(crate) compressed: RefCell<Vec<PathBuf>>,
    pub(crate) decompressed: RefCell<Vec<PathBuf>>,
    pub(crate) fail: Cell<bool>,
}

impl FakeCompression {
    pub(crate) fn encode(&self, plain: &[u8]) -> Vec<u8> {
        let mut out = FAKE_XZ_MAGIC.to_vec();
        out.extend_from_slice(plain);
        out
    }

    pub(crate) fn write_compressed(&self, path: &Path, plain: &[u8]) {
        fs::write(path, self.encode(plain)).unwrap();
    }
}

impl CompressionService for FakeCompression {
    fn compress(&self, path: &Path) -> CmdResult<PathBuf> {
        if self.fail.get() {
            return Err(failed("xz", "compression failed"));
        }
        let out = with_suffix(path, ".xz");
        fs::write(&out, self.encode(&fs::read(path)?))?;
        self.compressed.borrow_mut().push(path.to_path_buf());
        Ok(out)
    }

    fn decompress(&self, compressed: &Path) -> CmdResult<PathBuf> {
        let data = fs::read(compressed)?;
        let Some(plain) = data.strip_prefix(FAKE_XZ_MAGIC) else {
            return Err(failed("xz", "file format not recognized"));
        };
        let out = compressed.with_extension("");
        fs::write(&out, plain)?;
        self.decompressed.borrow_mut().push(compressed.to_path_buf());
        Ok(out)
    }
}

// ── validation ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct FakeValidator {
    accept: Cell<bool>,
    seen: RefCell<Vec<Vec<u8>>>,
}

impl FakeValidator {
    pub(crate) fn accepting() -> Self {
        Self {
            accept: Cell::new(true),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn rejecting() -> Self {
        let v = Self::accepting();
        v.accept.set(false);
        v
    }

    pub(crate) fn set_accept(&self, accept: bool) {
        self.accept.set(accept);
    }

    /// Contents of every file handed to `validate`, in call order.
    pub(crate) fn validated(&self) -> Vec<Vec<u8>> {
        self.seen.borrow().clone()
    }
}

impl ValidationService for FakeValidator {
    fn validate(&self, merged: &Path) -> CmdResult<bool> {
        self.seen.borrow_mut().push(fs::read(merged)?);
        Ok(self.accept.get())
    }
}

// ── release store ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CreatedRelease {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) notes: String,
}

#[derive(Debug, Default)]
pub(crate) struct FakeReleases {
    assets: RefCell<BTreeMap<String, Vec<u8>>>,
    created: RefCell<Vec<CreatedRelease>>,
    downloads: RefCell<Vec<String>>,
    deleted: RefCell<Vec<String>>,
    failing_deletes: RefCell<BTreeSet<String>>,
    pub(crate) unavailable: Cell<bool>,
    pub(crate) fail_create: Cell<bool>,
}

impl FakeReleases {
    pub(crate) fn insert(&self, name: &str, compressed: &[u8]) {
        self.assets
            .borrow_mut()
            .insert(name.to_string(), compressed.to_vec());
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.assets.borrow().contains_key(name)
    }

    pub(crate) fn asset(&self, name: &str) -> Option<Vec<u8>> {
        self.assets.borrow().get(name).cloned()
    }

    pub(crate) fn created(&self) -> Vec<CreatedRelease> {
        self.created.borrow().clone()
    }

    pub(crate) fn downloads(&self) -> Vec<String> {
        self.downloads.borrow().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.borrow().clone()
    }

    pub(crate) fn fail_delete_of(&self, name: &str) {
        self.failing_deletes.borrow_mut().insert(name.to_string());
    }

    fn check_available(&self) -> CmdResult<()> {
        if self.unavailable.get() {
            return Err(failed("gh", "could not connect to api.github.com"));
        }
        Ok(())
    }
}

impl ReleaseStore for FakeReleases {
    fn exists(&self, name: &str) -> CmdResult<bool> {
        self.check_available()?;
        Ok(self.contains(name))
    }

    fn create(&self, name: &str, file: &Path, title: &str, notes: &str) -> CmdResult<()> {
        self.check_available()?;
        if self.fail_create.get() {
            return Err(failed("gh", "HTTP 502"));
        }
        self.insert(name, &fs::read(file)?);
        self.created.borrow_mut().push(CreatedRelease {
            name: name.to_string(),
            title: title.to_string(),
            notes: notes.to_string(),
        });
        Ok(())
    }

    fn download(&self, name: &str, dest_dir: &Path) -> CmdResult<PathBuf> {
        self.check_available()?;
        let Some(data) = self.asset(name) else {
            return Err(failed("gh", "release not found"));
        };
        let path = dest_dir.join(format!("{name}.{COMPRESSED_EXT}"));
        fs::write(&path, data)?;
        self.downloads.borrow_mut().push(name.to_string());
        Ok(path)
    }

    fn delete(&self, name: &str) -> CmdResult<()> {
        if self.failing_deletes.borrow().contains(name) {
            return Err(failed("gh", "HTTP 500"));
        }
        if self.assets.borrow_mut().remove(name).is_none() {
            return Err(failed("gh", "release not found"));
        }
        self.deleted.borrow_mut().push(name.to_string());
        Ok(())
    }
}

// ── long-term store ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct FakeLongTerm {
    pub(crate) authenticated: Cell<bool>,
    /// Identity/secret pair that `authenticate` accepts.
    pub(crate) valid_credentials: RefCell<Option<(String, String)>>,
    objects: RefCell<BTreeMap<String, BTreeSet<String>>>,
    uploads: RefCell<Vec<(String, PathBuf)>>,
    pub(crate) auth_attempts: Cell<usize>,
}

impl FakeLongTerm {
    pub(crate) fn authenticated() -> Self {
        let store = Self::default();
        store.authenticated.set(true);
        store
    }

    pub(crate) fn uploads(&self) -> Vec<(String, PathBuf)> {
        self.uploads.borrow().clone()
    }

    pub(crate) fn insert_object(&self, item_id: &str, name: &str) {
        self.objects
            .borrow_mut()
            .entry(item_id.to_string())
            .or_default()
            .insert(name.to_string());
    }
}

impl LongTermStore for FakeLongTerm {
    fn is_authenticated(&self) -> CmdResult<bool> {
        Ok(self.authenticated.get())
    }

    fn authenticate(&self, identity: &str, secret: &str) -> CmdResult<()> {
        self.auth_attempts.set(self.auth_attempts.get() + 1);
        let ok = self
            .valid_credentials
            .borrow()
            .as_ref()
            .is_some_and(|(i, s)| i == identity && s == secret);
        if !ok {
            return Err(failed("ia", "authentication failed"));
        }
        self.authenticated.set(true);
        Ok(())
    }

    fn list_objects(&self, item_id: &str) -> CmdResult<BTreeSet<String>> {
        if !self.authenticated.get() {
            return Err(failed("ia", "not configured"));
        }
        Ok(self.objects.borrow().get(item_id).cloned().unwrap_or_default())
    }

    fn upload(&self, item_id: &str, file: &Path) -> CmdResult<()> {
        if !self.authenticated.get() {
            return Err(failed("ia", "not configured"));
        }
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.insert_object(item_id, &name);
        self.uploads
            .borrow_mut()
            .push((item_id.to_string(), file.to_path_buf()));
        Ok(())
    }
}

// ── version control ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct FakeVcs {
    commits: RefCell<Vec<String>>,
    tags: RefCell<BTreeSet<String>>,
    pushed_tags: RefCell<Vec<String>>,
    deleted_remote: RefCell<Vec<String>>,
    deleted_local: RefCell<Vec<String>>,
    pub(crate) pushes: Cell<usize>,
    pub(crate) fail_remote_tag_delete: Cell<bool>,
}

impl FakeVcs {
    pub(crate) fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    pub(crate) fn has_tag(&self, tag: &str) -> bool {
        self.tags.borrow().contains(tag)
    }

    pub(crate) fn add_tag(&self, tag: &str) {
        self.tags.borrow_mut().insert(tag.to_string());
    }

    pub(crate) fn pushed_tags(&self) -> Vec<String> {
        self.pushed_tags.borrow().clone()
    }

    pub(crate) fn deleted_remote(&self) -> Vec<String> {
        self.deleted_remote.borrow().clone()
    }

    pub(crate) fn deleted_local(&self) -> Vec<String> {
        self.deleted_local.borrow().clone()
    }
}

impl VersionControl for FakeVcs {
    fn has_commit_message(&self, message: &str) -> CmdResult<bool> {
        Ok(self.commits.borrow().iter().any(|m| m == message))
    }

    fn commit(&self, paths: &[&Path], message: &str) -> CmdResult<()> {
        for path in paths {
            if !path.exists() {
                return Err(failed("git", "pathspec did not match any files"));
            }
        }
        self.commits.borrow_mut().push(message.to_string());
        Ok(())
    }

    fn push(&self) -> CmdResult<()> {
        self.pushes.set(self.pushes.get() + 1);
        Ok(())
    }

    fn tag_exists(&self, tag: &str) -> CmdResult<bool> {
        Ok(self.has_tag(tag))
    }

    fn tag(&self, name: &str) -> CmdResult<()> {
        if !self.tags.borrow_mut().insert(name.to_string()) {
            return Err(failed("git", "tag already exists"));
        }
        Ok(())
    }

    fn push_tag(&self, name: &str) -> CmdResult<()> {
        self.pushed_tags.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn delete_remote_tag(&self, name: &str) -> CmdResult<()> {
        if self.fail_remote_tag_delete.get() {
            return Err(failed("git", "remote ref does not exist"));
        }
        self.deleted_remote.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn delete_local_tag(&self, name: &str) -> CmdResult<()> {
        if !self.tags.borrow_mut().remove(name) {
            return Err(failed("git", "tag not found"));
        }
        self.deleted_local.borrow_mut().push(name.to_string());
        Ok(())
    }
}
