use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConsolidateError, Result};
use crate::types::Manifest;

/// The manifest of record. Writes go to `<path>.tmp` and are renamed into place.
#[derive(Debug, Clone)]
pub(crate) struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub(crate) fn load(&self) -> Result<Manifest> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConsolidateError::ManifestMissing(self.path.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&data).map_err(|source| ConsolidateError::ManifestMalformed {
            path: self.path.clone(),
            source,
        })
    }

    pub(crate) fn save(&self, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest).map_err(|source| {
            ConsolidateError::ManifestMalformed {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "manifest saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}
