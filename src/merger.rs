use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::capabilities::{CompressionService, ReleaseStore, ValidationService};
use crate::error::{ConsolidateError, Result};
use crate::types::Descriptor;

const COPY_BUF_BYTES: usize = 256 * 1024;

/// A merged, validated and compressed segment ready for upload.
#[derive(Debug, Clone)]
pub(crate) struct MergedArchive {
    pub(crate) merged: PathBuf,
    pub(crate) compressed: PathBuf,
    pub(crate) bytes: u64,
    pub(crate) digest: String,
}

/// Concatenates the segments of one tier, in manifest order, into a single file.
pub(crate) struct SegmentMerger<'a, C, V, R> {
    pub(crate) compression: &'a C,
    pub(crate) validation: &'a V,
    pub(crate) releases: &'a R,
    pub(crate) work_dir: &'a Path,
}

impl<C, V, R> SegmentMerger<'_, C, V, R>
where
    C: CompressionService,
    V: ValidationService,
    R: ReleaseStore,
{
    /// Materializes, validates and compresses `target` from `sources`.
    pub(crate) fn merge(&self, target: &Descriptor, sources: &[Descriptor]) -> Result<MergedArchive> {
        let (merged, bytes, digest) = self.materialize(target, sources)?;
        info!(archive = %target, bytes, blake3 = %digest, "running validation");
        match self.validation.validate(&merged) {
            Ok(true) => {}
            Ok(false) => return Err(ConsolidateError::ValidationFailed(merged)),
            Err(source) => {
                return Err(ConsolidateError::ValidatorUnavailable { path: merged, source });
            }
        }
        info!(archive = %target, "compressing");
        let compressed = self
            .compression
            .compress(&merged)
            .map_err(|source| ConsolidateError::CompressionFailed {
                action: "compress",
                path: merged.clone(),
                source,
            })?;
        Ok(MergedArchive {
            merged,
            compressed,
            bytes,
            digest,
        })
    }

    fn materialize(&self, target: &Descriptor, sources: &[Descriptor]) -> Result<(PathBuf, u64, String)> {
        let out_path = target.segment_path(self.work_dir);
        let result = self.append_all(&out_path, sources);
        if result.is_err() {
            let _ = fs::remove_file(&out_path);
        }
        result.map(|(bytes, digest)| (out_path, bytes, digest))
    }

    fn append_all(&self, out_path: &Path, sources: &[Descriptor]) -> Result<(u64, String)> {
        let mut out = BufWriter::new(File::create(out_path)?);
        let mut hasher = blake3::Hasher::new();
        let mut total = 0u64;
        let mut buf = vec![0u8; COPY_BUF_BYTES];
        for source in sources {
            let local = self.ensure_local(source)?;
            let mut file = File::open(&local)?;
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                hasher.update(&buf[..n]);
                total += n as u64;
            }
        }
        out.flush()?;
        Ok((total, hasher.finalize().to_hex().to_string()))
    }

    /// Local uncompressed path of `source`, fetching and decompressing it if needed.
    fn ensure_local(&self, source: &Descriptor) -> Result<PathBuf> {
        let local = source.segment_path(self.work_dir);
        if local.is_file() {
            return Ok(local);
        }
        let mut compressed = source.compressed_path(self.work_dir);
        if !compressed.is_file() {
            info!(segment = %source, "downloading from release store");
            compressed = self
                .releases
                .download(&source.name(), self.work_dir)
                .map_err(|err| ConsolidateError::RemoteUnavailable {
                    stage: "download",
                    name: source.name(),
                    source: err,
                })?;
        }
        info!(segment = %source, "decompressing");
        self.compression
            .decompress(&compressed)
            .map_err(|err| ConsolidateError::CompressionFailed {
                action: "decompress",
                path: compressed.clone(),
                source: err,
            })
    }
}
