//! Resumable transfer state.
//!
//! A [`Manifest`] describes an upload: how many containers the encoded blob
//! needs and which of them have been committed, in container order.  It is
//! the only thing a later run needs to resume the upload or to download the
//! blob again.
//!
//! # On-disk format
//! ```json
//! {"name":"movie.mkv","complete":true,"containerCount":2,
//!  "containerIds":["…","…"],"version":"1.0.0"}
//! ```
//! Field names are frozen.  Manifests written before container counts were
//! recorded used `key_list` for the ids; that name is still accepted on read.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec;

pub mod bitmap;

pub use bitmap::ProgressBitmap;

/// Version written into new manifests.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timestamp layout used in manifest and container names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("invalid manifest {path}: {reason}")]
    Invalid { path: String, reason: String },
    #[error("unsupported manifest version {found:?} (this build writes {})", FORMAT_VERSION)]
    UnsupportedVersion { found: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ManifestError {
    pub(crate) fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        ManifestError::Invalid { path: path.display().to_string(), reason: reason.into() }
    }
}

/// Containers needed for `input_bytes` of raw data:
/// `ceil(ceil(input_bytes / 3) * 4 / capacity_chars)`.
pub fn compute_container_count(input_bytes: u64, capacity_chars: usize) -> usize {
    codec::encoded_len(input_bytes).div_ceil(capacity_chars.max(1) as u64) as usize
}

/// Local wall-clock time formatted for names.
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

// ── Manifest ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name:            String,
    pub complete:        bool,
    pub container_count: usize,
    /// Committed container ids, in container order.
    pub container_ids:   Vec<String>,
    pub version:         String,
}

// Accepts both the current `containerIds` and the legacy `key_list`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestRaw {
    name:            String,
    complete:        bool,
    container_count: usize,
    #[serde(default)]
    container_ids:   Option<Vec<String>>,
    #[serde(default, rename = "key_list")]
    key_list:        Option<Vec<String>>,
    version:         String,
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = ManifestRaw::deserialize(deserializer)?;
        let container_ids = raw
            .container_ids
            .or(raw.key_list)
            .ok_or_else(|| serde::de::Error::missing_field("containerIds"))?;
        if container_ids.len() > raw.container_count {
            return Err(serde::de::Error::custom(format!(
                "{} container ids recorded but containerCount is {}",
                container_ids.len(),
                raw.container_count
            )));
        }
        Ok(Manifest {
            name: raw.name,
            complete: raw.complete,
            container_count: raw.container_count,
            container_ids,
            version: raw.version,
        })
    }
}

impl Manifest {
    /// A fresh manifest with nothing committed.
    pub fn new(name: impl Into<String>, container_count: usize) -> Self {
        Self {
            name: name.into(),
            complete: container_count == 0,
            container_count,
            container_ids: Vec::new(),
            version: FORMAT_VERSION.to_owned(),
        }
    }

    pub fn committed(&self) -> usize {
        self.container_ids.len()
    }

    /// Append the id of the next committed container.
    pub fn commit(&mut self, id: String) {
        self.container_ids.push(id);
        self.complete = self.committed() == self.container_count;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Read a manifest.  Absent, unparsable, or incomplete files are all
    /// [`ManifestError::Invalid`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| ManifestError::invalid(path, e.to_string()))?;
        Self::from_bytes(&bytes).map_err(|e| ManifestError::invalid(path, e.to_string()))
    }

    /// Fail unless this build understands the manifest's version: the major
    /// component must match ours.
    pub fn ensure_supported(&self) -> Result<(), ManifestError> {
        let major = |v: &str| v.split('.').next().and_then(|m| m.trim().parse::<u64>().ok());
        match (major(&self.version), major(FORMAT_VERSION)) {
            (Some(found), Some(ours)) if found == ours => Ok(()),
            _ => Err(ManifestError::UnsupportedVersion { found: self.version.clone() }),
        }
    }

    /// Overwrite the manifest at `path`, which an earlier [`persist`] returned.
    /// The new content goes to a sibling temp file first and is renamed into
    /// place, so a crash leaves either the old or the new manifest.
    ///
    /// [`persist`]: Manifest::persist
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ManifestError> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&self.to_bytes()?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), committed = self.committed(), "manifest updated");
        Ok(())
    }

    /// Write the manifest into `dir` as `<name>.json`.  An existing file is
    /// never overwritten: the name falls back to `<name> <timestamp>.json`,
    /// then to numbered variants of that.
    pub fn persist<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, ManifestError> {
        let dir = dir.as_ref();
        let bytes = self.to_bytes()?;
        let stamp = timestamp();

        let mut attempt = 0usize;
        loop {
            let file_name = match attempt {
                0 => format!("{}.json", self.name),
                1 => format!("{} {stamp}.json", self.name),
                n => format!("{} {stamp}-{}.json", self.name, n - 1),
            };
            let path = dir.join(file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&bytes)?;
                    file.sync_all()?;
                    debug!(path = %path.display(), attempt, "manifest written");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn container_count_formula() {
        assert_eq!(compute_container_count(0, 49_500_000), 0);
        assert_eq!(compute_container_count(1, 49_500_000), 1);
        assert_eq!(compute_container_count(150_000, 49_500_000), 1);
        // 37_125_000 bytes encode to exactly one full container.
        assert_eq!(compute_container_count(37_125_000, 49_500_000), 1);
        assert_eq!(compute_container_count(37_125_001, 49_500_000), 2);
        assert_eq!(compute_container_count(30, 16), 3);
    }

    #[test]
    fn commit_tracks_completion() {
        let mut m = Manifest::new("blob", 2);
        assert!(!m.complete);
        m.commit("a".into());
        assert!(!m.complete);
        m.commit("b".into());
        assert!(m.complete);
        assert!(Manifest::new("empty", 0).complete);
    }

    #[test]
    fn field_names_are_stable() {
        let mut m = Manifest::new("blob.bin", 1);
        m.commit("id1".into());
        let value: serde_json::Value = serde_json::from_slice(&m.to_bytes().unwrap()).unwrap();
        assert_eq!(value["name"], "blob.bin");
        assert_eq!(value["complete"], true);
        assert_eq!(value["containerCount"], 1);
        assert_eq!(value["containerIds"][0], "id1");
        assert_eq!(value["version"], FORMAT_VERSION);
    }

    #[test]
    fn legacy_key_list_is_accepted() {
        let json = br#"{"name":"a","complete":false,"containerCount":3,"key_list":["x"],"version":"1.0.0"}"#;
        let m = Manifest::from_bytes(json).unwrap();
        assert_eq!(m.container_ids, vec!["x"]);
    }

    #[test]
    fn load_rejects_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(Manifest::load(&missing), Err(ManifestError::Invalid { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, b"{not json").unwrap();
        assert!(matches!(Manifest::load(&broken), Err(ManifestError::Invalid { .. })));

        let partial = dir.path().join("partial.json");
        fs::write(&partial, br#"{"name":"a","containerIds":[]}"#).unwrap();
        assert!(matches!(Manifest::load(&partial), Err(ManifestError::Invalid { .. })));

        let overfull = dir.path().join("overfull.json");
        fs::write(&overfull, br#"{"name":"a","complete":true,"containerCount":1,"containerIds":["x","y"],"version":"1.0.0"}"#).unwrap();
        assert!(matches!(Manifest::load(&overfull), Err(ManifestError::Invalid { .. })));
    }

    #[test]
    fn persist_never_clobbers() {
        let dir = TempDir::new().unwrap();
        let mut m = Manifest::new("blob", 1);
        let first = m.persist(dir.path()).unwrap();
        assert_eq!(first, dir.path().join("blob.json"));

        m.commit("id".into());
        let second = m.persist(dir.path()).unwrap();
        let third = m.persist(dir.path()).unwrap();
        assert_ne!(second, first);
        assert_ne!(third, second);

        assert!(!Manifest::load(&first).unwrap().complete);
        assert!(Manifest::load(&second).unwrap().complete);
        assert_eq!(Manifest::load(&third).unwrap(), m);
    }

    #[test]
    fn save_rewrites_in_place() {
        let dir = TempDir::new().unwrap();
        let mut m = Manifest::new("blob", 2);
        m.commit("a".into());
        let path = m.persist(dir.path()).unwrap();

        m.commit("b".into());
        m.save(&path).unwrap();
        let back = Manifest::load(&path).unwrap();
        assert_eq!(back.container_ids, vec!["a", "b"]);
        assert!(back.complete);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn version_check() {
        let mut m = Manifest::new("blob", 1);
        assert!(m.ensure_supported().is_ok());
        m.version = "1.7.3".into();
        assert!(m.ensure_supported().is_ok());
        m.version = "0.9".into();
        assert!(matches!(m.ensure_supported(), Err(ManifestError::UnsupportedVersion { .. })));
        m.version = "garbage".into();
        assert!(m.ensure_supported().is_err());
    }
}
