//! Directory-backed store: `<root>/<id>/meta.json` plus one `<index>.rec`
//! file per written record.
//!
//! Each record lives in its own file so concurrent workers writing disjoint
//! ranges never contend on the same file.  A container's record limit is
//! fixed at creation and kept in its `meta.json`, so a store opened later with
//! different limits still reads it whole.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{check_range, check_records, Backend, BackendError, ContainerHandle, ShareScope};

const META_FILE:  &str = "meta.json";
const RECORD_EXT: &str = "rec";

#[derive(Debug, Serialize, Deserialize)]
struct ContainerMeta {
    name:   String,
    #[serde(default)]
    shared: Option<String>,
    #[serde(default, rename = "maxRecords")]
    max_records: Option<usize>,
}

pub struct LocalBackend {
    root:             PathBuf,
    max_records:      usize,
    max_record_chars: usize,
}

impl LocalBackend {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P, max_records: usize, max_record_chars: usize) -> io::Result<Self> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root)?;
        Ok(Self { root, max_records, max_record_chars })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn container_dir(&self, id: &str) -> Result<PathBuf, BackendError> {
        // Ids are generated here; anything path-like is foreign.
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BackendError::NotFound(id.to_owned()));
        }
        let dir = self.root.join(id);
        if !dir.join(META_FILE).is_file() {
            return Err(BackendError::NotFound(id.to_owned()));
        }
        Ok(dir)
    }

    fn record_path(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("{index:06}.{RECORD_EXT}"))
    }

    fn read_meta(dir: &Path) -> Result<ContainerMeta, BackendError> {
        let bytes = fs::read(dir.join(META_FILE))?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Rejected(e.to_string()))
    }

    fn write_meta(dir: &Path, meta: &ContainerMeta) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(meta).map_err(|e| BackendError::Rejected(e.to_string()))?;
        fs::write(dir.join(META_FILE), bytes)?;
        Ok(())
    }

    /// Record limit the container was created with.
    fn record_limit(&self, dir: &Path) -> Result<usize, BackendError> {
        Ok(Self::read_meta(dir)?.max_records.unwrap_or(self.max_records))
    }

    fn populated(dir: &Path) -> Result<usize, BackendError> {
        let mut highest = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let index = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<usize>().ok());
            if let Some(index) = index {
                if fs::metadata(&path)?.len() > 0 {
                    highest = highest.max(index);
                }
            }
        }
        Ok(highest)
    }
}

impl Backend for LocalBackend {
    fn create_container(&self, name: &str) -> Result<ContainerHandle, BackendError> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&id);
        fs::create_dir_all(&dir)?;
        Self::write_meta(&dir, &ContainerMeta {
            name:        name.to_owned(),
            shared:      None,
            max_records: Some(self.max_records),
        })?;
        debug!(%id, name, "created local container");
        Ok(ContainerHandle { id, name: name.to_owned(), records: 0 })
    }

    fn share_container(&self, handle: &ContainerHandle, scope: ShareScope) -> Result<(), BackendError> {
        let dir = self.container_dir(&handle.id)?;
        let mut meta = Self::read_meta(&dir)?;
        meta.shared = Some(scope.name().to_owned());
        Self::write_meta(&dir, &meta)
    }

    fn delete_container(&self, id: &str) -> Result<(), BackendError> {
        let dir = self.container_dir(id)?;
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    fn open_container(&self, id: &str) -> Result<ContainerHandle, BackendError> {
        let dir = self.container_dir(id)?;
        let meta = Self::read_meta(&dir)?;
        Ok(ContainerHandle {
            id:      id.to_owned(),
            name:    meta.name,
            records: Self::populated(&dir)?,
        })
    }

    fn read_record_range(&self, handle: &ContainerHandle, start: usize, end: usize)
        -> Result<Vec<String>, BackendError>
    {
        let dir = self.container_dir(&handle.id)?;
        check_range(start, end, self.record_limit(&dir)?)?;
        (start..=end)
            .map(|index| match fs::read_to_string(Self::record_path(&dir, index)) {
                Ok(text) => Ok(text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(e.into()),
            })
            .collect()
    }

    fn write_record_batch(&self, handle: &ContainerHandle, start: usize, records: &[String])
        -> Result<(), BackendError>
    {
        if records.is_empty() {
            return Ok(());
        }
        let dir = self.container_dir(&handle.id)?;
        check_range(start, start + records.len() - 1, self.record_limit(&dir)?)?;
        check_records(start, records, self.max_record_chars)?;
        for (offset, record) in records.iter().enumerate() {
            fs::write(Self::record_path(&dir, start + offset), record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = LocalBackend::open(dir.path(), 5, 10).unwrap();
            let handle = store.create_container("blob 1 now").unwrap();
            store.share_container(&handle, ShareScope::AnyoneReader).unwrap();
            store.write_record_batch(&handle, 1, &["'ab".into(), "'cd".into()]).unwrap();
            handle.id
        };

        let store = LocalBackend::open(dir.path(), 5, 10).unwrap();
        let handle = store.open_container(&id).unwrap();
        assert_eq!(handle.name, "blob 1 now");
        assert_eq!(handle.records, 2);
        assert_eq!(store.read_record_range(&handle, 1, 3).unwrap(), vec!["'ab", "'cd", ""]);
    }

    #[test]
    fn delete_removes_container() {
        let dir = TempDir::new().unwrap();
        let store = LocalBackend::open(dir.path(), 5, 10).unwrap();
        let handle = store.create_container("gone").unwrap();
        store.delete_container(&handle.id).unwrap();
        assert!(matches!(store.open_container(&handle.id), Err(BackendError::NotFound(_))));
    }

    #[test]
    fn rejects_foreign_ids() {
        let dir = TempDir::new().unwrap();
        let store = LocalBackend::open(dir.path(), 5, 10).unwrap();
        assert!(matches!(store.open_container("../etc"), Err(BackendError::NotFound(_))));
    }

    #[test]
    fn container_keeps_its_record_limit() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = LocalBackend::open(dir.path(), 10, 10).unwrap();
            let handle = store.create_container("wide").unwrap();
            store.write_record_batch(&handle, 8, &["'late".into()]).unwrap();
            handle.id
        };

        // Reopened with a smaller limit, as a download with other flags would.
        let store = LocalBackend::open(dir.path(), 5, 10).unwrap();
        let handle = store.open_container(&id).unwrap();
        assert_eq!(handle.records, 8);
        let records = store.read_record_range(&handle, 1, handle.records).unwrap();
        assert_eq!(records[7], "'late");

        // New containers use the new limit.
        let narrow = store.create_container("narrow").unwrap();
        assert!(matches!(
            store.write_record_batch(&narrow, 6, &["'x".into()]),
            Err(BackendError::OutOfRange { limit: 5, .. })
        ));
    }
}
